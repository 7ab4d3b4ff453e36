use log::trace;

use crate::bit::align_down;
use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::execution_unit::{ExecutionUnit, StageSlots};
use crate::wavefront::WfId;

const NAME: &str = "branch unit";

pub struct BranchUnit {
    slots: StageSlots,
    fetch_line: u64,
}

impl BranchUnit {
    pub fn new(config: &CuConfig) -> Self {
        BranchUnit {
            slots: StageSlots::default(),
            fetch_line: config.inst_fetch_size as u64,
        }
    }

    pub fn slots(&self) -> &StageSlots {
        &self.slots
    }

    fn run_write_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities, now: Cycle) -> bool {
        let id = match self.slots.to_write.take() {
            Some(id) => id,
            None => return false,
        };
        let wf = &mut ctx.wavefronts[id];
        caps.preparer.commit(wf, &mut ctx.regs);
        // Whatever was buffered belongs to the old path.
        wf.inst_buffer.clear();
        wf.inst_buffer_start_pc = align_down(wf.pc, self.fetch_line);
        wf.retire();
        trace!("{}: {} {} retired, pc {:#x}", now, NAME, id, wf.pc);
        true
    }

    fn run_exec_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> bool {
        match self.slots.advance_exec() {
            Some(id) => {
                caps.alu.run(&mut ctx.wavefronts[id], None);
                true
            }
            None => false,
        }
    }

    fn run_read_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> bool {
        match self.slots.advance_read() {
            Some(id) => {
                caps.preparer.prepare(&mut ctx.wavefronts[id], &ctx.regs);
                true
            }
            None => false,
        }
    }
}

impl ExecutionUnit for BranchUnit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_accept_wave(&self) -> bool {
        self.slots.can_accept()
    }

    fn accept_wave(&mut self, wf: WfId, _now: Cycle) -> Result<(), SimError> {
        self.slots.accept(NAME, wf)
    }

    fn run(
        &mut self,
        ctx: &mut CuContext,
        caps: &mut Capabilities,
        now: Cycle,
    ) -> Result<bool, SimError> {
        let mut progress = self.run_write_stage(ctx, caps, now);
        progress |= self.run_exec_stage(ctx, caps);
        progress |= self.run_read_stage(ctx, caps);
        Ok(progress)
    }

    fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    fn flush(&mut self) {
        self.slots.clear();
    }

    fn holds(&self, wf: WfId) -> bool {
        self.slots.holds(wf)
    }
}

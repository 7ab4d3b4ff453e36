use log::trace;

use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::execution_unit::{ExecutionUnit, StageSlots};
use crate::wavefront::WfId;

const NAME: &str = "simd unit";

/// Vector ALU. A wavefront occupies the exec stage for
/// `wavefront_size / simd_lanes` cycles.
pub struct SimdUnit {
    slots: StageSlots,
    exec_cycles: usize,
    exec_cycles_left: usize,
}

impl SimdUnit {
    pub fn new(config: &CuConfig) -> Self {
        SimdUnit {
            slots: StageSlots::default(),
            exec_cycles: config.simd_exec_cycles(),
            exec_cycles_left: config.simd_exec_cycles(),
        }
    }

    pub fn slots(&self) -> &StageSlots {
        &self.slots
    }

    pub fn exec_cycles_left(&self) -> usize {
        self.exec_cycles_left
    }

    fn run_write_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities, now: Cycle) -> bool {
        let id = match self.slots.to_write.take() {
            Some(id) => id,
            None => return false,
        };
        let wf = &mut ctx.wavefronts[id];
        caps.preparer.commit(wf, &mut ctx.regs);
        wf.retire();
        trace!("{}: {} {} retired", now, NAME, id);
        true
    }

    fn run_exec_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> bool {
        let id = match self.slots.to_exec {
            Some(id) => id,
            None => return false,
        };
        if self.slots.to_write.is_some() {
            return false;
        }

        self.exec_cycles_left = self.exec_cycles_left.saturating_sub(1);
        if self.exec_cycles_left > 0 {
            return true;
        }
        caps.alu.run(&mut ctx.wavefronts[id], None);
        self.slots.advance_exec();
        true
    }

    fn run_read_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> bool {
        match self.slots.advance_read() {
            Some(id) => {
                caps.preparer.prepare(&mut ctx.wavefronts[id], &ctx.regs);
                self.exec_cycles_left = self.exec_cycles;
                true
            }
            None => false,
        }
    }
}

impl ExecutionUnit for SimdUnit {
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
        self.exec_cycles_left = self.exec_cycles;
    }

    fn holds(&self, wf: WfId) -> bool {
        self.slots.holds(wf)
    }
}

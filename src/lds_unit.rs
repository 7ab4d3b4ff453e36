use log::trace;

use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::execution_unit::{ExecutionUnit, StageSlots};
use crate::wavefront::WfId;

const NAME: &str = "lds unit";

/// Local data share. Executes against the work-group's own LDS buffer.
pub struct LdsUnit {
    slots: StageSlots,
}

impl LdsUnit {
    pub fn new() -> Self {
        LdsUnit {
            slots: StageSlots::default(),
        }
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
        let id = match self.slots.advance_exec() {
            Some(id) => id,
            None => return false,
        };
        let wf = &mut ctx.wavefronts[id];
        match ctx.work_groups.get_mut(wf.wg) {
            Some(wg) => caps.alu.run(wf, Some(wg.lds.as_mut_slice())),
            None => caps.alu.run(wf, None),
        }
        true
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

impl Default for LdsUnit {
    fn default() -> Self {
        LdsUnit::new()
    }
}

impl ExecutionUnit for LdsUnit {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CuConfig;
    use crate::testing::{add_running_wavefront, caps_with_alu, lds_inst, test_context, LdsStoreAlu};
    use crate::wavefront::WfState;

    #[test]
    fn exec_sees_work_group_lds() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let mut caps = caps_with_alu(Box::new(LdsStoreAlu { offset: 8, value: 0x5a }));
        let id = add_running_wavefront(&mut ctx, 0, lds_inst());
        let wg = ctx.wavefronts[id].wg;

        let mut unit = LdsUnit::new();
        unit.accept_wave(id, 0).unwrap();
        for now in 0..3 {
            assert!(unit.run(&mut ctx, &mut caps, now).unwrap());
        }
        assert!(unit.is_idle());
        assert_eq!(ctx.work_groups[wg].lds[8], 0x5a);
    }

    #[test]
    fn back_to_back_waves_retire_in_order() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let mut caps = caps_with_alu(Box::new(LdsStoreAlu { offset: 0, value: 1 }));
        let a = add_running_wavefront(&mut ctx, 0, lds_inst());
        let b = add_running_wavefront(&mut ctx, 1, lds_inst());

        let mut unit = LdsUnit::new();
        unit.accept_wave(a, 0).unwrap();
        assert!(unit.run(&mut ctx, &mut caps, 0).unwrap());
        assert!(unit.can_accept_wave());
        unit.accept_wave(b, 1).unwrap();
        assert!(unit.run(&mut ctx, &mut caps, 1).unwrap());

        assert!(unit.run(&mut ctx, &mut caps, 2).unwrap());
        assert_eq!(ctx.wavefronts[a].state, WfState::Ready);
        assert_eq!(ctx.wavefronts[b].state, WfState::Running);
        assert!(!unit.holds(a));
        assert!(unit.holds(b));

        assert!(unit.run(&mut ctx, &mut caps, 3).unwrap());
        assert_eq!(ctx.wavefronts[b].state, WfState::Ready);
        assert!(unit.is_idle());
        assert!(!unit.run(&mut ctx, &mut caps, 4).unwrap());
    }
}

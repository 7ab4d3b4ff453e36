use crate::branch_unit::BranchUnit;
use crate::coalescer::DefaultCoalescer;
use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::insts::{ExeUnitClass, Inst};
use crate::lds_unit::LdsUnit;
use crate::scalar_unit::ScalarUnit;
use crate::simd_unit::SimdUnit;
use crate::vector_memory_unit::VectorMemoryUnit;
use crate::wavefront::WfId;

/// A three-stage (read, exec, write) pipeline. Each `run` drains
/// write first, then exec, then read, so a wavefront never overtakes the
/// one ahead of it.
pub trait ExecutionUnit {
    fn name(&self) -> &'static str;
    fn can_accept_wave(&self) -> bool;
    fn accept_wave(&mut self, wf: WfId, now: Cycle) -> Result<(), SimError>;
    fn run(
        &mut self,
        ctx: &mut CuContext,
        caps: &mut Capabilities,
        now: Cycle,
    ) -> Result<bool, SimError>;
    fn is_idle(&self) -> bool;
    fn flush(&mut self);
    fn holds(&self, wf: WfId) -> bool;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageSlots {
    pub to_read: Option<WfId>,
    pub to_exec: Option<WfId>,
    pub to_write: Option<WfId>,
}

impl StageSlots {
    pub fn accept(&mut self, unit: &'static str, wf: WfId) -> Result<(), SimError> {
        if let Some(occupant) = self.to_read {
            return Err(SimError::UnitOccupied { unit, wf, occupant });
        }
        self.to_read = Some(wf);
        Ok(())
    }

    pub fn can_accept(&self) -> bool {
        self.to_read.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.to_read.is_none() && self.to_exec.is_none() && self.to_write.is_none()
    }

    pub fn holds(&self, wf: WfId) -> bool {
        self.to_read == Some(wf) || self.to_exec == Some(wf) || self.to_write == Some(wf)
    }

    pub fn clear(&mut self) {
        *self = StageSlots::default();
    }

    /// Moves `to_read` into `to_exec` if exec is free.
    pub fn advance_read(&mut self) -> Option<WfId> {
        if self.to_exec.is_some() {
            return None;
        }
        let wf = self.to_read.take()?;
        self.to_exec = Some(wf);
        Some(wf)
    }

    /// Moves `to_exec` into `to_write` if write is free.
    pub fn advance_exec(&mut self) -> Option<WfId> {
        if self.to_write.is_some() {
            return None;
        }
        let wf = self.to_exec.take()?;
        self.to_write = Some(wf);
        Some(wf)
    }
}

pub(crate) fn issued_inst<'a>(
    ctx: &'a CuContext,
    wf: WfId,
    unit: &'static str,
) -> Result<&'a Inst, SimError> {
    ctx.wavefronts[wf]
        .inst
        .as_ref()
        .ok_or(SimError::NoInstruction { wf, unit })
}

pub struct ExecutionUnits {
    pub branch: Box<dyn ExecutionUnit>,
    pub scalar: Box<dyn ExecutionUnit>,
    pub simds: Vec<Box<dyn ExecutionUnit>>,
    pub lds: Box<dyn ExecutionUnit>,
    pub vector_mem: Box<dyn ExecutionUnit>,
}

impl ExecutionUnits {
    pub fn new(config: &CuConfig) -> Self {
        ExecutionUnits {
            branch: Box::new(BranchUnit::new(config)),
            scalar: Box::new(ScalarUnit::new()),
            simds: (0..config.num_simd_units)
                .map(|_| Box::new(SimdUnit::new(config)) as Box<dyn ExecutionUnit>)
                .collect(),
            lds: Box::new(LdsUnit::new()),
            vector_mem: Box::new(VectorMemoryUnit::new(Box::new(DefaultCoalescer::new(
                config.cache_line_size,
            )))),
        }
    }

    /// The unit an instruction class issues to. Special instructions are
    /// evaluated by the scheduler and have none.
    pub fn unit_for(
        &mut self,
        class: ExeUnitClass,
        simd_id: usize,
    ) -> Option<&mut Box<dyn ExecutionUnit>> {
        match class {
            ExeUnitClass::Branch => Some(&mut self.branch),
            ExeUnitClass::Scalar => Some(&mut self.scalar),
            ExeUnitClass::Simd => self.simds.get_mut(simd_id),
            ExeUnitClass::Lds => Some(&mut self.lds),
            ExeUnitClass::VectorMem => Some(&mut self.vector_mem),
            ExeUnitClass::Special(_) => None,
        }
    }

    pub fn run_all(
        &mut self,
        ctx: &mut CuContext,
        caps: &mut Capabilities,
        now: Cycle,
    ) -> Result<bool, SimError> {
        let mut progress = self.branch.run(ctx, caps, now)?;
        progress |= self.scalar.run(ctx, caps, now)?;
        for simd in self.simds.iter_mut() {
            progress |= simd.run(ctx, caps, now)?;
        }
        progress |= self.lds.run(ctx, caps, now)?;
        progress |= self.vector_mem.run(ctx, caps, now)?;
        Ok(progress)
    }

    pub fn all_idle(&self) -> bool {
        self.iter().all(|unit| unit.is_idle())
    }

    pub fn flush_all(&mut self) {
        self.branch.flush();
        self.scalar.flush();
        for simd in self.simds.iter_mut() {
            simd.flush();
        }
        self.lds.flush();
        self.vector_mem.flush();
    }

    /// Number of units currently holding `wf` in any stage.
    pub fn holders_of(&self, wf: WfId) -> usize {
        self.iter().filter(|unit| unit.holds(wf)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Box<dyn ExecutionUnit>> {
        std::iter::once(&self.branch)
            .chain(std::iter::once(&self.scalar))
            .chain(self.simds.iter())
            .chain(std::iter::once(&self.lds))
            .chain(std::iter::once(&self.vector_mem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_into_occupied_read_stage_fails() {
        let mut slots = StageSlots::default();
        assert_eq!(slots.accept("simd", WfId(1)), Ok(()));
        assert_eq!(
            slots.accept("simd", WfId(2)),
            Err(SimError::UnitOccupied {
                unit: "simd",
                wf: WfId(2),
                occupant: WfId(1),
            })
        );
        assert!(slots.holds(WfId(1)));
        assert!(!slots.holds(WfId(2)));
    }

    #[test]
    fn stages_never_overtake() {
        let mut slots = StageSlots {
            to_read: Some(WfId(3)),
            to_exec: Some(WfId(2)),
            to_write: Some(WfId(1)),
        };
        assert_eq!(slots.advance_exec(), None);
        assert_eq!(slots.advance_read(), None);
        slots.to_write = None;
        assert_eq!(slots.advance_exec(), Some(WfId(2)));
        assert_eq!(slots.advance_read(), Some(WfId(3)));
        assert!(slots.can_accept());
    }
}

use std::collections::VecDeque;

use log::{debug, trace};

use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::execution_unit::{issued_inst, ExecutionUnit, StageSlots};
use crate::inflight::ScalarMemAccessInfo;
use crate::insts::{Format, MemKind};
use crate::protocol::{MemReq, ReadReq};
use crate::wavefront::WfId;

const NAME: &str = "scalar unit";

/// Scalar ALU and scalar memory loads.
pub struct ScalarUnit {
    slots: StageSlots,
    read_buf: VecDeque<ScalarMemAccessInfo>,
}

impl ScalarUnit {
    pub fn new() -> Self {
        ScalarUnit {
            slots: StageSlots::default(),
            read_buf: VecDeque::new(),
        }
    }

    fn send_request(&mut self, ctx: &mut CuContext, now: Cycle) -> bool {
        let info = match self.read_buf.pop_front() {
            Some(info) => info,
            None => return false,
        };
        match ctx.scalar_mem.to_mem.send(MemReq::Read(info.req.clone())) {
            Ok(()) => {
                debug!(
                    "{}: {} sent scalar read {} for {} at {:#x}",
                    now, NAME, info.req.id, info.wf, info.req.address
                );
                ctx.in_flight_scalar_mem.push(info);
                true
            }
            Err(_) => {
                self.read_buf.push_front(info);
                false
            }
        }
    }

    fn run_write_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities, now: Cycle) -> bool {
        let id = match self.slots.to_write {
            Some(id) => id,
            None => return false,
        };
        if self.read_buf.iter().any(|info| info.wf == id) {
            return false;
        }
        self.slots.to_write = None;

        let wf = &mut ctx.wavefronts[id];
        let is_load = wf
            .inst
            .as_ref()
            .map_or(false, |inst| inst.format == Format::SMEM && inst.mem.is_some());
        if !is_load {
            caps.preparer.commit(wf, &mut ctx.regs);
        }
        wf.retire();
        trace!("{}: {} {} retired", now, NAME, id);
        true
    }

    fn run_exec_stage(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> Result<bool, SimError> {
        let id = match self.slots.to_exec {
            Some(id) => id,
            None => return Ok(false),
        };
        if self.slots.to_write.is_some() {
            return Ok(false);
        }

        let inst = issued_inst(ctx, id, NAME)?;
        let load = match (inst.format, inst.mem) {
            (Format::SMEM, Some(mem)) if mem.kind == MemKind::Load => Some((mem, inst.pc)),
            _ => None,
        };

        match load {
            Some((mem, pc)) => {
                let wf = &mut ctx.wavefronts[id];
                let req = ReadReq {
                    id: ctx.req_ids.next_id(),
                    address: wf.scratchpad.scalar_address,
                    byte_size: (mem.reg_count * 4) as u64,
                    pid: wf.pid,
                };
                wf.outstanding_scalar_mem_access += 1;
                self.read_buf.push_back(ScalarMemAccessInfo {
                    req,
                    wf: id,
                    dst_sgpr: mem.reg,
                    pc,
                });
            }
            None => caps.alu.run(&mut ctx.wavefronts[id], None),
        }
        self.slots.advance_exec();
        Ok(true)
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

impl Default for ScalarUnit {
    fn default() -> Self {
        ScalarUnit::new()
    }
}

impl ExecutionUnit for ScalarUnit {
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
        let mut progress = self.send_request(ctx, now);
        progress |= self.run_write_stage(ctx, caps, now);
        progress |= self.run_exec_stage(ctx, caps)?;
        progress |= self.run_read_stage(ctx, caps);
        Ok(progress)
    }

    fn is_idle(&self) -> bool {
        self.slots.is_empty() && self.read_buf.is_empty()
    }

    fn flush(&mut self) {
        self.slots.clear();
        self.read_buf.clear();
    }

    fn holds(&self, wf: WfId) -> bool {
        self.slots.holds(wf)
    }
}

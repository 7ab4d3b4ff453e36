use std::collections::VecDeque;

use log::{debug, trace};

use crate::coalescer::Coalescer;
use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::Cycle;
use crate::execution_unit::{issued_inst, ExecutionUnit, StageSlots};
use crate::inflight::VectorMemAccessInfo;
use crate::insts::{Format, MemKind, MemOperand};
use crate::protocol::{MemReq, ReadReq, WriteReq};
use crate::wavefront::{Scratchpad, WfId};

const NAME: &str = "vector memory unit";

/// FLAT and MUBUF accesses. Exec turns lane addresses into line requests;
/// the wavefront leaves the unit once they have all been handed to the
/// port, and the counters track the responses.
pub struct VectorMemoryUnit {
    slots: StageSlots,
    coalescer: Box<dyn Coalescer>,
    send_buf: VecDeque<VectorMemAccessInfo>,
}

fn lane_store_bytes(scratchpad: &Scratchpad, lane: usize, mem: &MemOperand) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..mem.reg_count)
        .flat_map(|k| {
            let value = scratchpad
                .lane_data
                .get(lane * mem.reg_count + k)
                .copied()
                .unwrap_or(0);
            value.to_le_bytes().to_vec()
        })
        .collect();
    bytes.resize(mem.bytes_per_lane, 0);
    bytes
}

impl VectorMemoryUnit {
    pub fn new(coalescer: Box<dyn Coalescer>) -> Self {
        VectorMemoryUnit {
            slots: StageSlots::default(),
            coalescer,
            send_buf: VecDeque::new(),
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.send_buf.len()
    }

    fn send_request(&mut self, ctx: &mut CuContext, now: Cycle) -> bool {
        let info = match self.send_buf.pop_front() {
            Some(info) => info,
            None => return false,
        };
        match ctx.vector_mem.to_mem.send(info.req.clone()) {
            Ok(()) => {
                debug!(
                    "{}: {} sent request {} for {} at {:#x}",
                    now,
                    NAME,
                    info.req.id(),
                    info.wf,
                    info.req.address()
                );
                ctx.in_flight_vector_mem.push(info);
                true
            }
            Err(_) => {
                self.send_buf.push_front(info);
                false
            }
        }
    }

    fn run_write_stage(&mut self, ctx: &mut CuContext, now: Cycle) -> bool {
        let id = match self.slots.to_write {
            Some(id) => id,
            None => return false,
        };
        if self.send_buf.iter().any(|info| info.wf == id) {
            return false;
        }
        self.slots.to_write = None;
        ctx.wavefronts[id].retire();
        trace!("{}: {} {} released", now, NAME, id);
        true
    }

    fn run_exec_stage(&mut self, ctx: &mut CuContext) -> Result<bool, SimError> {
        let id = match self.slots.to_exec {
            Some(id) => id,
            None => return Ok(false),
        };
        if self.slots.to_write.is_some() {
            return Ok(false);
        }

        let inst = issued_inst(ctx, id, NAME)?;
        let mem = inst
            .mem
            .ok_or(SimError::MissingMemOperand { wf: id, pc: inst.pc })?;
        let is_flat = inst.format == Format::FLAT;

        let wf = &mut ctx.wavefronts[id];
        let accesses =
            self.coalescer
                .coalesce(&wf.scratchpad.lane_addresses, wf.exec_mask, mem.bytes_per_lane);
        if !accesses.is_empty() {
            wf.outstanding_vector_mem_access += 1;
            if is_flat {
                wf.outstanding_scalar_mem_access += 1;
            }
        }

        let count = accesses.len();
        for (i, access) in accesses.into_iter().enumerate() {
            let req = match mem.kind {
                MemKind::Load => MemReq::Read(ReadReq {
                    id: ctx.req_ids.next_id(),
                    address: access.address,
                    byte_size: access.byte_size,
                    pid: wf.pid,
                }),
                MemKind::Store => {
                    let size = access.byte_size as usize;
                    let mut data = vec![0u8; size];
                    let mut dirty_mask = vec![false; size];
                    for lane in access.lanes.iter() {
                        let bytes = lane_store_bytes(&wf.scratchpad, lane.lane, &mem);
                        let end = lane.offset + bytes.len();
                        data[lane.offset..end].copy_from_slice(&bytes);
                        dirty_mask[lane.offset..end].iter_mut().for_each(|d| *d = true);
                    }
                    MemReq::Write(WriteReq {
                        id: ctx.req_ids.next_id(),
                        address: access.address,
                        data,
                        dirty_mask,
                        pid: wf.pid,
                    })
                }
            };
            self.send_buf.push_back(VectorMemAccessInfo {
                req,
                wf: id,
                lanes: access.lanes,
                dst_vgpr: mem.reg,
                reg_count: mem.reg_count,
                bytes_per_lane: mem.bytes_per_lane,
                is_last: i + 1 == count,
                is_flat,
            });
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

impl ExecutionUnit for VectorMemoryUnit {
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
        progress |= self.run_write_stage(ctx, now);
        progress |= self.run_exec_stage(ctx)?;
        progress |= self.run_read_stage(ctx, caps);
        Ok(progress)
    }

    fn is_idle(&self) -> bool {
        self.slots.is_empty() && self.send_buf.is_empty()
    }

    fn flush(&mut self) {
        self.slots.clear();
        self.send_buf.clear();
    }

    fn holds(&self, wf: WfId) -> bool {
        self.slots.holds(wf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalescer::DefaultCoalescer;
    use crate::config::CuConfig;
    use crate::testing::{add_running_wavefront, flat_load_inst, null_caps, store_inst, test_context};
    use crate::wavefront::WfState;

    fn run_until_idle(unit: &mut VectorMemoryUnit, ctx: &mut CuContext) {
        let mut caps = null_caps();
        let mut now = 0;
        while !unit.is_idle() {
            unit.run(ctx, &mut caps, now).unwrap();
            while ctx.vector_mem.to_mem.retrieve().is_some() {}
            now += 1;
            assert!(now < 100);
        }
    }

    #[test]
    fn flat_load_counts_against_both_counters_once() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let id = add_running_wavefront(&mut ctx, 0, flat_load_inst(4, 1, 4));
        ctx.wavefronts[id].scratchpad.lane_addresses = (0..64).map(|l| 0x1000 + l * 4).collect();

        let mut unit = VectorMemoryUnit::new(Box::new(DefaultCoalescer::new(64)));
        unit.accept_wave(id, 0).unwrap();
        run_until_idle(&mut unit, &mut ctx);

        let wf = &ctx.wavefronts[id];
        assert_eq!(wf.state, WfState::Ready);
        assert_eq!(wf.outstanding_vector_mem_access, 1);
        assert_eq!(wf.outstanding_scalar_mem_access, 1);
        assert_eq!(ctx.in_flight_vector_mem.len(), 4);
        let last: Vec<bool> = ctx.in_flight_vector_mem.iter().map(|i| i.is_last).collect();
        assert_eq!(last, vec![false, false, false, true]);
    }

    #[test]
    fn store_builds_dirty_masked_line() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let id = add_running_wavefront(&mut ctx, 0, store_inst(2, 1, 2));
        {
            let wf = &mut ctx.wavefronts[id];
            wf.exec_mask = 0b11;
            wf.scratchpad.lane_addresses = vec![0x104, 0x106];
            wf.scratchpad.lane_data = vec![0xAAAA_1111, 0xBBBB_2222];
        }

        let mut unit = VectorMemoryUnit::new(Box::new(DefaultCoalescer::new(64)));
        unit.accept_wave(id, 0).unwrap();
        let mut caps = null_caps();
        for now in 0..3 {
            unit.run(&mut ctx, &mut caps, now).unwrap();
        }

        match ctx.vector_mem.to_mem.retrieve() {
            Some(MemReq::Write(req)) => {
                assert_eq!(req.address, 0x100);
                assert_eq!(&req.data[4..8], &[0x11, 0x11, 0x22, 0x22]);
                let dirty: Vec<usize> = (0..64).filter(|&i| req.dirty_mask[i]).collect();
                assert_eq!(dirty, vec![4, 5, 6, 7]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ctx.wavefronts[id].outstanding_scalar_mem_access, 0);
    }

    #[test]
    fn missing_memory_operand_is_reported() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let mut inst = flat_load_inst(0, 1, 4);
        inst.mem = None;
        let id = add_running_wavefront(&mut ctx, 0, inst);
        let mut unit = VectorMemoryUnit::new(Box::new(DefaultCoalescer::new(64)));
        unit.accept_wave(id, 0).unwrap();
        let mut caps = null_caps();
        unit.run(&mut ctx, &mut caps, 0).unwrap();
        assert!(matches!(
            unit.run(&mut ctx, &mut caps, 1),
            Err(SimError::MissingMemOperand { .. })
        ));
    }
}

use log::{debug, trace};

use crate::arbiter::{FetchArbiter, IssueArbiter, WfArbiter};
use crate::bit::align_down;
use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::error::SimError;
use crate::event::{CuEvent, Cycle};
use crate::execution_unit::ExecutionUnits;
use crate::inflight::InstFetchInfo;
use crate::insts::{DecodeError, ExeUnitClass, SpecialOp};
use crate::protocol::{MemReq, ReadReq};
use crate::wavefront::{WfId, WfState};

/// Decides which wavefront fetches, decodes and issues each cycle, and
/// evaluates the instructions that never leave the scheduler (end of
/// program, barriers, counter waits).
pub struct Scheduler {
    fetch_arbiter: Box<dyn WfArbiter>,
    issue_arbiter: Box<dyn WfArbiter>,

    internal_executing: Option<WfId>,
    barrier_buffer: Vec<WfId>,
    barrier_buffer_size: usize,

    inst_fetch_size: u64,
    cycles_no_progress: usize,
    no_progress_limit: usize,
    is_paused: bool,
}

impl Scheduler {
    pub fn new(config: &CuConfig) -> Self {
        Scheduler::with_arbiters(
            config,
            Box::new(FetchArbiter::new(config.inst_buffer_capacity)),
            Box::new(IssueArbiter::new()),
        )
    }

    pub fn with_arbiters(
        config: &CuConfig,
        fetch_arbiter: Box<dyn WfArbiter>,
        issue_arbiter: Box<dyn WfArbiter>,
    ) -> Self {
        Scheduler {
            fetch_arbiter,
            issue_arbiter,
            internal_executing: None,
            barrier_buffer: Vec::with_capacity(config.barrier_buffer_size),
            barrier_buffer_size: config.barrier_buffer_size,
            inst_fetch_size: config.inst_fetch_size as u64,
            cycles_no_progress: 0,
            no_progress_limit: config.no_progress_limit,
            is_paused: false,
        }
    }

    /// Returns whether the scheduler wants another tick.
    pub fn run(
        &mut self,
        ctx: &mut CuContext,
        units: &mut ExecutionUnits,
        caps: &mut Capabilities,
        now: Cycle,
    ) -> Result<bool, SimError> {
        let mut progress = self.evaluate_internal_inst(ctx, now)?;
        if !self.is_paused {
            progress |= self.decode_next_inst(ctx, caps)?;
            progress |= self.do_issue(ctx, units, now)?;
            progress |= self.do_fetch(ctx, now);
        }

        if progress {
            self.cycles_no_progress = 0;
        } else {
            self.cycles_no_progress += 1;
        }
        Ok(self.cycles_no_progress < self.no_progress_limit)
    }

    /// Stops new decode, issue and fetch; instructions already in the
    /// internal slot keep being evaluated.
    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
        self.cycles_no_progress = 0;
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// Drops any instruction in the internal slot. Wavefronts parked at a
    /// barrier stay parked.
    pub fn flush(&mut self) {
        self.internal_executing = None;
        self.cycles_no_progress = 0;
    }

    pub fn internal_executing(&self) -> Option<WfId> {
        self.internal_executing
    }

    pub fn barrier_buffer(&self) -> &[WfId] {
        &self.barrier_buffer
    }

    /// Removes a completed work-group's wavefronts from the barrier buffer.
    pub fn forget(&mut self, wfs: &[WfId]) {
        self.barrier_buffer.retain(|id| !wfs.contains(id));
    }

    fn evaluate_internal_inst(&mut self, ctx: &mut CuContext, now: Cycle) -> Result<bool, SimError> {
        let id = match self.internal_executing {
            Some(id) => id,
            None => return Ok(false),
        };
        let op = ctx.wavefronts[id]
            .inst
            .as_ref()
            .and_then(|inst| inst.special_op())
            .ok_or(SimError::NoInstruction {
                wf: id,
                unit: "scheduler",
            })?;

        let done = match op {
            SpecialOp::EndPgm => self.eval_end_pgm(ctx, id, now),
            SpecialOp::Barrier => self.eval_barrier(ctx, id, now),
            SpecialOp::WaitCnt => self.eval_wait_cnt(ctx, id),
            SpecialOp::Nop
            | SpecialOp::Wakeup
            | SpecialOp::SetKill
            | SpecialOp::SetHalt
            | SpecialOp::Sleep
            | SpecialOp::SetPrio
            | SpecialOp::SendMsg
            | SpecialOp::SendMsgHalt
            | SpecialOp::ICacheInv
            | SpecialOp::IncPerfLevel
            | SpecialOp::DecPerfLevel
            | SpecialOp::TTraceData => {
                ctx.wavefronts[id].retire();
                self.internal_executing = None;
                true
            }
        };
        if done {
            trace!("{}: scheduler evaluated {:?} for {}", now, op, id);
        }
        Ok(done)
    }

    fn eval_end_pgm(&mut self, ctx: &mut CuContext, id: WfId, now: Cycle) -> bool {
        let wf = &ctx.wavefronts[id];
        if wf.outstanding_scalar_mem_access > 0 || wf.outstanding_vector_mem_access > 0 {
            return false;
        }
        ctx.events.schedule(now + 1, CuEvent::WfCompletion { wf: id });
        ctx.regs.clear_wavefront(wf);
        self.internal_executing = None;
        true
    }

    fn eval_barrier(&mut self, ctx: &mut CuContext, id: WfId, now: Cycle) -> bool {
        ctx.wavefronts[id].state = WfState::AtBarrier;

        let wg = ctx.wavefronts[id].wg;
        let siblings = ctx.work_groups[wg].wfs.clone();
        let all_arrived = siblings.iter().all(|&sib| {
            ctx.wavefronts
                .get(sib)
                .map_or(true, |wf| matches!(wf.state, WfState::AtBarrier | WfState::Completed))
        });

        if all_arrived {
            self.barrier_buffer.retain(|wf| !siblings.contains(wf));
            for &sib in siblings.iter() {
                if let Some(wf) = ctx.wavefronts.get_mut(sib) {
                    if wf.state == WfState::AtBarrier {
                        wf.retire();
                    }
                }
            }
            self.internal_executing = None;
            debug!("{}: barrier released {}", now, wg);
            return true;
        }

        if self.barrier_buffer.len() < self.barrier_buffer_size {
            self.barrier_buffer.push(id);
            self.internal_executing = None;
            return true;
        }
        false
    }

    fn eval_wait_cnt(&mut self, ctx: &mut CuContext, id: WfId) -> bool {
        let wf = &mut ctx.wavefronts[id];
        let wait = match wf.inst.as_ref() {
            Some(inst) => inst.wait_cnt,
            None => return false,
        };
        if wf.outstanding_scalar_mem_access > wait.lgkmcnt
            || wf.outstanding_vector_mem_access > wait.vmcnt
        {
            return false;
        }
        wf.retire();
        self.internal_executing = None;
        true
    }

    fn decode_next_inst(&mut self, ctx: &mut CuContext, caps: &mut Capabilities) -> Result<bool, SimError> {
        let mut progress = false;
        for pool in ctx.wf_pools.iter() {
            for id in pool.iter() {
                let wf = match ctx.wavefronts.get_mut(id) {
                    Some(wf) => wf,
                    None => continue,
                };
                if wf.inst_buffer.is_empty() {
                    wf.inst_buffer_start_pc = align_down(wf.pc, self.inst_fetch_size);
                    continue;
                }
                if wf.state != WfState::Ready || wf.inst_to_issue.is_some() {
                    continue;
                }
                let bytes = match wf.bytes_at_pc() {
                    Some(bytes) => bytes,
                    None => continue,
                };
                match caps.decoder.decode(bytes) {
                    Ok(mut inst) => {
                        inst.pc = wf.pc;
                        wf.inst_to_issue = Some(inst);
                        progress = true;
                    }
                    Err(DecodeError::Incomplete { .. }) => {}
                    Err(source) => {
                        return Err(SimError::Decode {
                            wf: id,
                            pc: wf.pc,
                            source,
                        })
                    }
                }
            }
        }
        Ok(progress)
    }

    fn do_issue(
        &mut self,
        ctx: &mut CuContext,
        units: &mut ExecutionUnits,
        now: Cycle,
    ) -> Result<bool, SimError> {
        let mut progress = false;
        for id in self.issue_arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts) {
            let wf = &mut ctx.wavefronts[id];
            let class = match wf.inst_to_issue.as_ref() {
                Some(inst) => inst.exe_unit,
                None => continue,
            };

            match class {
                ExeUnitClass::Special(_) => {
                    if self.internal_executing.is_some() {
                        continue;
                    }
                    self.internal_executing = Some(id);
                }
                _ => {
                    let unit = match units.unit_for(class, wf.simd_id) {
                        Some(unit) => unit,
                        None => continue,
                    };
                    if !unit.can_accept_wave() {
                        continue;
                    }
                    unit.accept_wave(id, now)?;
                }
            }

            if let Some(inst) = wf.inst_to_issue.take() {
                wf.state = WfState::Running;
                wf.pc += inst.byte_size as u64;
                wf.remove_stale_inst_buffer(self.inst_fetch_size);
                debug!("{}: issued {:?} at {:#x} for {}", now, inst.exe_unit, inst.pc, id);
                wf.inst = Some(inst);
                progress = true;
            }
        }
        Ok(progress)
    }

    fn do_fetch(&mut self, ctx: &mut CuContext, now: Cycle) -> bool {
        let id = match self
            .fetch_arbiter
            .arbitrate(&ctx.wf_pools, &ctx.wavefronts)
            .first()
        {
            Some(&id) => id,
            None => return false,
        };
        let wf = &mut ctx.wavefronts[id];
        if wf.inst_buffer.is_empty() {
            wf.inst_buffer_start_pc = align_down(wf.pc, self.inst_fetch_size);
        }
        let address = align_down(wf.inst_buffer_end(), self.inst_fetch_size);
        let req = ReadReq {
            id: ctx.req_ids.next_id(),
            address,
            byte_size: self.inst_fetch_size,
            pid: wf.pid,
        };

        match ctx.inst_mem.to_mem.send(MemReq::Read(req.clone())) {
            Ok(()) => {
                wf.is_fetching = true;
                debug!("{}: fetch {:#x} for {} (request {})", now, address, id, req.id);
                ctx.in_flight_inst_fetch.push(InstFetchInfo {
                    req,
                    wf: id,
                    address,
                });
                true
            }
            Err(_) => false,
        }
    }
}

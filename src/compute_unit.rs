use std::collections::{HashSet, VecDeque};

use log::{debug, info, trace, warn};

use crate::buffer::get_u32_zext;
use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::error::{ConfigError, SimError};
use crate::event::{CuEvent, Cycle};
use crate::execution_unit::ExecutionUnits;
use crate::inflight::{
    Correlated, InFlightQueue, InstFetchInfo, ScalarMemAccessInfo, VectorMemAccessInfo,
};
use crate::protocol::{
    CpLink, CpReq, CpRsp, DispatcherLink, DispatcherMsg, MapWgReq, MapWgRsp, MemReq, MemRsp,
    PipelineFlushRsp, PipelineRestartRsp, Port, PortKind, ReqId, RequestIdGen, WgFinishMesg,
};
use crate::scheduler::Scheduler;
use crate::wavefront::{Wavefront, WfId, WfState, WgId, WorkGroup};
use crate::wg_mapper::WgMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuState {
    Normal,
    Flushing,
    Paused,
    Restarting,
}

/// One finished work-group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgCompletion {
    pub cycle: Cycle,
    pub work_group: [u32; 3],
}

/// Requests that were in flight when the pipeline drained, waiting to be
/// sent again under fresh ids.
#[derive(Debug, Default)]
struct ShadowBuffers {
    inst_fetch: VecDeque<InstFetchInfo>,
    scalar_mem: VecDeque<ScalarMemAccessInfo>,
    vector_mem: VecDeque<VectorMemAccessInfo>,
}

impl ShadowBuffers {
    fn is_empty(&self) -> bool {
        self.inst_fetch.is_empty() && self.scalar_mem.is_empty() && self.vector_mem.is_empty()
    }

    fn len(&self) -> usize {
        self.inst_fetch.len() + self.scalar_mem.len() + self.vector_mem.len()
    }
}

/// Moves everything in flight to the front of `shadow`. Entries still
/// waiting in `shadow` from an earlier drain were never re-sent and keep
/// their place behind.
fn snapshot<T: Correlated>(
    in_flight: &mut InFlightQueue<T>,
    shadow: &mut VecDeque<T>,
    superseded: &mut HashSet<ReqId>,
) {
    let mut entries = in_flight.take_all();
    for entry in entries.iter() {
        superseded.insert(entry.req_id());
    }
    entries.extend(shadow.drain(..));
    *shadow = entries;
}

/// Sends the head of `shadow` under a fresh id. Returns the wavefront of
/// the replayed entry.
fn replay_head<T: Correlated>(
    shadow: &mut VecDeque<T>,
    in_flight: &mut InFlightQueue<T>,
    port: &mut Port<MemReq>,
    req_ids: &mut RequestIdGen,
) -> Option<WfId> {
    if shadow.is_empty() || !port.can_send() {
        return None;
    }
    let mut entry = shadow.pop_front()?;
    entry.set_req_id(req_ids.next_id());
    match port.send(entry.mem_req()) {
        Ok(()) => {
            let wf = entry.wf();
            in_flight.push(entry);
            Some(wf)
        }
        Err(_) => {
            shadow.push_front(entry);
            None
        }
    }
}

fn decrement(counter: &mut usize, wf: WfId, name: &'static str) -> Result<(), SimError> {
    *counter = counter
        .checked_sub(1)
        .ok_or(SimError::CounterUnderflow { wf, counter: name })?;
    Ok(())
}

/// A GCN compute unit: wavefront pools, scheduler and execution units,
/// fed by a dispatcher and three memory ports, and drained on request of
/// the command processor.
pub struct ComputeUnit {
    name: String,
    config: CuConfig,

    pub ctx: CuContext,
    pub dispatcher: DispatcherLink,
    pub cp: CpLink,

    caps: Capabilities,
    units: ExecutionUnits,
    scheduler: Scheduler,
    wg_mapper: WgMapper,

    state: CuState,
    dispatching: Option<WgId>,
    flush_reqs: Vec<ReqId>,
    shadow: ShadowBuffers,
    superseded: HashSet<ReqId>,

    pending_to_dispatcher: VecDeque<DispatcherMsg>,
    pending_to_cp: VecDeque<CpRsp>,
    completion_log: Vec<WgCompletion>,
}

impl ComputeUnit {
    pub fn new(name: &str, config: CuConfig, caps: Capabilities) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ComputeUnit {
            name: name.to_string(),
            ctx: CuContext::new(&config),
            dispatcher: DispatcherLink::new(config.port_capacity),
            cp: CpLink::new(config.port_capacity),
            caps,
            units: ExecutionUnits::new(&config),
            scheduler: Scheduler::new(&config),
            wg_mapper: WgMapper::new(&config),
            state: CuState::Normal,
            dispatching: None,
            flush_reqs: Vec::new(),
            shadow: ShadowBuffers::default(),
            superseded: HashSet::new(),
            pending_to_dispatcher: VecDeque::new(),
            pending_to_cp: VecDeque::new(),
            completion_log: Vec::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CuConfig {
        &self.config
    }

    pub fn state(&self) -> CuState {
        self.state
    }

    pub fn completion_log(&self) -> &[WgCompletion] {
        &self.completion_log
    }

    pub fn units(&self) -> &ExecutionUnits {
        &self.units
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Requests still waiting to be re-sent after a drain.
    pub fn shadowed_requests(&self) -> usize {
        self.shadow.len()
    }

    /// Ids of drained requests whose stale responses are still expected.
    pub fn superseded_responses(&self) -> usize {
        self.superseded.len()
    }

    pub fn next_event_time(&self) -> Option<Cycle> {
        self.ctx.events.next_time()
    }

    /// Advances the unit by one cycle. Returns whether it wants another
    /// tick; `next_event_time` tells when an idle unit needs to wake up.
    pub fn tick(&mut self, now: Cycle) -> Result<bool, SimError> {
        let mut wants_tick = self.fire_events(now);

        if self.state == CuState::Normal || self.state == CuState::Flushing {
            wants_tick |= self.units.run_all(&mut self.ctx, &mut self.caps, now)?;
            wants_tick |= self
                .scheduler
                .run(&mut self.ctx, &mut self.units, &mut self.caps, now)?;
        }

        wants_tick |= self.process_input(now)?;

        match self.state {
            CuState::Flushing => {
                self.try_complete_flush(now);
                wants_tick = true;
            }
            CuState::Restarting => {
                self.restart(now);
                wants_tick = true;
            }
            CuState::Normal | CuState::Paused => {}
        }

        wants_tick |= self.send_pending();
        Ok(wants_tick)
    }

    fn fire_events(&mut self, now: Cycle) -> bool {
        let mut fired = false;
        while let Some(event) = self.ctx.events.pop_due(now) {
            fired = true;
            match event {
                CuEvent::WfDispatch { wf } => self.dispatch_wavefront(wf, now),
                CuEvent::WgMapAck { wg, map_req } => {
                    self.pending_to_dispatcher
                        .push_back(DispatcherMsg::MapWgRsp(MapWgRsp {
                            respond_to: map_req,
                            ok: true,
                        }));
                    if self.dispatching == Some(wg) {
                        self.dispatching = None;
                    }
                    debug!("{}: {} acknowledged map request {}", now, self.name, map_req);
                }
                CuEvent::WfCompletion { wf } => self.complete_wavefront(wf, now),
            }
        }
        fired
    }

    fn dispatch_wavefront(&mut self, id: WfId, now: Cycle) {
        let wf = match self.ctx.wavefronts.get_mut(id) {
            Some(wf) => wf,
            None => return,
        };
        wf.state = WfState::Ready;
        if !self.ctx.wf_pools[wf.simd_id].add(id) {
            warn!("{}: {} pool {} is full, {} not scheduled", now, self.name, wf.simd_id, id);
            return;
        }
        trace!("{}: {} dispatched to simd {}", now, id, wf.simd_id);
    }

    fn complete_wavefront(&mut self, id: WfId, now: Cycle) {
        let wg_id = match self.ctx.wavefronts.get_mut(id) {
            Some(wf) => {
                wf.state = WfState::Completed;
                wf.wg
            }
            None => return,
        };
        trace!("{}: {} completed", now, id);

        let done = match self.ctx.work_groups.get(wg_id) {
            Some(wg) => wg.all_completed(&self.ctx.wavefronts),
            None => false,
        };
        if !done {
            return;
        }

        let wg = match self.ctx.work_groups.remove(wg_id) {
            Some(wg) => wg,
            None => return,
        };
        for &wf in wg.wfs.iter() {
            for pool in self.ctx.wf_pools.iter_mut() {
                pool.remove(wf);
            }
            self.ctx.wavefronts.remove(wf);
        }
        self.scheduler.forget(&wg.wfs);
        self.wg_mapper.unmap_wg(&wg.alloc);

        self.pending_to_dispatcher
            .push_back(DispatcherMsg::WgFinish(WgFinishMesg {
                work_group: wg.id,
                map_req: wg.map_req,
            }));
        self.completion_log.push(WgCompletion {
            cycle: now,
            work_group: wg.id,
        });
        info!("{}: {} finished work-group {:?}", now, self.name, wg.id);
    }

    fn process_input(&mut self, now: Cycle) -> Result<bool, SimError> {
        let mut progress = false;
        if self.state == CuState::Normal {
            progress |= self.process_dispatcher_input(now);
        }
        if self.state != CuState::Paused {
            progress |= self.process_inst_mem_input(now)?;
            progress |= self.process_scalar_mem_input(now)?;
            progress |= self.process_vector_mem_input(now)?;
        }
        progress |= self.process_cp_input(now);
        Ok(progress)
    }

    fn process_dispatcher_input(&mut self, now: Cycle) -> bool {
        let req = match self.dispatcher.from_dispatcher.retrieve() {
            Some(req) => req,
            None => return false,
        };
        if !self.map_wg(&req, now) {
            self.pending_to_dispatcher
                .push_back(DispatcherMsg::MapWgRsp(MapWgRsp {
                    respond_to: req.id,
                    ok: false,
                }));
        }
        true
    }

    fn map_wg(&mut self, req: &MapWgReq, now: Cycle) -> bool {
        if self.dispatching.is_some() {
            debug!("{}: {} still dispatching, rejecting {}", now, self.name, req.id);
            return false;
        }
        if req.work_group.wavefronts.is_empty() {
            warn!(
                "{}: {} rejecting work-group {:?} without wavefronts",
                now, self.name, req.work_group.id
            );
            return false;
        }
        let alloc = match self.wg_mapper.map_wg(&req.work_group) {
            Some(alloc) => alloc,
            None => return false,
        };

        let desc = &req.work_group;
        let kernel = &desc.kernel;
        let lds_offset = alloc.lds_offset;
        let wf_allocs = alloc.wfs.clone();
        let wg_id = self.ctx.work_groups.insert(WorkGroup {
            id: desc.id,
            wfs: Vec::with_capacity(desc.wavefronts.len()),
            lds: vec![0; kernel.lds_size],
            map_req: req.id,
            pid: req.pid,
            alloc,
        });

        for (i, (wf_desc, wf_alloc)) in desc.wavefronts.iter().zip(wf_allocs.iter()).enumerate() {
            let mut wf = Wavefront::new(wg_id, req.pid, kernel.entry_pc);
            wf.simd_id = wf_alloc.simd_id;
            wf.first_work_item = wf_desc.first_work_item;
            wf.exec_mask = wf_desc.exec_mask;
            wf.sreg_offset = wf_alloc.sreg_offset;
            wf.vreg_offset = wf_alloc.vreg_offset;
            wf.sgpr_count = kernel.sgpr_count;
            wf.vgpr_count = kernel.vgpr_count;
            wf.lds_offset = lds_offset;
            let id = self.ctx.wavefronts.insert(wf);
            self.ctx.work_groups[wg_id].wfs.push(id);
            self.ctx
                .events
                .schedule(now + 1 + i as Cycle, CuEvent::WfDispatch { wf: id });
        }

        let n = desc.wavefronts.len();
        let latency = self.config.max_wg_dispatch_latency.max(n) as Cycle;
        self.ctx.events.schedule(
            now + latency,
            CuEvent::WgMapAck {
                wg: wg_id,
                map_req: req.id,
            },
        );
        self.dispatching = Some(wg_id);
        info!(
            "{}: {} mapped work-group {:?} as {} with {} wavefronts",
            now, self.name, desc.id, wg_id, n
        );
        true
    }

    /// Drops a response to a request that was replayed under a new id.
    fn drop_superseded(&mut self, port: PortKind, respond_to: ReqId, now: Cycle) -> bool {
        if self.superseded.remove(&respond_to) {
            debug!("{}: {} dropped superseded {} response {}", now, self.name, port, respond_to);
            true
        } else {
            false
        }
    }

    fn process_inst_mem_input(&mut self, now: Cycle) -> Result<bool, SimError> {
        let rsp = match self.ctx.inst_mem.from_mem.retrieve() {
            Some(rsp) => rsp,
            None => return Ok(false),
        };
        let respond_to = rsp.respond_to();
        if self.drop_superseded(PortKind::InstMem, respond_to, now) {
            return Ok(true);
        }

        let info = self.ctx.in_flight_inst_fetch.pop_matching(respond_to)?;
        let data = match rsp {
            MemRsp::DataReady(rsp) => rsp.data,
            other => {
                return Err(SimError::WrongResponseKind {
                    port: PortKind::InstMem,
                    respond_to,
                    got: other.kind_name(),
                })
            }
        };

        let wf = match self.ctx.wavefronts.get_mut(info.wf) {
            Some(wf) => wf,
            None => return Ok(true),
        };
        wf.is_fetching = false;
        wf.last_fetch_time = now;
        if info.address == wf.inst_buffer_end() {
            wf.inst_buffer.extend_from_slice(&data);
            debug!("{}: {} fetched {:#x}", now, info.wf, info.address);
        } else {
            debug!(
                "{}: {} discarded fetch of {:#x}, buffer now ends at {:#x}",
                now,
                info.wf,
                info.address,
                wf.inst_buffer_end()
            );
        }
        Ok(true)
    }

    fn process_scalar_mem_input(&mut self, now: Cycle) -> Result<bool, SimError> {
        let rsp = match self.ctx.scalar_mem.from_mem.retrieve() {
            Some(rsp) => rsp,
            None => return Ok(false),
        };
        let respond_to = rsp.respond_to();
        if self.drop_superseded(PortKind::ScalarMem, respond_to, now) {
            return Ok(true);
        }

        let info = self.ctx.in_flight_scalar_mem.pop_matching(respond_to)?;
        let data = match rsp {
            MemRsp::DataReady(rsp) => rsp.data,
            other => {
                return Err(SimError::WrongResponseKind {
                    port: PortKind::ScalarMem,
                    respond_to,
                    got: other.kind_name(),
                })
            }
        };

        let ctx = &mut self.ctx;
        let wf = match ctx.wavefronts.get_mut(info.wf) {
            Some(wf) => wf,
            None => return Ok(true),
        };
        ctx.regs.write_sgprs(wf, info.dst_sgpr, data);
        decrement(&mut wf.outstanding_scalar_mem_access, info.wf, "scalar")?;
        debug!("{}: {} scalar load at {:#x} returned", now, info.wf, info.pc);
        Ok(true)
    }

    fn process_vector_mem_input(&mut self, now: Cycle) -> Result<bool, SimError> {
        let rsp = match self.ctx.vector_mem.from_mem.retrieve() {
            Some(rsp) => rsp,
            None => return Ok(false),
        };
        let respond_to = rsp.respond_to();
        if self.drop_superseded(PortKind::VectorMem, respond_to, now) {
            return Ok(true);
        }

        let info = self.ctx.in_flight_vector_mem.pop_matching(respond_to)?;
        let ctx = &mut self.ctx;
        let wf = match ctx.wavefronts.get_mut(info.wf) {
            Some(wf) => wf,
            None => return Ok(true),
        };

        match (&info.req, rsp) {
            (MemReq::Read(_), MemRsp::DataReady(rsp)) => {
                for lane in info.lanes.iter() {
                    let bytes = if info.bytes_per_lane < 4 {
                        get_u32_zext(&rsp.data, lane.offset, info.bytes_per_lane)
                            .to_le_bytes()
                            .to_vec()
                    } else {
                        let end = (lane.offset + info.bytes_per_lane).min(rsp.data.len());
                        rsp.data[lane.offset.min(end)..end].to_vec()
                    };
                    ctx.regs.write_vgprs(wf, lane.lane, info.dst_vgpr, bytes);
                }
            }
            (MemReq::Write(_), MemRsp::WriteDone(_)) => {}
            (_, other) => {
                return Err(SimError::WrongResponseKind {
                    port: PortKind::VectorMem,
                    respond_to,
                    got: other.kind_name(),
                })
            }
        }

        if info.is_last {
            decrement(&mut wf.outstanding_vector_mem_access, info.wf, "vector")?;
            if info.is_flat {
                decrement(&mut wf.outstanding_scalar_mem_access, info.wf, "scalar")?;
            }
        }
        debug!("{}: {} vector response {} ({} lanes)", now, info.wf, respond_to, info.lanes.len());
        Ok(true)
    }

    fn process_cp_input(&mut self, now: Cycle) -> bool {
        let req = match self.cp.from_cp.retrieve() {
            Some(req) => req,
            None => return false,
        };
        match req {
            CpReq::Flush(req) => match self.state {
                CuState::Normal | CuState::Restarting => {
                    self.scheduler.pause();
                    self.flush_reqs.push(req.id);
                    self.state = CuState::Flushing;
                    info!("{}: {} flushing pipeline", now, self.name);
                }
                CuState::Paused => {
                    warn!("{}: {} already drained, acknowledging flush {}", now, self.name, req.id);
                    self.pending_to_cp
                        .push_back(CpRsp::Flush(PipelineFlushRsp { respond_to: req.id }));
                }
                CuState::Flushing => {
                    debug!("{}: {} flush {} joins the drain in progress", now, self.name, req.id);
                    self.flush_reqs.push(req.id);
                }
            },
            CpReq::Restart(req) => {
                self.pending_to_cp
                    .push_back(CpRsp::Restart(PipelineRestartRsp { respond_to: req.id }));
                if self.state == CuState::Paused {
                    self.state = CuState::Restarting;
                    info!(
                        "{}: {} restarting, {} requests to replay",
                        now,
                        self.name,
                        self.shadow.len()
                    );
                } else {
                    warn!("{}: {} restart {} while {:?}", now, self.name, req.id, self.state);
                }
            }
        }
        true
    }

    fn is_quiescent(&self) -> bool {
        self.units.all_idle()
            && self.scheduler.internal_executing().is_none()
            && self.ctx.events.is_empty()
            && self.pending_to_dispatcher.is_empty()
    }

    fn try_complete_flush(&mut self, now: Cycle) {
        if !self.is_quiescent() {
            return;
        }

        let ctx = &mut self.ctx;
        snapshot(
            &mut ctx.in_flight_inst_fetch,
            &mut self.shadow.inst_fetch,
            &mut self.superseded,
        );
        snapshot(
            &mut ctx.in_flight_scalar_mem,
            &mut self.shadow.scalar_mem,
            &mut self.superseded,
        );
        snapshot(
            &mut ctx.in_flight_vector_mem,
            &mut self.shadow.vector_mem,
            &mut self.superseded,
        );

        let ids: Vec<WfId> = ctx.wavefronts.iter().map(|(id, _)| id).collect();
        for id in ids {
            let wf = &mut ctx.wavefronts[id];
            match wf.state {
                WfState::Completed | WfState::AtBarrier => {}
                _ => wf.state = WfState::Ready,
            }
            wf.is_fetching = false;
        }

        self.scheduler.flush();
        self.units.flush_all();

        for id in self.flush_reqs.drain(..) {
            self.pending_to_cp
                .push_back(CpRsp::Flush(PipelineFlushRsp { respond_to: id }));
        }
        self.state = CuState::Paused;
        info!(
            "{}: {} drained, {} requests shadowed",
            now,
            self.name,
            self.shadow.len()
        );
    }

    fn restart(&mut self, now: Cycle) {
        if self.shadow.is_empty() {
            self.scheduler.resume();
            self.state = CuState::Normal;
            info!("{}: {} resumed", now, self.name);
            return;
        }

        let ctx = &mut self.ctx;
        if let Some(id) = replay_head(
            &mut self.shadow.inst_fetch,
            &mut ctx.in_flight_inst_fetch,
            &mut ctx.inst_mem.to_mem,
            &mut ctx.req_ids,
        ) {
            if let Some(wf) = ctx.wavefronts.get_mut(id) {
                wf.is_fetching = true;
            }
            trace!("{}: replayed fetch for {}", now, id);
        }
        if let Some(id) = replay_head(
            &mut self.shadow.scalar_mem,
            &mut ctx.in_flight_scalar_mem,
            &mut ctx.scalar_mem.to_mem,
            &mut ctx.req_ids,
        ) {
            trace!("{}: replayed scalar access for {}", now, id);
        }
        if let Some(id) = replay_head(
            &mut self.shadow.vector_mem,
            &mut ctx.in_flight_vector_mem,
            &mut ctx.vector_mem.to_mem,
            &mut ctx.req_ids,
        ) {
            trace!("{}: replayed vector access for {}", now, id);
        }
    }

    fn send_pending(&mut self) -> bool {
        let mut sent = false;
        while let Some(msg) = self.pending_to_dispatcher.pop_front() {
            if let Err(msg) = self.dispatcher.to_dispatcher.send(msg) {
                self.pending_to_dispatcher.push_front(msg);
                break;
            }
            sent = true;
        }
        while let Some(rsp) = self.pending_to_cp.pop_front() {
            if let Err(rsp) = self.cp.to_cp.send(rsp) {
                self.pending_to_cp.push_front(rsp);
                break;
            }
            sent = true;
        }
        sent || !self.pending_to_dispatcher.is_empty() || !self.pending_to_cp.is_empty()
    }
}

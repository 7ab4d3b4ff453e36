#![allow(dead_code)]

use gcn_cu_timing::alu::{NullAlu, StridedPreparer};
use gcn_cu_timing::compute_unit::ComputeUnit;
use gcn_cu_timing::config::CuConfig;
use gcn_cu_timing::context::Capabilities;
use gcn_cu_timing::decoder::FormatDecoder;
use gcn_cu_timing::error::SimError;
use gcn_cu_timing::event::Cycle;
use gcn_cu_timing::fixed_memory::FixedLatencyMemory;
use gcn_cu_timing::kernel::{KernelInfo, WorkGroupDesc};
use gcn_cu_timing::protocol::{
    CpReq, CpRsp, DispatcherMsg, MapWgReq, MapWgRsp, Pid, ReqId, WgFinishMesg,
};

pub const ENTRY_PC: u64 = 0x100;
pub const DATA_ADDRESS: u64 = 0x4000;
const MEMORY_SIZE: usize = 0x10000;

const S_LOAD_DWORDX2: [u32; 2] = [0xC006_0100, 0x0000_0000];
const S_WAITCNT_ZERO: u32 = 0xBF8C_0070;
const FLAT_LOAD_DWORD: [u32; 2] = [0xDC50_0000, 0x0300_0001];
const V_ADD_F32: u32 = 0x0206_0703;
const DS_WRITE_B32: [u32; 2] = [0xD81A_0000, 0x0000_0300];
const S_BARRIER: u32 = 0xBF8A_0000;
const FLAT_STORE_DWORD: [u32; 2] = [0xDC70_0000, 0x0000_0301];
const S_ENDPGM: u32 = 0xBF81_0000;

/// A kernel touching every unit, with `valu_ops` vector ALU instructions
/// before its barrier. Returns the words and the barrier's byte offset.
pub fn program(valu_ops: usize) -> (Vec<u32>, u64) {
    let mut words = Vec::new();
    words.extend_from_slice(&S_LOAD_DWORDX2);
    words.push(S_WAITCNT_ZERO);
    words.extend_from_slice(&FLAT_LOAD_DWORD);
    words.push(S_WAITCNT_ZERO);
    for _ in 0..valu_ops {
        words.push(V_ADD_F32);
    }
    words.extend_from_slice(&DS_WRITE_B32);
    let barrier_offset = words.len() as u64 * 4;
    words.push(S_BARRIER);
    words.push(V_ADD_F32);
    words.extend_from_slice(&FLAT_STORE_DWORD);
    words.push(S_WAITCNT_ZERO);
    words.push(S_ENDPGM);
    (words, barrier_offset)
}

pub struct Harness {
    pub cu: ComputeUnit,
    pub inst_mem: FixedLatencyMemory,
    pub scalar_mem: FixedLatencyMemory,
    pub vector_mem: FixedLatencyMemory,
    pub kernel: KernelInfo,
    pub now: Cycle,
    pub finished: Vec<WgFinishMesg>,
    pub map_rsps: Vec<MapWgRsp>,
    pub cp_rsps: Vec<CpRsp>,
}

impl Harness {
    pub fn new(config: CuConfig, words: &[u32], latency: Cycle) -> Self {
        let wavefront_size = config.wavefront_size;
        let caps = Capabilities {
            decoder: Box::new(FormatDecoder::new()),
            alu: Box::new(NullAlu),
            preparer: Box::new(StridedPreparer {
                base: DATA_ADDRESS,
                stride: 4,
                wavefront_size,
            }),
        };
        let cu = ComputeUnit::new("cu-test", config, caps).unwrap();

        let code: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect();
        let mut inst_mem = FixedLatencyMemory::new(MEMORY_SIZE, latency);
        inst_mem.load(ENTRY_PC, &code);

        Harness {
            cu,
            inst_mem,
            scalar_mem: FixedLatencyMemory::new(MEMORY_SIZE, latency),
            vector_mem: FixedLatencyMemory::new(MEMORY_SIZE, latency),
            kernel: KernelInfo {
                entry_pc: ENTRY_PC,
                sgpr_count: 16,
                vgpr_count: 8,
                lds_size: 1024,
            },
            now: 0,
            finished: Vec::new(),
            map_rsps: Vec::new(),
            cp_rsps: Vec::new(),
        }
    }

    pub fn map(&mut self, id: ReqId, x: u32, wavefronts: usize) {
        let wavefront_size = self.cu.config().wavefront_size;
        let req = MapWgReq {
            id,
            work_group: WorkGroupDesc::new(
                [x, 0, 0],
                self.kernel.clone(),
                wavefronts * wavefront_size,
                wavefront_size,
            ),
            pid: Pid(1),
        };
        assert!(self.cu.dispatcher.from_dispatcher.send(req).is_ok());
    }

    pub fn send_cp(&mut self, req: CpReq) {
        assert!(self.cu.cp.from_cp.send(req).is_ok());
    }

    pub fn tick(&mut self) -> Result<(), SimError> {
        let now = self.now;
        self.cu.tick(now)?;
        self.inst_mem.tick(&mut self.cu.ctx.inst_mem, now);
        self.scalar_mem.tick(&mut self.cu.ctx.scalar_mem, now);
        self.vector_mem.tick(&mut self.cu.ctx.vector_mem, now);

        while let Some(msg) = self.cu.dispatcher.to_dispatcher.retrieve() {
            match msg {
                DispatcherMsg::MapWgRsp(rsp) => self.map_rsps.push(rsp),
                DispatcherMsg::WgFinish(msg) => self.finished.push(msg),
            }
        }
        while let Some(rsp) = self.cu.cp.to_cp.retrieve() {
            self.cp_rsps.push(rsp);
        }
        self.now += 1;
        Ok(())
    }

    /// Ticks until `done` holds. Returns false if `max_cycles` ran out first.
    pub fn run_until<F: FnMut(&Harness) -> bool>(
        &mut self,
        max_cycles: Cycle,
        mut done: F,
    ) -> Result<bool, SimError> {
        let end = self.now + max_cycles;
        while self.now < end {
            if done(self) {
                return Ok(true);
            }
            self.tick()?;
        }
        Ok(done(self))
    }

    /// Maps `count` work-groups one after another, retrying rejected
    /// requests, and runs until all of them finished.
    pub fn run_work_groups(
        &mut self,
        count: usize,
        wavefronts: usize,
        max_cycles: Cycle,
    ) -> Result<bool, SimError> {
        let end = self.now + max_cycles;
        let mut next = 0;
        let mut next_id: ReqId = 100;
        let mut waiting: Option<ReqId> = None;
        while self.finished.len() < count && self.now < end {
            if let Some(id) = waiting {
                if let Some(rsp) = self.map_rsps.iter().find(|rsp| rsp.respond_to == id) {
                    if rsp.ok {
                        next += 1;
                    }
                    waiting = None;
                }
            }
            if waiting.is_none() && next < count {
                next_id += 1;
                self.map(next_id, next as u32, wavefronts);
                waiting = Some(next_id);
            }
            self.tick()?;
        }
        Ok(self.finished.len() >= count)
    }
}

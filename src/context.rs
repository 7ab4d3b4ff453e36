use crate::alu::{Alu, ScratchpadPreparer};
use crate::config::CuConfig;
use crate::event::EventQueue;
use crate::inflight::{InFlightQueue, InstFetchInfo, ScalarMemAccessInfo, VectorMemAccessInfo};
use crate::insts::Decoder;
use crate::protocol::{MemLink, PortKind, RequestIdGen};
use crate::register_file::RegisterFiles;
use crate::wavefront::{WavefrontPool, Wavefronts, WorkGroups};

/// State shared by the scheduler and the execution units.
pub struct CuContext {
    pub wavefronts: Wavefronts,
    pub work_groups: WorkGroups,
    pub wf_pools: Vec<WavefrontPool>,
    pub regs: RegisterFiles,

    pub inst_mem: MemLink,
    pub scalar_mem: MemLink,
    pub vector_mem: MemLink,
    pub in_flight_inst_fetch: InFlightQueue<InstFetchInfo>,
    pub in_flight_scalar_mem: InFlightQueue<ScalarMemAccessInfo>,
    pub in_flight_vector_mem: InFlightQueue<VectorMemAccessInfo>,

    pub req_ids: RequestIdGen,
    pub events: EventQueue,
}

impl CuContext {
    pub fn new(config: &CuConfig) -> Self {
        CuContext {
            wavefronts: Wavefronts::new(),
            work_groups: WorkGroups::new(),
            wf_pools: (0..config.num_wf_pools)
                .map(|_| WavefrontPool::new(config.wf_pool_size))
                .collect(),
            regs: RegisterFiles::new(config),
            inst_mem: MemLink::new(config.port_capacity),
            scalar_mem: MemLink::new(config.port_capacity),
            vector_mem: MemLink::new(config.port_capacity),
            in_flight_inst_fetch: InFlightQueue::new(PortKind::InstMem),
            in_flight_scalar_mem: InFlightQueue::new(PortKind::ScalarMem),
            in_flight_vector_mem: InFlightQueue::new(PortKind::VectorMem),
            req_ids: RequestIdGen::new(),
            events: EventQueue::new(),
        }
    }
}

/// Functional collaborators plugged into the timing model.
pub struct Capabilities {
    pub decoder: Box<dyn Decoder>,
    pub alu: Box<dyn Alu>,
    pub preparer: Box<dyn ScratchpadPreparer>,
}

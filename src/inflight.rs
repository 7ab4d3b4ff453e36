//! Per-port FIFO queues that correlate memory responses with the requests
//! that caused them.

use std::collections::VecDeque;

use crate::coalescer::LaneAccess;
use crate::error::SimError;
use crate::protocol::{MemReq, PortKind, ReadReq, ReqId};
use crate::wavefront::WfId;

pub trait Correlated {
    fn req_id(&self) -> ReqId;
    fn set_req_id(&mut self, id: ReqId);
    fn wf(&self) -> WfId;
    /// The request as it goes on the port.
    fn mem_req(&self) -> MemReq;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstFetchInfo {
    pub req: ReadReq,
    pub wf: WfId,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarMemAccessInfo {
    pub req: ReadReq,
    pub wf: WfId,
    pub dst_sgpr: usize,
    pub pc: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMemAccessInfo {
    pub req: MemReq,
    pub wf: WfId,
    pub lanes: Vec<LaneAccess>,
    pub dst_vgpr: usize,
    pub reg_count: usize,
    pub bytes_per_lane: usize,
    /// Last request of its instruction; its response retires the
    /// instruction's counter.
    pub is_last: bool,
    /// FLAT accesses also count against the lgkm counter.
    pub is_flat: bool,
}

impl Correlated for InstFetchInfo {
    fn req_id(&self) -> ReqId {
        self.req.id
    }

    fn set_req_id(&mut self, id: ReqId) {
        self.req.id = id;
    }

    fn wf(&self) -> WfId {
        self.wf
    }

    fn mem_req(&self) -> MemReq {
        MemReq::Read(self.req.clone())
    }
}

impl Correlated for ScalarMemAccessInfo {
    fn req_id(&self) -> ReqId {
        self.req.id
    }

    fn set_req_id(&mut self, id: ReqId) {
        self.req.id = id;
    }

    fn wf(&self) -> WfId {
        self.wf
    }

    fn mem_req(&self) -> MemReq {
        MemReq::Read(self.req.clone())
    }
}

impl Correlated for VectorMemAccessInfo {
    fn req_id(&self) -> ReqId {
        self.req.id()
    }

    fn set_req_id(&mut self, id: ReqId) {
        self.req.set_id(id);
    }

    fn wf(&self) -> WfId {
        self.wf
    }

    fn mem_req(&self) -> MemReq {
        self.req.clone()
    }
}

#[derive(Debug)]
pub struct InFlightQueue<T> {
    port: PortKind,
    entries: VecDeque<T>,
}

impl<T: Correlated> InFlightQueue<T> {
    pub fn new(port: PortKind) -> Self {
        InFlightQueue {
            port,
            entries: VecDeque::new(),
        }
    }

    pub fn port(&self) -> PortKind {
        self.port
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    /// Responses arrive in request order, so only the oldest entry may
    /// match.
    pub fn pop_matching(&mut self, respond_to: ReqId) -> Result<T, SimError> {
        let head = match self.entries.front() {
            Some(head) => head,
            None => {
                return Err(SimError::UnexpectedResponse {
                    port: self.port,
                    respond_to,
                })
            }
        };
        if head.req_id() != respond_to {
            return Err(SimError::ResponseMismatch {
                port: self.port,
                respond_to,
                expected: head.req_id(),
                wf: head.wf(),
                depth: self.entries.len(),
            });
        }
        self.entries.pop_front().ok_or(SimError::UnexpectedResponse {
            port: self.port,
            respond_to,
        })
    }

    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn take_all(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

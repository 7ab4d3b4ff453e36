//! Messages exchanged with the dispatcher, the memory hierarchy and the
//! command processor, and the bounded ports that carry them.

use std::collections::VecDeque;
use std::fmt;

use crate::kernel::WorkGroupDesc;

pub type ReqId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pid(pub u32);

#[derive(Debug, Default)]
pub struct RequestIdGen {
    next: ReqId,
}

impl RequestIdGen {
    pub fn new() -> Self {
        RequestIdGen::default()
    }

    pub fn next_id(&mut self) -> ReqId {
        self.next += 1;
        self.next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    InstMem,
    ScalarMem,
    VectorMem,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::InstMem => "instruction memory",
            PortKind::ScalarMem => "scalar memory",
            PortKind::VectorMem => "vector memory",
        };
        f.write_str(name)
    }
}

/// Bounded FIFO. A full port refuses a message and hands it back.
#[derive(Debug)]
pub struct Port<T> {
    capacity: usize,
    buf: VecDeque<T>,
}

impl<T> Port<T> {
    pub fn new(capacity: usize) -> Self {
        Port {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    pub fn can_send(&self) -> bool {
        self.buf.len() < self.capacity
    }

    pub fn send(&mut self, msg: T) -> Result<(), T> {
        if !self.can_send() {
            return Err(msg);
        }
        self.buf.push_back(msg);
        Ok(())
    }

    pub fn peek(&self) -> Option<&T> {
        self.buf.front()
    }

    pub fn retrieve(&mut self) -> Option<T> {
        self.buf.pop_front()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReq {
    pub id: ReqId,
    pub address: u64,
    pub byte_size: u64,
    pub pid: Pid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReq {
    pub id: ReqId,
    pub address: u64,
    pub data: Vec<u8>,
    pub dirty_mask: Vec<bool>,
    pub pid: Pid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemReq {
    Read(ReadReq),
    Write(WriteReq),
}

impl MemReq {
    pub fn id(&self) -> ReqId {
        match self {
            MemReq::Read(r) => r.id,
            MemReq::Write(w) => w.id,
        }
    }

    pub fn set_id(&mut self, id: ReqId) {
        match self {
            MemReq::Read(r) => r.id = id,
            MemReq::Write(w) => w.id = id,
        }
    }

    pub fn address(&self) -> u64 {
        match self {
            MemReq::Read(r) => r.address,
            MemReq::Write(w) => w.address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReadyRsp {
    pub respond_to: ReqId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDoneRsp {
    pub respond_to: ReqId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemRsp {
    DataReady(DataReadyRsp),
    WriteDone(WriteDoneRsp),
}

impl MemRsp {
    pub fn respond_to(&self) -> ReqId {
        match self {
            MemRsp::DataReady(r) => r.respond_to,
            MemRsp::WriteDone(r) => r.respond_to,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            MemRsp::DataReady(_) => "data-ready response",
            MemRsp::WriteDone(_) => "write-done response",
        }
    }
}

/// Both directions of one memory port, seen from the compute unit.
#[derive(Debug)]
pub struct MemLink {
    pub to_mem: Port<MemReq>,
    pub from_mem: Port<MemRsp>,
}

impl MemLink {
    pub fn new(capacity: usize) -> Self {
        MemLink {
            to_mem: Port::new(capacity),
            from_mem: Port::new(capacity),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapWgReq {
    pub id: ReqId,
    pub work_group: WorkGroupDesc,
    pub pid: Pid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapWgRsp {
    pub respond_to: ReqId,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgFinishMesg {
    /// Work-group coordinates from the dispatch descriptor.
    pub work_group: [u32; 3],
    /// The map request that placed the work-group on this unit.
    pub map_req: ReqId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherMsg {
    MapWgRsp(MapWgRsp),
    WgFinish(WgFinishMesg),
}

#[derive(Debug)]
pub struct DispatcherLink {
    pub from_dispatcher: Port<MapWgReq>,
    pub to_dispatcher: Port<DispatcherMsg>,
}

impl DispatcherLink {
    pub fn new(capacity: usize) -> Self {
        DispatcherLink {
            from_dispatcher: Port::new(capacity),
            to_dispatcher: Port::new(capacity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFlushReq {
    pub id: ReqId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRestartReq {
    pub id: ReqId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpReq {
    Flush(PipelineFlushReq),
    Restart(PipelineRestartReq),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFlushRsp {
    pub respond_to: ReqId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRestartRsp {
    pub respond_to: ReqId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpRsp {
    Flush(PipelineFlushRsp),
    Restart(PipelineRestartRsp),
}

#[derive(Debug)]
pub struct CpLink {
    pub from_cp: Port<CpReq>,
    pub to_cp: Port<CpRsp>,
}

impl CpLink {
    pub fn new(capacity: usize) -> Self {
        CpLink {
            from_cp: Port::new(capacity),
            to_cp: Port::new(capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_port_hands_message_back() {
        let mut port = Port::new(2);
        assert_eq!(port.send(1), Ok(()));
        assert_eq!(port.send(2), Ok(()));
        assert!(!port.can_send());
        assert_eq!(port.send(3), Err(3));
        assert_eq!(port.len(), 2);
        assert_eq!(port.peek(), Some(&1));
        assert_eq!(port.retrieve(), Some(1));
        assert!(port.can_send());
    }

    #[test]
    fn request_ids_are_unique_and_nonzero() {
        let mut ids = RequestIdGen::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn mem_req_id_can_be_reassigned() {
        let mut req = MemReq::Read(ReadReq {
            id: 7,
            address: 0x40,
            byte_size: 64,
            pid: Pid(1),
        });
        req.set_id(9);
        assert_eq!(req.id(), 9);
        assert_eq!(req.address(), 0x40);
    }
}

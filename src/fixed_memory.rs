use std::collections::VecDeque;

use log::trace;

use crate::event::Cycle;
use crate::protocol::{DataReadyRsp, MemLink, MemReq, MemRsp, WriteDoneRsp};

/// Flat byte-addressed memory answering every request a fixed number of
/// cycles after it is taken off the port, in arrival order. Addresses past
/// the end read as zero and ignore writes.
#[derive(Debug)]
pub struct FixedLatencyMemory {
    storage: Vec<u8>,
    latency: Cycle,
    pending: VecDeque<(Cycle, MemRsp)>,
}

impl FixedLatencyMemory {
    pub fn new(size: usize, latency: Cycle) -> Self {
        FixedLatencyMemory {
            storage: vec![0; size],
            latency,
            pending: VecDeque::new(),
        }
    }

    pub fn load(&mut self, address: u64, bytes: &[u8]) {
        let start = address as usize;
        let end = (start + bytes.len()).min(self.storage.len());
        if start < end {
            self.storage[start..end].copy_from_slice(&bytes[..end - start]);
        }
    }

    pub fn read(&self, address: u64, size: usize) -> Vec<u8> {
        let mut data = vec![0; size];
        let start = address as usize;
        let end = (start + size).min(self.storage.len());
        if start < end {
            data[..end - start].copy_from_slice(&self.storage[start..end]);
        }
        data
    }

    fn write(&mut self, address: u64, data: &[u8], dirty_mask: &[bool]) {
        for (i, (&byte, &dirty)) in data.iter().zip(dirty_mask.iter()).enumerate() {
            let addr = address as usize + i;
            if dirty && addr < self.storage.len() {
                self.storage[addr] = byte;
            }
        }
    }

    pub fn pending_responses(&self) -> usize {
        self.pending.len()
    }

    /// Takes at most one request and delivers at most one due response.
    /// Returns whether anything is still outstanding.
    pub fn tick(&mut self, link: &mut MemLink, now: Cycle) -> bool {
        let due = matches!(self.pending.front(), Some((ready, _)) if *ready <= now);
        if due && link.from_mem.can_send() {
            if let Some((_, rsp)) = self.pending.pop_front() {
                trace!("{}: memory responds to {}", now, rsp.respond_to());
                if let Err(rsp) = link.from_mem.send(rsp) {
                    self.pending.push_front((now, rsp));
                }
            }
        }

        if let Some(req) = link.to_mem.retrieve() {
            let rsp = match req {
                MemReq::Read(req) => MemRsp::DataReady(DataReadyRsp {
                    respond_to: req.id,
                    data: self.read(req.address, req.byte_size as usize),
                }),
                MemReq::Write(req) => {
                    self.write(req.address, &req.data, &req.dirty_mask);
                    MemRsp::WriteDone(WriteDoneRsp { respond_to: req.id })
                }
            };
            self.pending.push_back((now + self.latency, rsp));
        }

        !self.pending.is_empty() || !link.to_mem.is_empty()
    }
}

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::protocol::ReqId;
use crate::wavefront::{WfId, WgId};

pub type Cycle = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CuEvent {
    /// A wavefront of a freshly mapped work-group becomes schedulable.
    WfDispatch { wf: WfId },
    /// Every wavefront of the work-group has been dispatched; acknowledge
    /// the map request.
    WgMapAck { wg: WgId, map_req: ReqId },
    WfCompletion { wf: WfId },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    time: Cycle,
    seq: u64,
    event: CuEvent,
}

impl Ord for Scheduled {
    // Min-heap on (time, insertion order).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn schedule(&mut self, time: Cycle, event: CuEvent) {
        self.seq += 1;
        self.heap.push(Scheduled {
            time,
            seq: self.seq,
            event,
        });
    }

    /// Removes and returns the earliest event due at or before `now`.
    pub fn pop_due(&mut self, now: Cycle) -> Option<CuEvent> {
        match self.heap.peek() {
            Some(next) if next.time <= now => self.heap.pop().map(|s| s.event),
            _ => None,
        }
    }

    pub fn next_time(&self) -> Option<Cycle> {
        self.heap.peek().map(|s| s.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

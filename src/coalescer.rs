use crate::bit::align_down;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneAccess {
    pub lane: usize,
    /// Byte offset of this lane's data inside the request.
    pub offset: usize,
}

/// One memory request covering the lanes listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedAccess {
    pub address: u64,
    pub byte_size: u64,
    pub lanes: Vec<LaneAccess>,
}

pub trait Coalescer {
    fn coalesce(&self, addresses: &[u64], exec_mask: u64, bytes_per_lane: usize)
        -> Vec<CoalescedAccess>;
}

/// Merges consecutive active lanes whose accesses fall in the same cache
/// line into one line-sized request. A lane whose access crosses a line
/// boundary gets a request of its own.
#[derive(Debug, Clone, Copy)]
pub struct DefaultCoalescer {
    line_size: u64,
}

impl DefaultCoalescer {
    pub fn new(line_size: usize) -> Self {
        DefaultCoalescer {
            line_size: line_size as u64,
        }
    }
}

impl Coalescer for DefaultCoalescer {
    fn coalesce(
        &self,
        addresses: &[u64],
        exec_mask: u64,
        bytes_per_lane: usize,
    ) -> Vec<CoalescedAccess> {
        let mut accesses: Vec<CoalescedAccess> = Vec::new();
        let size = bytes_per_lane as u64;

        for (lane, &address) in addresses.iter().enumerate().take(64) {
            if exec_mask & (1u64 << lane) == 0 {
                continue;
            }

            let line = align_down(address, self.line_size);
            if address + size > line + self.line_size {
                accesses.push(CoalescedAccess {
                    address,
                    byte_size: size,
                    lanes: vec![LaneAccess { lane, offset: 0 }],
                });
                continue;
            }

            let offset = (address - line) as usize;
            match accesses.last_mut() {
                Some(last) if last.address == line && last.byte_size == self.line_size => {
                    last.lanes.push(LaneAccess { lane, offset });
                }
                _ => accesses.push(CoalescedAccess {
                    address: line,
                    byte_size: self.line_size,
                    lanes: vec![LaneAccess { lane, offset }],
                }),
            }
        }
        accesses
    }
}

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use crate::event::Cycle;
use crate::insts::Inst;
use crate::protocol::{Pid, ReqId};
use crate::wg_mapper::WgAllocation;

/// Arena handle: slot index in the low 32 bits, slot generation above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WfId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WgId(pub u64);

const INDEX_BITS: u32 = 32;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

fn pack(index: usize, generation: u32) -> u64 {
    (u64::from(generation) << INDEX_BITS) | (index as u64 & INDEX_MASK)
}

fn fmt_handle(f: &mut fmt::Formatter<'_>, prefix: &str, raw: u64) -> fmt::Result {
    let generation = raw >> INDEX_BITS;
    if generation == 0 {
        write!(f, "{}{}", prefix, raw & INDEX_MASK)
    } else {
        write!(f, "{}{}.{}", prefix, raw & INDEX_MASK, generation)
    }
}

impl fmt::Display for WfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_handle(f, "wf", self.0)
    }
}

impl fmt::Display for WgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_handle(f, "wg", self.0)
    }
}

pub trait ArenaKey: Copy {
    fn new(index: usize, generation: u32) -> Self;
    fn raw(self) -> u64;

    fn index(self) -> usize {
        (self.raw() & INDEX_MASK) as usize
    }

    fn generation(self) -> u32 {
        (self.raw() >> INDEX_BITS) as u32
    }
}

impl ArenaKey for WfId {
    fn new(index: usize, generation: u32) -> Self {
        WfId(pack(index, generation))
    }

    fn raw(self) -> u64 {
        self.0
    }
}

impl ArenaKey for WgId {
    fn new(index: usize, generation: u32) -> Self {
        WgId(pack(index, generation))
    }

    fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with a free list. Removing a value bumps its slot's
/// generation, so an id held past removal misses instead of reaching the
/// record that later reuses the slot.
#[derive(Debug)]
pub struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            return K::new(index, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        K::new(self.slots.len() - 1, 0)
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation() {
            return None;
        }
        let taken = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.live -= 1;
        Some(taken)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots allocated so far, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::new(i, slot.generation), value))
        })
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Arena::new()
    }
}

impl<K: ArenaKey + fmt::Debug, T> Index<K> for Arena<K, T> {
    type Output = T;

    fn index(&self, key: K) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => panic!("stale arena id {:?}", key),
        }
    }
}

impl<K: ArenaKey + fmt::Debug, T> IndexMut<K> for Arena<K, T> {
    fn index_mut(&mut self, key: K) -> &mut T {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("stale arena id {:?}", key),
        }
    }
}

pub type Wavefronts = Arena<WfId, Wavefront>;
pub type WorkGroups = Arena<WgId, WorkGroup>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WfState {
    Dispatching,
    Ready,
    AtBarrier,
    Running,
    Completed,
}

/// Per-instruction staging area filled by the scratchpad preparer.
/// `raw` holds operands in whatever layout the ALU expects; the other
/// fields are read by the memory units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scratchpad {
    pub raw: Vec<u8>,
    pub lane_addresses: Vec<u64>,
    /// `reg_count` dwords per lane for stores.
    pub lane_data: Vec<u32>,
    pub scalar_address: u64,
}

impl Scratchpad {
    pub fn clear(&mut self) {
        self.raw.clear();
        self.lane_addresses.clear();
        self.lane_data.clear();
        self.scalar_address = 0;
    }
}

#[derive(Debug, Clone)]
pub struct Wavefront {
    pub wg: WgId,
    pub pid: Pid,
    pub simd_id: usize,
    pub first_work_item: usize,
    pub pc: u64,
    pub exec_mask: u64,
    pub state: WfState,

    pub inst_buffer: Vec<u8>,
    pub inst_buffer_start_pc: u64,
    pub inst_to_issue: Option<Inst>,
    pub inst: Option<Inst>,
    pub is_fetching: bool,
    pub last_fetch_time: Cycle,

    pub outstanding_scalar_mem_access: usize,
    pub outstanding_vector_mem_access: usize,

    /// Byte offsets into the scalar and vector register files.
    pub sreg_offset: usize,
    pub vreg_offset: usize,
    pub sgpr_count: usize,
    pub vgpr_count: usize,
    pub lds_offset: usize,

    pub scratchpad: Scratchpad,
}

impl Wavefront {
    pub fn new(wg: WgId, pid: Pid, pc: u64) -> Self {
        Wavefront {
            wg,
            pid,
            simd_id: 0,
            first_work_item: 0,
            pc,
            exec_mask: u64::MAX,
            state: WfState::Dispatching,
            inst_buffer: Vec::new(),
            inst_buffer_start_pc: 0,
            inst_to_issue: None,
            inst: None,
            is_fetching: false,
            last_fetch_time: 0,
            outstanding_scalar_mem_access: 0,
            outstanding_vector_mem_access: 0,
            sreg_offset: 0,
            vreg_offset: 0,
            sgpr_count: 0,
            vgpr_count: 0,
            lds_offset: 0,
            scratchpad: Scratchpad::default(),
        }
    }

    /// Back to Ready with the issued instruction retired.
    pub fn retire(&mut self) {
        self.inst = None;
        self.state = WfState::Ready;
    }

    /// Instruction bytes from PC to the end of the buffer, if PC lies inside it.
    pub fn bytes_at_pc(&self) -> Option<&[u8]> {
        if self.pc < self.inst_buffer_start_pc {
            return None;
        }
        let offset = (self.pc - self.inst_buffer_start_pc) as usize;
        if offset >= self.inst_buffer.len() {
            return None;
        }
        Some(&self.inst_buffer[offset..])
    }

    pub fn inst_buffer_end(&self) -> u64 {
        self.inst_buffer_start_pc + self.inst_buffer.len() as u64
    }

    /// Drops whole fetch lines the PC has moved past.
    pub fn remove_stale_inst_buffer(&mut self, line_size: u64) {
        while !self.inst_buffer.is_empty() && self.pc >= self.inst_buffer_start_pc + line_size {
            let n = (line_size as usize).min(self.inst_buffer.len());
            self.inst_buffer.drain(..n);
            self.inst_buffer_start_pc += line_size;
        }
    }
}

#[derive(Debug)]
pub struct WorkGroup {
    pub id: [u32; 3],
    pub wfs: Vec<WfId>,
    pub lds: Vec<u8>,
    pub map_req: ReqId,
    pub pid: Pid,
    pub alloc: WgAllocation,
}

impl WorkGroup {
    pub fn all_completed(&self, wavefronts: &Wavefronts) -> bool {
        self.wfs
            .iter()
            .all(|&id| wavefronts.get(id).map_or(true, |wf| wf.state == WfState::Completed))
    }
}

/// Wavefronts resident on one SIMD, in dispatch order.
#[derive(Debug, Clone)]
pub struct WavefrontPool {
    capacity: usize,
    wfs: Vec<WfId>,
}

impl WavefrontPool {
    pub fn new(capacity: usize) -> Self {
        WavefrontPool {
            capacity,
            wfs: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, wf: WfId) -> bool {
        if self.is_full() {
            return false;
        }
        self.wfs.push(wf);
        true
    }

    pub fn remove(&mut self, wf: WfId) {
        self.wfs.retain(|&id| id != wf);
    }

    pub fn is_full(&self) -> bool {
        self.wfs.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.wfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wfs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WfId> + '_ {
        self.wfs.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_slots_are_reused_under_a_new_generation() {
        let mut arena: Arena<WfId, u32> = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));
        let b = arena.insert(2);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.capacity(), 1);

        assert!(arena.get(a).is_none());
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena[b], 2);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(b.to_string(), "wf0.1");
    }

    #[test]
    fn churn_keeps_the_slot_count_bounded() {
        let mut arena: Arena<WgId, usize> = Arena::new();
        for round in 0..100 {
            let ids: Vec<WgId> = (0..4).map(|i| arena.insert(round * 4 + i)).collect();
            for id in ids {
                arena.remove(id);
            }
        }
        assert!(arena.is_empty());
        assert_eq!(arena.capacity(), 4);
    }

    #[test]
    fn stale_lines_are_dropped_after_pc_moves_past_them() {
        let mut wf = Wavefront::new(WgId(0), Pid(0), 0x100);
        wf.inst_buffer_start_pc = 0x100;
        wf.inst_buffer = vec![0; 128];
        wf.pc = 0x13c;
        wf.remove_stale_inst_buffer(64);
        assert_eq!(wf.inst_buffer_start_pc, 0x100);
        wf.pc = 0x144;
        wf.remove_stale_inst_buffer(64);
        assert_eq!(wf.inst_buffer_start_pc, 0x140);
        assert_eq!(wf.inst_buffer.len(), 64);
        assert_eq!(wf.bytes_at_pc().map(|b| b.len()), Some(60));
    }

    #[test]
    fn bytes_at_pc_outside_buffer_is_none() {
        let mut wf = Wavefront::new(WgId(0), Pid(0), 0x80);
        wf.inst_buffer_start_pc = 0x40;
        wf.inst_buffer = vec![0; 64];
        assert!(wf.bytes_at_pc().is_none());
        wf.pc = 0x3c;
        assert!(wf.bytes_at_pc().is_none());
    }

    #[test]
    fn pool_respects_capacity() {
        let mut pool = WavefrontPool::new(1);
        assert!(pool.add(WfId(0)));
        assert!(!pool.add(WfId(1)));
        pool.remove(WfId(0));
        assert!(pool.is_empty());
    }
}

//! Capabilities the timing model delegates: operand staging and
//! per-opcode arithmetic. Neither affects timing.

use crate::register_file::RegisterFiles;
use crate::wavefront::Wavefront;

pub trait ScratchpadPreparer {
    /// Copies operands for `wf.inst` from the register files into the
    /// wavefront's scratchpad.
    fn prepare(&mut self, wf: &mut Wavefront, regs: &RegisterFiles);

    /// Writes results from the scratchpad back to the register files.
    fn commit(&mut self, wf: &mut Wavefront, regs: &mut RegisterFiles);
}

pub trait Alu {
    /// Executes `wf.inst` on the scratchpad. LDS instructions get the owning
    /// work-group's LDS. Branches redirect `wf.pc`.
    fn run(&mut self, wf: &mut Wavefront, lds: Option<&mut [u8]>);
}

/// Timing-only stand-ins: nothing is computed and nothing is written back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAlu;

impl Alu for NullAlu {
    fn run(&mut self, _wf: &mut Wavefront, _lds: Option<&mut [u8]>) {}
}

/// Fills lane addresses from a fixed stride so memory instructions still
/// produce traffic when no functional model is attached.
#[derive(Debug, Clone, Copy)]
pub struct StridedPreparer {
    pub base: u64,
    pub stride: u64,
    pub wavefront_size: usize,
}

impl ScratchpadPreparer for StridedPreparer {
    fn prepare(&mut self, wf: &mut Wavefront, _regs: &RegisterFiles) {
        let base = self.base + wf.first_work_item as u64 * self.stride;
        let reg_count = wf
            .inst
            .as_ref()
            .and_then(|inst| inst.mem)
            .map_or(1, |mem| mem.reg_count);
        let stride = self.stride;
        let scratchpad = &mut wf.scratchpad;
        scratchpad.clear();
        scratchpad
            .lane_addresses
            .extend((0..self.wavefront_size as u64).map(|lane| base + lane * stride));
        scratchpad
            .lane_data
            .resize(self.wavefront_size * reg_count, 0);
        scratchpad.scalar_address = self.base;
    }

    fn commit(&mut self, _wf: &mut Wavefront, _regs: &mut RegisterFiles) {}
}

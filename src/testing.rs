//! Fixtures shared by the unit tests.

use crate::alu::{Alu, NullAlu, ScratchpadPreparer};
use crate::config::CuConfig;
use crate::context::{Capabilities, CuContext};
use crate::insts::{
    DecodeError, Decoder, ExeUnitClass, Format, Inst, MemKind, MemOperand, SpecialOp, WaitCnt,
};
use crate::protocol::Pid;
use crate::register_file::RegisterFiles;
use crate::wavefront::{Wavefront, WfId, WfState, WgId, WorkGroup};
use crate::wg_mapper::WgAllocation;

pub struct NullPreparer;

impl ScratchpadPreparer for NullPreparer {
    fn prepare(&mut self, _wf: &mut Wavefront, _regs: &RegisterFiles) {}
    fn commit(&mut self, _wf: &mut Wavefront, _regs: &mut RegisterFiles) {}
}

/// Decodes every buffer as the same instruction once enough bytes are
/// buffered.
pub struct FixedDecoder {
    pub inst: Inst,
}

impl Decoder for FixedDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Inst, DecodeError> {
        if buf.len() < self.inst.byte_size {
            return Err(DecodeError::Incomplete {
                needed: self.inst.byte_size,
                available: buf.len(),
            });
        }
        Ok(self.inst.clone())
    }
}

pub struct JumpAlu {
    pub target: u64,
}

impl Alu for JumpAlu {
    fn run(&mut self, wf: &mut Wavefront, _lds: Option<&mut [u8]>) {
        wf.pc = self.target;
    }
}

pub struct LdsStoreAlu {
    pub offset: usize,
    pub value: u8,
}

impl Alu for LdsStoreAlu {
    fn run(&mut self, _wf: &mut Wavefront, lds: Option<&mut [u8]>) {
        if let Some(lds) = lds {
            lds[self.offset] = self.value;
        }
    }
}

pub fn caps_with_alu(alu: Box<dyn Alu>) -> Capabilities {
    Capabilities {
        decoder: Box::new(FixedDecoder { inst: simd_inst() }),
        alu,
        preparer: Box::new(NullPreparer),
    }
}

pub fn null_caps() -> Capabilities {
    caps_with_alu(Box::new(NullAlu))
}

pub fn caps_with_decoder(inst: Inst) -> Capabilities {
    Capabilities {
        decoder: Box::new(FixedDecoder { inst }),
        alu: Box::new(NullAlu),
        preparer: Box::new(NullPreparer),
    }
}

/// A context holding one empty work-group that test wavefronts join.
pub fn test_context(config: &CuConfig) -> CuContext {
    let mut ctx = CuContext::new(config);
    ctx.work_groups.insert(WorkGroup {
        id: [0, 0, 0],
        wfs: Vec::new(),
        lds: vec![0; 256],
        map_req: 0,
        pid: Pid(0),
        alloc: WgAllocation::default(),
    });
    ctx
}

pub fn add_wavefront(ctx: &mut CuContext, simd_id: usize, pc: u64) -> WfId {
    add_wavefront_to(ctx, WgId(0), simd_id, pc)
}

pub fn add_wavefront_to(ctx: &mut CuContext, wg: WgId, simd_id: usize, pc: u64) -> WfId {
    let mut wf = Wavefront::new(wg, Pid(0), pc);
    wf.simd_id = simd_id;
    wf.state = WfState::Ready;
    wf.inst_buffer_start_pc = pc;
    let id = ctx.wavefronts.insert(wf);
    ctx.work_groups[wg].wfs.push(id);
    ctx.wf_pools[simd_id].add(id);
    id
}

pub fn add_running_wavefront(ctx: &mut CuContext, simd_id: usize, inst: Inst) -> WfId {
    let id = add_wavefront(ctx, simd_id, 0);
    let wf = &mut ctx.wavefronts[id];
    wf.inst = Some(inst);
    wf.state = WfState::Running;
    id
}

fn inst_of(format: Format, opcode: u16, byte_size: usize) -> Inst {
    match Inst::new(format, opcode, byte_size) {
        Ok(inst) => inst,
        Err(e) => panic!("bad fixture: {}", e),
    }
}

pub fn simd_inst() -> Inst {
    inst_of(Format::VOP2, 1, 4)
}

pub fn scalar_inst() -> Inst {
    inst_of(Format::SOP2, 0, 4)
}

pub fn branch_inst() -> Inst {
    inst_of(Format::SOPP, 2, 4)
}

pub fn lds_inst() -> Inst {
    inst_of(Format::DS, 13, 8)
}

pub fn vmem_inst() -> Inst {
    flat_load_inst(0, 1, 4)
}

pub fn special_inst(op: SpecialOp) -> Inst {
    inst_of(Format::SOPP, op as u16, 4)
}

pub fn waitcnt_inst(vmcnt: usize, lgkmcnt: usize) -> Inst {
    special_inst(SpecialOp::WaitCnt).with_wait_cnt(WaitCnt { vmcnt, lgkmcnt })
}

pub fn smem_load_inst(reg: usize, reg_count: usize) -> Inst {
    inst_of(Format::SMEM, 0, 8).with_mem(MemOperand {
        kind: MemKind::Load,
        reg,
        reg_count,
        bytes_per_lane: reg_count * 4,
    })
}

pub fn flat_load_inst(reg: usize, reg_count: usize, bytes_per_lane: usize) -> Inst {
    inst_of(Format::FLAT, 20, 8).with_mem(MemOperand {
        kind: MemKind::Load,
        reg,
        reg_count,
        bytes_per_lane,
    })
}

pub fn store_inst(reg: usize, reg_count: usize, bytes_per_lane: usize) -> Inst {
    inst_of(Format::MUBUF, 28, 8).with_mem(MemOperand {
        kind: MemKind::Store,
        reg,
        reg_count,
        bytes_per_lane,
    })
}

pub fn inst_with_class(class: ExeUnitClass) -> Inst {
    match class {
        ExeUnitClass::Branch => branch_inst(),
        ExeUnitClass::Scalar => scalar_inst(),
        ExeUnitClass::Simd => simd_inst(),
        ExeUnitClass::Lds => lds_inst(),
        ExeUnitClass::VectorMem => vmem_inst(),
        ExeUnitClass::Special(op) => special_inst(op),
    }
}

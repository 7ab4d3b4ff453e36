use num_traits::FromPrimitive;
use thiserror::Error;

use crate::bit::get_bits;

/// GCN3 instruction encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    SOP1,
    SOP2,
    SOPK,
    SOPC,
    SOPP,
    SMEM,
    VOP1,
    VOP2,
    VOPC,
    VOP3A,
    VOP3B,
    FLAT,
    MUBUF,
    DS,
}

pub const SOP2_ENCODE: u32 = 0b10;
pub const SOPK_ENCODE: u32 = 0b1011;
pub const SOP1_ENCODE: u32 = 0b101111101;
pub const SOPC_ENCODE: u32 = 0b101111110;
pub const SOPP_ENCODE: u32 = 0b101111111;
pub const SMEM_ENCODE: u32 = 0b110000;
pub const VOPC_ENCODE: u32 = 0b0111110;
pub const VOP1_ENCODE: u32 = 0b0111111;
pub const VOP2_ENCODE: u32 = 0b0;
pub const VOP3AB_ENCODE: u32 = 0b110100;
pub const DS_ENCODE: u32 = 0b110110;
pub const FLAT_ENCODE: u32 = 0b110111;
pub const MUBUF_ENCODE: u32 = 0b111000;

impl Format {
    /// Identifies the encoding from the first dword of an instruction.
    /// VOP3 is reported as `VOP3A`; the opcode decides between A and B.
    pub fn identify(word: u32) -> Option<Format> {
        let inst = word as u64;
        if get_bits(inst, 31, 23) as u32 == SOP1_ENCODE {
            Some(Format::SOP1)
        } else if get_bits(inst, 31, 23) as u32 == SOPC_ENCODE {
            Some(Format::SOPC)
        } else if get_bits(inst, 31, 23) as u32 == SOPP_ENCODE {
            Some(Format::SOPP)
        } else if get_bits(inst, 31, 28) as u32 == SOPK_ENCODE {
            Some(Format::SOPK)
        } else if get_bits(inst, 31, 30) as u32 == SOP2_ENCODE {
            Some(Format::SOP2)
        } else if get_bits(inst, 31, 25) as u32 == VOPC_ENCODE {
            Some(Format::VOPC)
        } else if get_bits(inst, 31, 25) as u32 == VOP1_ENCODE {
            Some(Format::VOP1)
        } else if get_bits(inst, 31, 31) as u32 == VOP2_ENCODE {
            Some(Format::VOP2)
        } else if get_bits(inst, 31, 26) as u32 == VOP3AB_ENCODE {
            Some(Format::VOP3A)
        } else if get_bits(inst, 31, 26) as u32 == SMEM_ENCODE {
            Some(Format::SMEM)
        } else if get_bits(inst, 31, 26) as u32 == DS_ENCODE {
            Some(Format::DS)
        } else if get_bits(inst, 31, 26) as u32 == FLAT_ENCODE {
            Some(Format::FLAT)
        } else if get_bits(inst, 31, 26) as u32 == MUBUF_ENCODE {
            Some(Format::MUBUF)
        } else {
            None
        }
    }

    pub fn is_vector_alu(self) -> bool {
        matches!(
            self,
            Format::VOP1 | Format::VOP2 | Format::VOPC | Format::VOP3A | Format::VOP3B
        )
    }
}

/// SOPP opcodes evaluated by the scheduler itself rather than an execution
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum SpecialOp {
    Nop = 0,
    EndPgm = 1,
    Wakeup = 3,
    Barrier = 10,
    SetKill = 11,
    WaitCnt = 12,
    SetHalt = 13,
    Sleep = 14,
    SetPrio = 15,
    SendMsg = 16,
    SendMsgHalt = 17,
    ICacheInv = 19,
    IncPerfLevel = 20,
    DecPerfLevel = 21,
    TTraceData = 22,
}

const SOPP_BRANCH_OPCODES: [u16; 7] = [2, 4, 5, 6, 7, 8, 9];
const SOP1_SETPC_B64: u16 = 28;
const SOP1_SWAPPC_B64: u16 = 29;

/// Which part of the compute unit executes an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExeUnitClass {
    Branch,
    Scalar,
    Simd,
    Lds,
    VectorMem,
    Special(SpecialOp),
}

impl ExeUnitClass {
    pub const NUM_ISSUE_SLOTS: usize = 6;

    pub fn classify(format: Format, opcode: u16) -> Result<ExeUnitClass, DecodeError> {
        match format {
            Format::SOPP => {
                if SOPP_BRANCH_OPCODES.contains(&opcode) {
                    Ok(ExeUnitClass::Branch)
                } else {
                    SpecialOp::from_u16(opcode)
                        .map(ExeUnitClass::Special)
                        .ok_or(DecodeError::UnknownOpcode { format, opcode })
                }
            }
            Format::SOP1 if opcode == SOP1_SETPC_B64 || opcode == SOP1_SWAPPC_B64 => {
                Ok(ExeUnitClass::Branch)
            }
            Format::SOP1 | Format::SOP2 | Format::SOPK | Format::SOPC | Format::SMEM => {
                Ok(ExeUnitClass::Scalar)
            }
            Format::VOP1 | Format::VOP2 | Format::VOPC | Format::VOP3A | Format::VOP3B => {
                Ok(ExeUnitClass::Simd)
            }
            Format::FLAT | Format::MUBUF => Ok(ExeUnitClass::VectorMem),
            Format::DS => Ok(ExeUnitClass::Lds),
        }
    }

    /// Index used by the issue arbiter to admit one instruction per class.
    pub fn issue_slot(self) -> usize {
        match self {
            ExeUnitClass::Branch => 0,
            ExeUnitClass::Scalar => 1,
            ExeUnitClass::Simd => 2,
            ExeUnitClass::Lds => 3,
            ExeUnitClass::VectorMem => 4,
            ExeUnitClass::Special(_) => 5,
        }
    }
}

/// Counter thresholds of an S_WAITCNT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCnt {
    pub vmcnt: usize,
    pub lgkmcnt: usize,
}

impl WaitCnt {
    pub const NONE: WaitCnt = WaitCnt {
        vmcnt: 0xF,
        lgkmcnt: 0xF,
    };

    pub fn from_simm16(simm16: u16) -> WaitCnt {
        WaitCnt {
            vmcnt: get_bits(simm16 as u64, 3, 0) as usize,
            lgkmcnt: get_bits(simm16 as u64, 11, 8) as usize,
        }
    }
}

impl Default for WaitCnt {
    fn default() -> Self {
        WaitCnt::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Load,
    Store,
}

/// Register side of a memory instruction. `reg` is the destination of a
/// load or the data source of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub kind: MemKind,
    pub reg: usize,
    pub reg_count: usize,
    pub bytes_per_lane: usize,
}

/// A decoded instruction. Operand semantics stay opaque to the timing model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub pc: u64,
    pub format: Format,
    pub opcode: u16,
    pub byte_size: usize,
    pub exe_unit: ExeUnitClass,
    pub wait_cnt: WaitCnt,
    pub mem: Option<MemOperand>,
}

impl Inst {
    pub fn new(format: Format, opcode: u16, byte_size: usize) -> Result<Inst, DecodeError> {
        Ok(Inst {
            pc: 0,
            format,
            opcode,
            byte_size,
            exe_unit: ExeUnitClass::classify(format, opcode)?,
            wait_cnt: WaitCnt::NONE,
            mem: None,
        })
    }

    pub fn with_mem(mut self, mem: MemOperand) -> Inst {
        self.mem = Some(mem);
        self
    }

    pub fn with_wait_cnt(mut self, wait_cnt: WaitCnt) -> Inst {
        self.wait_cnt = wait_cnt;
        self
    }

    pub fn special_op(&self) -> Option<SpecialOp> {
        match self.exe_unit {
            ExeUnitClass::Special(op) => Some(op),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("need {needed} bytes, {available} buffered")]
    Incomplete { needed: usize, available: usize },

    #[error("unrecognized encoding {word:#010x}")]
    UnknownEncoding { word: u32 },

    #[error("unknown {format:?} opcode {opcode}")]
    UnknownOpcode { format: Format, opcode: u16 },
}

/// Turns buffered instruction bytes (starting at PC) into an `Inst`.
/// `DecodeError::Incomplete` means more bytes must be fetched first.
pub trait Decoder {
    fn decode(&self, buf: &[u8]) -> Result<Inst, DecodeError>;
}

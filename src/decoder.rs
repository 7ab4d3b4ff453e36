//! Format-level GCN3 decoding: encoding, byte size, opcode, execution
//! class and the register side of memory instructions. What an opcode
//! computes is left to the ALU.

use crate::bit::get_bits;
use crate::buffer::get_u32;
use crate::insts::{Decoder, DecodeError, Format, Inst, MemKind, MemOperand, WaitCnt};

const LITERAL_CONSTANT: u64 = 255;
const S_WAITCNT: u16 = 12;
const VOP3B_OPCODES: [u16; 10] = [281, 282, 283, 284, 285, 286, 480, 481, 488, 489];

fn base_size(format: Format) -> usize {
    match format {
        Format::SOP1
        | Format::SOP2
        | Format::SOPK
        | Format::SOPC
        | Format::SOPP
        | Format::VOP1
        | Format::VOP2
        | Format::VOPC => 4,
        Format::SMEM
        | Format::VOP3A
        | Format::VOP3B
        | Format::FLAT
        | Format::MUBUF
        | Format::DS => 8,
    }
}

fn opcode_of(format: Format, inst: u64) -> u16 {
    let op = match format {
        Format::SOP1 => get_bits(inst, 15, 8),
        Format::SOP2 => get_bits(inst, 29, 23),
        Format::SOPK => get_bits(inst, 27, 23),
        Format::SOPC | Format::SOPP => get_bits(inst, 22, 16),
        Format::SMEM => get_bits(inst, 25, 18),
        Format::VOPC => get_bits(inst, 24, 17),
        Format::VOP1 => get_bits(inst, 16, 9),
        Format::VOP2 => get_bits(inst, 30, 25),
        Format::VOP3A | Format::VOP3B => get_bits(inst, 25, 16),
        Format::DS => get_bits(inst, 24, 17),
        Format::FLAT | Format::MUBUF => get_bits(inst, 24, 18),
    };
    op as u16
}

fn has_literal(format: Format, inst: u64) -> bool {
    match format {
        Format::SOP2 | Format::SOPC => {
            get_bits(inst, 7, 0) == LITERAL_CONSTANT || get_bits(inst, 15, 8) == LITERAL_CONSTANT
        }
        Format::SOP1 => get_bits(inst, 7, 0) == LITERAL_CONSTANT,
        Format::VOP1 | Format::VOP2 | Format::VOPC => get_bits(inst, 8, 0) == LITERAL_CONSTANT,
        _ => false,
    }
}

/// (kind, reg_count, bytes_per_lane) of a FLAT / MUBUF opcode.
fn vector_mem_shape(format: Format, opcode: u16) -> Option<(MemKind, usize, usize)> {
    match opcode {
        0..=3 if format == Format::MUBUF => {
            let n = opcode as usize + 1;
            Some((MemKind::Load, n, n * 4))
        }
        4..=7 if format == Format::MUBUF => {
            let n = opcode as usize - 3;
            Some((MemKind::Store, n, n * 4))
        }
        16 | 17 => Some((MemKind::Load, 1, 1)),
        18 | 19 => Some((MemKind::Load, 1, 2)),
        20 => Some((MemKind::Load, 1, 4)),
        21 => Some((MemKind::Load, 2, 8)),
        22 => Some((MemKind::Load, 3, 12)),
        23 => Some((MemKind::Load, 4, 16)),
        24 => Some((MemKind::Store, 1, 1)),
        26 => Some((MemKind::Store, 1, 2)),
        28 => Some((MemKind::Store, 1, 4)),
        29 => Some((MemKind::Store, 2, 8)),
        30 => Some((MemKind::Store, 3, 12)),
        31 => Some((MemKind::Store, 4, 16)),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FormatDecoder;

impl FormatDecoder {
    pub fn new() -> Self {
        FormatDecoder
    }
}

impl Decoder for FormatDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Inst, DecodeError> {
        if buf.len() < 4 {
            return Err(DecodeError::Incomplete {
                needed: 4,
                available: buf.len(),
            });
        }
        let word = get_u32(buf, 0);
        let mut format = Format::identify(word).ok_or(DecodeError::UnknownEncoding { word })?;
        let lo = word as u64;
        let opcode = opcode_of(format, lo);
        if format == Format::VOP3A && VOP3B_OPCODES.contains(&opcode) {
            format = Format::VOP3B;
        }

        let mut size = base_size(format);
        if has_literal(format, lo) {
            size += 4;
        }
        if buf.len() < size {
            return Err(DecodeError::Incomplete {
                needed: size,
                available: buf.len(),
            });
        }

        let inst = Inst::new(format, opcode, size)?;
        match format {
            Format::SOPP if opcode == S_WAITCNT => {
                Ok(inst.with_wait_cnt(WaitCnt::from_simm16(get_bits(lo, 15, 0) as u16)))
            }
            Format::SMEM => {
                let reg_count = match opcode {
                    0..=4 => 1usize << opcode,
                    8..=12 => 1usize << (opcode - 8),
                    _ => return Ok(inst),
                };
                Ok(inst.with_mem(MemOperand {
                    kind: MemKind::Load,
                    reg: get_bits(lo, 12, 6) as usize,
                    reg_count,
                    bytes_per_lane: reg_count * 4,
                }))
            }
            Format::FLAT | Format::MUBUF => {
                let (kind, reg_count, bytes_per_lane) = vector_mem_shape(format, opcode)
                    .ok_or(DecodeError::UnknownOpcode { format, opcode })?;
                let hi = get_u32(buf, 4) as u64;
                let reg = if format == Format::FLAT && kind == MemKind::Load {
                    get_bits(hi, 31, 24)
                } else {
                    get_bits(hi, 15, 8)
                };
                Ok(inst.with_mem(MemOperand {
                    kind,
                    reg: reg as usize,
                    reg_count,
                    bytes_per_lane,
                }))
            }
            _ => Ok(inst),
        }
    }
}

use thiserror::Error;

use crate::insts::DecodeError;
use crate::protocol::{PortKind, ReqId};
use crate::wavefront::WfId;

/// Protocol violations inside the compute unit. Any of these aborts the
/// simulation; backpressure and stalls are never reported this way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error(
        "{port} response {respond_to} does not match oldest in-flight request {expected} \
         (wavefront {wf}, {depth} in flight)"
    )]
    ResponseMismatch {
        port: PortKind,
        respond_to: ReqId,
        expected: ReqId,
        wf: WfId,
        depth: usize,
    },

    #[error("{port} response {respond_to} arrived with no request in flight")]
    UnexpectedResponse { port: PortKind, respond_to: ReqId },

    #[error("{port} response {respond_to} is a {got}, the port does not carry it here")]
    WrongResponseKind {
        port: PortKind,
        respond_to: ReqId,
        got: &'static str,
    },

    #[error("{unit} cannot accept wavefront {wf}: read stage holds wavefront {occupant}")]
    UnitOccupied {
        unit: &'static str,
        wf: WfId,
        occupant: WfId,
    },

    #[error("wavefront {wf} {counter} memory counter underflow")]
    CounterUnderflow { wf: WfId, counter: &'static str },

    #[error("wavefront {wf} reached {unit} without an issued instruction")]
    NoInstruction { wf: WfId, unit: &'static str },

    #[error("wavefront {wf} issued a memory instruction at {pc:#x} without a memory operand")]
    MissingMemOperand { wf: WfId, pc: u64 },

    #[error("wavefront {wf} failed to decode at {pc:#x}: {source}")]
    Decode {
        wf: WfId,
        pc: u64,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(String),

    #[error("`{key}` must be a non-negative integer")]
    InvalidValue { key: &'static str },

    #[error("`{key}` = {value}: {reason}")]
    Constraint {
        key: &'static str,
        value: usize,
        reason: &'static str,
    },
}

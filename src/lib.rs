pub mod alu;
pub mod arbiter;
pub mod bit;
pub mod branch_unit;
pub mod buffer;
pub mod coalescer;
pub mod compute_unit;
pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod event;
pub mod execution_unit;
pub mod fixed_memory;
pub mod inflight;
pub mod insts;
pub mod kernel;
pub mod lds_unit;
pub mod protocol;
pub mod register_file;
pub mod scalar_unit;
pub mod scheduler;
pub mod simd_unit;
pub mod vector_memory_unit;
pub mod wavefront;
pub mod wg_mapper;

#[cfg(test)]
mod testing;

#[macro_use]
extern crate num_derive;

use yaml_rust::{Yaml, YamlLoader};

use crate::error::ConfigError;

/// Compute-unit geometry and timing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuConfig {
    pub num_simd_units: usize,
    pub wavefront_size: usize,
    pub simd_lanes: usize,
    /// One pool per SIMD unit.
    pub num_wf_pools: usize,
    pub wf_pool_size: usize,
    pub barrier_buffer_size: usize,
    pub no_progress_limit: usize,
    pub port_capacity: usize,
    pub inst_fetch_size: usize,
    pub inst_buffer_capacity: usize,
    pub cache_line_size: usize,
    pub num_sgprs: usize,
    pub num_vgprs_per_simd: usize,
    pub lds_size: usize,
    pub sgpr_granularity: usize,
    pub vgpr_granularity: usize,
    pub lds_granularity: usize,
    pub max_wg_dispatch_latency: usize,
}

impl Default for CuConfig {
    fn default() -> Self {
        CuConfig {
            num_simd_units: 4,
            wavefront_size: 64,
            simd_lanes: 16,
            num_wf_pools: 4,
            wf_pool_size: 10,
            barrier_buffer_size: 16,
            no_progress_limit: 4,
            port_capacity: 4,
            inst_fetch_size: 64,
            inst_buffer_capacity: 256,
            cache_line_size: 64,
            num_sgprs: 3200,
            num_vgprs_per_simd: 16384,
            lds_size: 65536,
            sgpr_granularity: 16,
            vgpr_granularity: 4,
            lds_granularity: 256,
            max_wg_dispatch_latency: 4,
        }
    }
}

fn read_usize(doc: &Yaml, key: &'static str, field: &mut usize) -> Result<(), ConfigError> {
    match doc[key] {
        Yaml::Integer(value) if value >= 0 => {
            *field = value as usize;
            Ok(())
        }
        Yaml::BadValue => Ok(()),
        _ => Err(ConfigError::InvalidValue { key }),
    }
}

fn power_of_two(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::Constraint {
            key,
            value,
            reason: "must be a power of two",
        })
    }
}

fn non_zero(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::Constraint {
            key,
            value,
            reason: "must be greater than zero",
        })
    }
}

impl CuConfig {
    /// Reads a flat YAML mapping. Missing keys keep their defaults and
    /// unknown keys are ignored.
    pub fn from_yaml_str(src: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(src).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = CuConfig::default();
        let doc = match docs.first() {
            Some(doc) => doc,
            None => return Ok(config),
        };
        match doc {
            Yaml::Hash(_) => {}
            Yaml::Null => return Ok(config),
            _ => return Err(ConfigError::Parse("top level must be a mapping".to_string())),
        }

        read_usize(doc, "num_simd_units", &mut config.num_simd_units)?;
        read_usize(doc, "wavefront_size", &mut config.wavefront_size)?;
        read_usize(doc, "simd_lanes", &mut config.simd_lanes)?;
        read_usize(doc, "num_wf_pools", &mut config.num_wf_pools)?;
        read_usize(doc, "wf_pool_size", &mut config.wf_pool_size)?;
        read_usize(doc, "barrier_buffer_size", &mut config.barrier_buffer_size)?;
        read_usize(doc, "no_progress_limit", &mut config.no_progress_limit)?;
        read_usize(doc, "port_capacity", &mut config.port_capacity)?;
        read_usize(doc, "inst_fetch_size", &mut config.inst_fetch_size)?;
        read_usize(doc, "inst_buffer_capacity", &mut config.inst_buffer_capacity)?;
        read_usize(doc, "cache_line_size", &mut config.cache_line_size)?;
        read_usize(doc, "num_sgprs", &mut config.num_sgprs)?;
        read_usize(doc, "num_vgprs_per_simd", &mut config.num_vgprs_per_simd)?;
        read_usize(doc, "lds_size", &mut config.lds_size)?;
        read_usize(doc, "sgpr_granularity", &mut config.sgpr_granularity)?;
        read_usize(doc, "vgpr_granularity", &mut config.vgpr_granularity)?;
        read_usize(doc, "lds_granularity", &mut config.lds_granularity)?;
        read_usize(doc, "max_wg_dispatch_latency", &mut config.max_wg_dispatch_latency)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("num_simd_units", self.num_simd_units)?;
        non_zero("wf_pool_size", self.wf_pool_size)?;
        non_zero("barrier_buffer_size", self.barrier_buffer_size)?;
        non_zero("no_progress_limit", self.no_progress_limit)?;
        non_zero("port_capacity", self.port_capacity)?;
        non_zero("simd_lanes", self.simd_lanes)?;
        power_of_two("inst_fetch_size", self.inst_fetch_size)?;
        power_of_two("cache_line_size", self.cache_line_size)?;
        power_of_two("sgpr_granularity", self.sgpr_granularity)?;
        power_of_two("vgpr_granularity", self.vgpr_granularity)?;
        power_of_two("lds_granularity", self.lds_granularity)?;

        if self.wavefront_size == 0 || self.wavefront_size > 64 {
            return Err(ConfigError::Constraint {
                key: "wavefront_size",
                value: self.wavefront_size,
                reason: "must be between 1 and 64",
            });
        }
        if self.wavefront_size % self.simd_lanes != 0 {
            return Err(ConfigError::Constraint {
                key: "simd_lanes",
                value: self.simd_lanes,
                reason: "must divide wavefront_size",
            });
        }
        if self.num_wf_pools != self.num_simd_units {
            return Err(ConfigError::Constraint {
                key: "num_wf_pools",
                value: self.num_wf_pools,
                reason: "must equal num_simd_units",
            });
        }
        if self.inst_buffer_capacity < self.inst_fetch_size {
            return Err(ConfigError::Constraint {
                key: "inst_buffer_capacity",
                value: self.inst_buffer_capacity,
                reason: "must hold at least one fetch",
            });
        }
        if self.num_vgprs_per_simd % self.wavefront_size != 0 {
            return Err(ConfigError::Constraint {
                key: "num_vgprs_per_simd",
                value: self.num_vgprs_per_simd,
                reason: "must be a multiple of wavefront_size",
            });
        }
        Ok(())
    }

    /// Exec-stage occupancy of one SIMD instruction.
    pub fn simd_exec_cycles(&self) -> usize {
        self.wavefront_size / self.simd_lanes
    }

    /// VGPRs each lane can address on one SIMD.
    pub fn vgprs_per_lane(&self) -> usize {
        self.num_vgprs_per_simd / self.wavefront_size
    }
}

use crate::buffer::{get_bits, get_u32, get_u64};

/// Fields of an AMDHSA kernel descriptor that size a work-group's
/// resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDescriptor {
    pub group_segment_fixed_size: usize,
    pub max_flat_workgroup_size: usize,
    pub kernel_code_entry_byte_offset: u64,
    // compute_pgm_rsrc1
    pub granulated_workitem_vgpr_count: usize,
    pub granulated_wavefront_sgpr_count: usize,
}

pub const KERNEL_DESCRIPTOR_SIZE: usize = 64;

pub fn decode_kernel_desc(kd: &[u8]) -> KernelDescriptor {
    KernelDescriptor {
        group_segment_fixed_size: get_u32(kd, 0) as usize,
        max_flat_workgroup_size: get_u32(kd, 8) as usize,
        kernel_code_entry_byte_offset: get_u64(kd, 16),
        granulated_workitem_vgpr_count: (get_bits(kd, 48, 0, 6) as usize + 1) * 4,
        granulated_wavefront_sgpr_count: (get_bits(kd, 48, 6, 4) as usize + 1) * 8,
    }
}

/// What the compute unit needs to know about the kernel a work-group runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    pub entry_pc: u64,
    pub sgpr_count: usize,
    pub vgpr_count: usize,
    pub lds_size: usize,
}

impl KernelInfo {
    /// `descriptor_address` is where the descriptor lives; the entry point is
    /// relative to it.
    pub fn from_descriptor(kd: &KernelDescriptor, descriptor_address: u64) -> Self {
        KernelInfo {
            entry_pc: descriptor_address.wrapping_add(kd.kernel_code_entry_byte_offset),
            sgpr_count: kd.granulated_wavefront_sgpr_count,
            vgpr_count: kd.granulated_workitem_vgpr_count,
            lds_size: kd.group_segment_fixed_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavefrontDesc {
    pub first_work_item: usize,
    pub exec_mask: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkGroupDesc {
    pub id: [u32; 3],
    pub kernel: KernelInfo,
    pub wavefronts: Vec<WavefrontDesc>,
}

impl WorkGroupDesc {
    /// Splits `work_items` into wavefronts; the last one gets a partial
    /// exec mask.
    pub fn new(id: [u32; 3], kernel: KernelInfo, work_items: usize, wavefront_size: usize) -> Self {
        let mut wavefronts = Vec::new();
        let mut first = 0;
        while first < work_items {
            let lanes = (work_items - first).min(wavefront_size);
            let exec_mask = if lanes >= 64 {
                u64::MAX
            } else {
                (1u64 << lanes) - 1
            };
            wavefronts.push(WavefrontDesc {
                first_work_item: first,
                exec_mask,
            });
            first += wavefront_size;
        }
        WorkGroupDesc {
            id,
            kernel,
            wavefronts,
        }
    }
}

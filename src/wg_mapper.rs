use log::debug;

use crate::bit::div_ceil;
use crate::config::CuConfig;
use crate::kernel::WorkGroupDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStatus {
    Free,
    Reserved,
    Used,
}

/// Allocation state of a register or LDS space, one entry per granule.
#[derive(Debug, Clone)]
pub struct ResourceMask {
    mask: Vec<AllocStatus>,
}

impl ResourceMask {
    pub fn new(len: usize) -> Self {
        ResourceMask {
            mask: vec![AllocStatus::Free; len],
        }
    }

    /// First offset where `len` consecutive entries all have `status`.
    pub fn next_region(&self, len: usize, status: AllocStatus) -> Option<usize> {
        if len == 0 {
            return Some(0);
        }
        let mut run = 0;
        for (i, &s) in self.mask.iter().enumerate() {
            if s == status {
                run += 1;
                if run == len {
                    return Some(i + 1 - len);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    pub fn set_status(&mut self, offset: usize, len: usize, status: AllocStatus) {
        for s in self.mask[offset..offset + len].iter_mut() {
            *s = status;
        }
    }

    pub fn status_count(&self, status: AllocStatus) -> usize {
        self.mask.iter().filter(|&&s| s == status).count()
    }

    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
}

/// Granule offsets and byte offsets assigned to one wavefront.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WfAllocation {
    pub simd_id: usize,
    pub sgpr_region: (usize, usize),
    pub vgpr_region: (usize, usize),
    pub sreg_offset: usize,
    pub vreg_offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgAllocation {
    pub wfs: Vec<WfAllocation>,
    pub lds_region: (usize, usize),
    pub lds_offset: usize,
}

/// Places work-groups onto the unit's SIMDs when their wavefronts, registers
/// and LDS all fit. A work-group is placed entirely or not at all.
#[derive(Debug, Clone)]
pub struct WgMapper {
    sgpr_mask: ResourceMask,
    vgpr_masks: Vec<ResourceMask>,
    lds_mask: ResourceMask,
    free_wf_slots: Vec<usize>,
    sgpr_granularity: usize,
    vgpr_granularity: usize,
    lds_granularity: usize,
    next_simd: usize,
}

impl WgMapper {
    pub fn new(config: &CuConfig) -> Self {
        WgMapper {
            sgpr_mask: ResourceMask::new(config.num_sgprs / config.sgpr_granularity),
            vgpr_masks: (0..config.num_simd_units)
                .map(|_| ResourceMask::new(config.vgprs_per_lane() / config.vgpr_granularity))
                .collect(),
            lds_mask: ResourceMask::new(config.lds_size / config.lds_granularity),
            free_wf_slots: vec![config.wf_pool_size; config.num_wf_pools],
            sgpr_granularity: config.sgpr_granularity,
            vgpr_granularity: config.vgpr_granularity,
            lds_granularity: config.lds_granularity,
            next_simd: 0,
        }
    }

    pub fn map_wg(&mut self, desc: &WorkGroupDesc) -> Option<WgAllocation> {
        let sgpr_chunks = div_ceil(desc.kernel.sgpr_count, self.sgpr_granularity);
        let vgpr_chunks = div_ceil(desc.kernel.vgpr_count, self.vgpr_granularity);
        let lds_chunks = div_ceil(desc.kernel.lds_size, self.lds_granularity);

        let mut alloc = WgAllocation::default();
        if lds_chunks > 0 {
            let offset = self.lds_mask.next_region(lds_chunks, AllocStatus::Free)?;
            self.lds_mask
                .set_status(offset, lds_chunks, AllocStatus::Reserved);
            alloc.lds_region = (offset, lds_chunks);
            alloc.lds_offset = offset * self.lds_granularity;
        }

        let mut cursor = self.next_simd;
        for _ in desc.wavefronts.iter() {
            match self.reserve_wavefront(cursor, sgpr_chunks, vgpr_chunks) {
                Some(wf) => {
                    cursor = wf.simd_id + 1;
                    alloc.wfs.push(wf);
                }
                None => {
                    self.release(&alloc);
                    debug!(
                        "work-group {:?} does not fit ({} wavefronts)",
                        desc.id,
                        desc.wavefronts.len()
                    );
                    return None;
                }
            }
        }

        self.mark(&alloc, AllocStatus::Used);
        self.next_simd = cursor % self.vgpr_masks.len();
        Some(alloc)
    }

    pub fn unmap_wg(&mut self, alloc: &WgAllocation) {
        self.release(alloc);
    }

    pub fn free_wf_slots(&self, simd_id: usize) -> usize {
        self.free_wf_slots[simd_id]
    }

    pub fn sgpr_mask(&self) -> &ResourceMask {
        &self.sgpr_mask
    }

    pub fn vgpr_mask(&self, simd_id: usize) -> &ResourceMask {
        &self.vgpr_masks[simd_id]
    }

    pub fn lds_mask(&self) -> &ResourceMask {
        &self.lds_mask
    }

    fn reserve_wavefront(
        &mut self,
        first_simd: usize,
        sgpr_chunks: usize,
        vgpr_chunks: usize,
    ) -> Option<WfAllocation> {
        let sgpr = self.sgpr_mask.next_region(sgpr_chunks, AllocStatus::Free)?;
        let num_simds = self.vgpr_masks.len();

        for i in 0..num_simds {
            let simd_id = (first_simd + i) % num_simds;
            if self.free_wf_slots[simd_id] == 0 {
                continue;
            }
            let vgpr = match self.vgpr_masks[simd_id].next_region(vgpr_chunks, AllocStatus::Free) {
                Some(vgpr) => vgpr,
                None => continue,
            };

            self.free_wf_slots[simd_id] -= 1;
            self.sgpr_mask
                .set_status(sgpr, sgpr_chunks, AllocStatus::Reserved);
            self.vgpr_masks[simd_id].set_status(vgpr, vgpr_chunks, AllocStatus::Reserved);
            return Some(WfAllocation {
                simd_id,
                sgpr_region: (sgpr, sgpr_chunks),
                vgpr_region: (vgpr, vgpr_chunks),
                sreg_offset: sgpr * self.sgpr_granularity * 4,
                vreg_offset: vgpr * self.vgpr_granularity * 4,
            });
        }
        None
    }

    fn mark(&mut self, alloc: &WgAllocation, status: AllocStatus) {
        let (lds_offset, lds_len) = alloc.lds_region;
        self.lds_mask.set_status(lds_offset, lds_len, status);
        for wf in alloc.wfs.iter() {
            self.sgpr_mask
                .set_status(wf.sgpr_region.0, wf.sgpr_region.1, status);
            self.vgpr_masks[wf.simd_id].set_status(wf.vgpr_region.0, wf.vgpr_region.1, status);
        }
    }

    fn release(&mut self, alloc: &WgAllocation) {
        self.mark(alloc, AllocStatus::Free);
        for wf in alloc.wfs.iter() {
            self.free_wf_slots[wf.simd_id] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelInfo;

    fn work_group(wavefronts: usize, sgprs: usize, vgprs: usize, lds: usize) -> WorkGroupDesc {
        let kernel = KernelInfo {
            entry_pc: 0,
            sgpr_count: sgprs,
            vgpr_count: vgprs,
            lds_size: lds,
        };
        WorkGroupDesc::new([0, 0, 0], kernel, wavefronts * 64, 64)
    }

    #[test]
    fn region_search_is_first_fit() {
        let mut mask = ResourceMask::new(8);
        mask.set_status(1, 2, AllocStatus::Used);
        assert_eq!(mask.next_region(1, AllocStatus::Free), Some(0));
        assert_eq!(mask.next_region(2, AllocStatus::Free), Some(3));
        assert_eq!(mask.next_region(6, AllocStatus::Free), None);
        assert_eq!(mask.next_region(2, AllocStatus::Used), Some(1));
    }

    #[test]
    fn spreads_wavefronts_across_simds() {
        let config = CuConfig::default();
        let mut mapper = WgMapper::new(&config);
        let alloc = mapper.map_wg(&work_group(4, 16, 8, 1024)).unwrap();

        let simds: Vec<usize> = alloc.wfs.iter().map(|wf| wf.simd_id).collect();
        assert_eq!(simds, vec![0, 1, 2, 3]);
        assert_eq!(alloc.wfs[1].sreg_offset, 16 * 4);
        assert_eq!(alloc.wfs[1].vreg_offset, 0);
        assert_eq!(mapper.lds_mask().status_count(AllocStatus::Used), 4);
        assert_eq!(mapper.free_wf_slots(0), 9);

        let second = mapper.map_wg(&work_group(2, 16, 8, 0)).unwrap();
        assert_eq!(second.wfs[0].simd_id, 0);
        assert_eq!(second.wfs[0].vreg_offset, 8 * 4);
        assert_eq!(second.wfs[1].simd_id, 1);
    }

    #[test]
    fn failed_mapping_leaves_nothing_reserved() {
        let mut config = CuConfig::default();
        config.num_simd_units = 1;
        config.num_wf_pools = 1;
        config.wf_pool_size = 2;
        let mut mapper = WgMapper::new(&config);

        assert!(mapper.map_wg(&work_group(3, 16, 8, 512)).is_none());
        assert_eq!(mapper.free_wf_slots(0), 2);
        assert_eq!(mapper.sgpr_mask().status_count(AllocStatus::Free), mapper.sgpr_mask().len());
        assert_eq!(mapper.vgpr_mask(0).status_count(AllocStatus::Free), mapper.vgpr_mask(0).len());
        assert_eq!(mapper.lds_mask().status_count(AllocStatus::Free), mapper.lds_mask().len());
    }

    #[test]
    fn unmapping_returns_resources() {
        let config = CuConfig::default();
        let mut mapper = WgMapper::new(&config);
        let whole_lds = work_group(1, 16, 8, config.lds_size);
        let alloc = mapper.map_wg(&whole_lds).unwrap();
        assert!(mapper.map_wg(&whole_lds).is_none());

        mapper.unmap_wg(&alloc);
        assert!(mapper.map_wg(&whole_lds).is_some());
    }
}

use crate::config::CuConfig;
use crate::wavefront::Wavefront;

/// One read or write of `reg_count` consecutive 32-bit registers in a single
/// lane. `wave_offset` is the wavefront's byte offset into the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAccess {
    pub wave_offset: usize,
    pub reg: usize,
    pub reg_count: usize,
    pub lane: usize,
    pub data: Vec<u8>,
}

impl RegisterAccess {
    pub fn new(wave_offset: usize, reg: usize, reg_count: usize, lane: usize) -> Self {
        RegisterAccess {
            wave_offset,
            reg,
            reg_count,
            lane,
            data: vec![0; reg_count * 4],
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

pub trait RegisterFile {
    fn read(&self, access: &mut RegisterAccess);
    fn write(&mut self, access: &RegisterAccess);
    fn byte_size_per_lane(&self) -> usize;
}

/// Flat byte storage; lane `l` of register `r` lives at
/// `wave_offset + r * 4 + l * byte_size_per_lane`.
#[derive(Debug, Clone)]
pub struct SimpleRegisterFile {
    storage: Vec<u8>,
    byte_size_per_lane: usize,
}

impl SimpleRegisterFile {
    pub fn new(byte_size: usize, byte_size_per_lane: usize) -> Self {
        SimpleRegisterFile {
            storage: vec![0; byte_size],
            byte_size_per_lane,
        }
    }

    fn offset(&self, access: &RegisterAccess) -> usize {
        access.wave_offset + access.reg * 4 + access.lane * self.byte_size_per_lane
    }
}

impl RegisterFile for SimpleRegisterFile {
    fn read(&self, access: &mut RegisterAccess) {
        let offset = self.offset(access);
        let size = access.reg_count * 4;
        access.data.resize(size, 0);
        access
            .data
            .copy_from_slice(&self.storage[offset..offset + size]);
    }

    fn write(&mut self, access: &RegisterAccess) {
        let offset = self.offset(access);
        let size = access.data.len().min(access.reg_count * 4);
        self.storage[offset..offset + size].copy_from_slice(&access.data[..size]);
    }

    fn byte_size_per_lane(&self) -> usize {
        self.byte_size_per_lane
    }
}

/// The unit's scalar file plus one vector file per SIMD.
pub struct RegisterFiles {
    pub sgprs: Box<dyn RegisterFile>,
    pub vgprs: Vec<Box<dyn RegisterFile>>,
    wavefront_size: usize,
}

impl RegisterFiles {
    pub fn new(config: &CuConfig) -> Self {
        let vgpr_bytes = config.num_vgprs_per_simd * 4;
        RegisterFiles {
            sgprs: Box::new(SimpleRegisterFile::new(config.num_sgprs * 4, 0)),
            vgprs: (0..config.num_simd_units)
                .map(|_| {
                    Box::new(SimpleRegisterFile::new(
                        vgpr_bytes,
                        vgpr_bytes / config.wavefront_size,
                    )) as Box<dyn RegisterFile>
                })
                .collect(),
            wavefront_size: config.wavefront_size,
        }
    }

    pub fn read_sgprs(&self, wf: &Wavefront, reg: usize, reg_count: usize) -> Vec<u8> {
        let mut access = RegisterAccess::new(wf.sreg_offset, reg, reg_count, 0);
        self.sgprs.read(&mut access);
        access.data
    }

    pub fn write_sgprs(&mut self, wf: &Wavefront, reg: usize, data: Vec<u8>) {
        let reg_count = (data.len() + 3) / 4;
        let access = RegisterAccess::new(wf.sreg_offset, reg, reg_count, 0).with_data(data);
        self.sgprs.write(&access);
    }

    pub fn read_vgprs(&self, wf: &Wavefront, lane: usize, reg: usize, reg_count: usize) -> Vec<u8> {
        let mut access = RegisterAccess::new(wf.vreg_offset, reg, reg_count, lane);
        self.vgprs[wf.simd_id].read(&mut access);
        access.data
    }

    pub fn write_vgprs(&mut self, wf: &Wavefront, lane: usize, reg: usize, data: Vec<u8>) {
        let reg_count = (data.len() + 3) / 4;
        let access = RegisterAccess::new(wf.vreg_offset, reg, reg_count, lane).with_data(data);
        self.vgprs[wf.simd_id].write(&access);
    }

    /// Zeroes every register the wavefront was allocated.
    pub fn clear_wavefront(&mut self, wf: &Wavefront) {
        if wf.vgpr_count > 0 {
            for lane in 0..self.wavefront_size {
                let access = RegisterAccess::new(wf.vreg_offset, 0, wf.vgpr_count, lane);
                self.vgprs[wf.simd_id].write(&access);
            }
        }
        if wf.sgpr_count > 0 {
            let access = RegisterAccess::new(wf.sreg_offset, 0, wf.sgpr_count, 0);
            self.sgprs.write(&access);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::get_u32;
    use crate::protocol::Pid;
    use crate::wavefront::WgId;

    #[test]
    fn lanes_are_strided() {
        let mut file = SimpleRegisterFile::new(4 * 1024, 1024);
        let write = RegisterAccess::new(16, 2, 1, 3).with_data(vec![1, 2, 3, 4]);
        file.write(&write);

        let mut read = RegisterAccess::new(0, 6, 1, 3);
        file.read(&mut read);
        assert_eq!(read.data, vec![1, 2, 3, 4]);

        let mut other_lane = RegisterAccess::new(16, 2, 1, 2);
        file.read(&mut other_lane);
        assert_eq!(other_lane.data, vec![0; 4]);
    }

    #[test]
    fn clear_wavefront_zeroes_only_its_regions() {
        let config = CuConfig::default();
        let mut files = RegisterFiles::new(&config);
        let mut wf = Wavefront::new(WgId(0), Pid(0), 0);
        wf.simd_id = 1;
        wf.sgpr_count = 2;
        wf.vgpr_count = 1;
        wf.sreg_offset = 64;
        wf.vreg_offset = 16;

        files.write_sgprs(&wf, 0, vec![0xff; 8]);
        files.write_sgprs(&wf, 2, vec![0xee; 4]);
        files.write_vgprs(&wf, 63, 0, vec![0xdd; 4]);
        files.clear_wavefront(&wf);

        assert_eq!(get_u32(&files.read_sgprs(&wf, 0, 2), 4), 0);
        assert_eq!(files.read_sgprs(&wf, 2, 1), vec![0xee; 4]);
        assert_eq!(files.read_vgprs(&wf, 63, 0, 1), vec![0; 4]);
    }
}

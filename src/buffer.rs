pub fn set_u32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset] = (value & 0xFF) as u8;
    buffer[offset + 1] = ((value >> 8) & 0xFF) as u8;
    buffer[offset + 2] = ((value >> 16) & 0xFF) as u8;
    buffer[offset + 3] = ((value >> 24) & 0xFF) as u8;
}

pub fn set_u64(buffer: &mut [u8], offset: usize, value: u64) {
    set_u32(buffer, offset, value as u32);
    set_u32(buffer, offset + 4, (value >> 32) as u32);
}

pub fn get_u32(buffer: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buffer[offset..offset + 4]);
    u32::from_le_bytes(arr)
}

pub fn get_u64(buffer: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buffer[offset..offset + 8]);
    u64::from_le_bytes(arr)
}

/// Reads up to four bytes little-endian and zero-extends them.
pub fn get_u32_zext(buffer: &[u8], offset: usize, size: usize) -> u32 {
    buffer[offset..offset + size.min(4)]
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

pub fn get_bits(buffer: &[u8], offset: usize, bit: usize, size: usize) -> u8 {
    ((get_u32(buffer, offset + (bit >> 3)) >> (bit & 0x7)) & ((1 << size) - 1)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extends_sub_dword_values() {
        let buf = [0xAB, 0xCD, 0xEF, 0x01];
        assert_eq!(get_u32_zext(&buf, 0, 1), 0xAB);
        assert_eq!(get_u32_zext(&buf, 0, 2), 0xCDAB);
        assert_eq!(get_u32_zext(&buf, 0, 4), 0x01EF_CDAB);
    }

    #[test]
    fn u64_round_trips_through_halves() {
        let mut buf = [0u8; 8];
        set_u64(&mut buf, 0, 0x0123_4567_89AB_CDEF);
        assert_eq!(get_u32(&buf, 0), 0x89AB_CDEF);
        assert_eq!(get_u64(&buf, 0), 0x0123_4567_89AB_CDEF);
    }
}

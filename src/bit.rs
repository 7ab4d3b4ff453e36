use num_traits::PrimInt;

pub fn get_bits(value: u64, to: usize, from: usize) -> u64 {
    let num = to + 1 - from;
    (value >> from) & ((1u64 << num) - 1)
}

/// `align` must be a power of two.
pub fn align_down<T: PrimInt>(value: T, align: T) -> T {
    value & !(align - T::one())
}

pub fn div_ceil<T: PrimInt>(value: T, divisor: T) -> T {
    (value + divisor - T::one()) / divisor
}

use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::NumCast;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub enum DataType {
    // Floating point
    BF16,
    F16,
    F32,
    F64,
    // Integers
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    // Stored as one byte per element
    Bool,
}

impl DataType {
    pub fn size_in_bits(&self) -> usize {
        match self {
            DataType::BF16 => 16,
            DataType::F16 => 16,
            DataType::F32 => 32,
            DataType::F64 => 64,
            DataType::I8 => 8,
            DataType::U8 => 8,
            DataType::I16 => 16,
            DataType::U16 => 16,
            DataType::I32 => 32,
            DataType::U32 => 32,
            DataType::I64 => 64,
            DataType::U64 => 64,
            DataType::Bool => 8,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::BF16 | DataType::F16 | DataType::F32 | DataType::F64
        )
    }
}

pub trait ArrayElement: NumCast + Pod {
    fn data_type() -> DataType;
}

impl ArrayElement for f16 {
    fn data_type() -> DataType {
        DataType::F16
    }
}

impl ArrayElement for bf16 {
    fn data_type() -> DataType {
        DataType::BF16
    }
}

impl ArrayElement for f32 {
    fn data_type() -> DataType {
        DataType::F32
    }
}

impl ArrayElement for f64 {
    fn data_type() -> DataType {
        DataType::F64
    }
}

impl ArrayElement for i8 {
    fn data_type() -> DataType {
        DataType::I8
    }
}

impl ArrayElement for u8 {
    fn data_type() -> DataType {
        DataType::U8
    }
}

impl ArrayElement for i16 {
    fn data_type() -> DataType {
        DataType::I16
    }
}

impl ArrayElement for u16 {
    fn data_type() -> DataType {
        DataType::U16
    }
}

impl ArrayElement for i32 {
    fn data_type() -> DataType {
        DataType::I32
    }
}

impl ArrayElement for u32 {
    fn data_type() -> DataType {
        DataType::U32
    }
}

impl ArrayElement for i64 {
    fn data_type() -> DataType {
        DataType::I64
    }
}

impl ArrayElement for u64 {
    fn data_type() -> DataType {
        DataType::U64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::BF16.size_in_bytes(), 2);
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::I64.size_in_bytes(), 8);
        assert_eq!(DataType::Bool.size_in_bytes(), 1);
    }

    #[test]
    fn test_element_data_types() {
        assert_eq!(<f32 as ArrayElement>::data_type(), DataType::F32);
        assert_eq!(<bf16 as ArrayElement>::data_type(), DataType::BF16);
        assert!(DataType::F16.is_floating_point());
        assert!(!DataType::U8.is_floating_point());
    }
}

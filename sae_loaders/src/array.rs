use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

use crate::{ArrayElement, DataType, Device};

/// A dense, fully materialized tensor owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    buffer: Box<[u8]>,
    shape: Box<[usize]>,
    data_type: DataType,
    device: Device,
}

#[derive(Debug, Error)]
pub enum ArraySizeError {
    #[error(
        "Size mismatch: array of shape {shape:?} and data type \
        {data_type:?} expected to be {expected_size} bytes, got {actual_size} bytes."
    )]
    Mismatch {
        data_type: DataType,
        shape: Box<[usize]>,
        expected_size: usize,
        actual_size: usize,
    },
    #[error("Array of shape {shape:?} and data type {data_type:?} does not fit in memory.")]
    Overflow {
        data_type: DataType,
        shape: Box<[usize]>,
    },
}

/// Byte size of a dense array, `None` when it overflows `usize`.
pub fn size_for_shape(
    shape: &[usize],
    data_type: DataType,
) -> Option<usize> {
    shape
        .iter()
        .try_fold(data_type.size_in_bytes(), |size, &dim| size.checked_mul(dim))
}

impl Array {
    // Constructors
    pub fn from_bytes(
        bytes: Vec<u8>,
        shape: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Self, ArraySizeError> {
        let Some(expected_size) = size_for_shape(shape, data_type) else {
            return Err(ArraySizeError::Overflow {
                data_type,
                shape: shape.into(),
            });
        };
        if bytes.len() != expected_size {
            return Err(ArraySizeError::Mismatch {
                data_type,
                shape: shape.into(),
                expected_size,
                actual_size: bytes.len(),
            });
        }
        Ok(Self {
            buffer: bytes.into_boxed_slice(),
            shape: shape.into(),
            data_type,
            device,
        })
    }

    pub fn from_elements<T: ArrayElement>(
        elements: &[T],
        shape: &[usize],
        device: Device,
    ) -> Result<Self, ArraySizeError> {
        Self::from_bytes(
            bytemuck::cast_slice(elements).to_vec(),
            shape,
            T::data_type(),
            device,
        )
    }

    // Getters
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn device(&self) -> Device {
        self.device
    }

    // Utility
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Zero-copy typed access. `None` when `T` does not match the stored data
    /// type or the buffer is not aligned for `T`.
    pub fn as_slice<T: ArrayElement>(&self) -> Option<&[T]> {
        if T::data_type() != self.data_type {
            return None;
        }
        bytemuck::try_cast_slice(&self.buffer).ok()
    }

    /// Copies the elements out, independent of buffer alignment.
    pub fn to_vec<T: ArrayElement>(&self) -> Option<Vec<T>> {
        if T::data_type() != self.data_type {
            return None;
        }
        Some(
            self.buffer
                .chunks_exact(size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }

    pub fn to_ndarray<T: ArrayElement>(&self) -> Option<ArrayD<T>> {
        let elements = self.to_vec::<T>()?;
        ArrayD::from_shape_vec(IxDyn(self.shape()), elements).ok()
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn test_from_elements() {
        let array =
            Array::from_elements(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], Device::Cpu)
                .unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.data_type(), DataType::F32);
        assert_eq!(array.num_elements(), 6);
        assert_eq!(array.size(), 24);

        let view = array.to_ndarray::<f32>().unwrap();
        assert!(is_close!(view[&[1usize, 2][..]], 6.0f32));
        assert!(array.to_vec::<f16>().is_none());
    }

    #[test]
    fn test_size_mismatch() {
        let error =
            Array::from_bytes(vec![0u8; 7], &[2], DataType::F32, Device::Cpu)
                .unwrap_err();
        let ArraySizeError::Mismatch {
            expected_size,
            actual_size,
            ..
        } = error
        else {
            panic!("expected a size mismatch");
        };
        assert_eq!(expected_size, 8);
        assert_eq!(actual_size, 7);
    }

    #[test]
    fn test_size_overflow() {
        assert_eq!(size_for_shape(&[2, 3], DataType::BF16), Some(12));
        assert_eq!(size_for_shape(&[], DataType::F64), Some(8));
        assert_eq!(size_for_shape(&[1 << 62, 4], DataType::F32), None);
        assert!(matches!(
            Array::from_bytes(Vec::new(), &[1 << 62, 4], DataType::F32, Device::Cpu),
            Err(ArraySizeError::Overflow { .. })
        ));
    }

    #[test]
    fn test_scalar() {
        let array =
            Array::from_bytes(vec![0u8; 2], &[], DataType::F16, Device::Metal)
                .unwrap();
        assert_eq!(array.size(), 2);
        assert_eq!(array.num_elements(), 1);
        assert_eq!(array.device(), Device::Metal);
        assert_eq!(array.to_vec::<f16>().unwrap(), vec![f16::ZERO]);
    }
}

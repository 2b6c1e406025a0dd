// This code is based on the safetensors implementation: https://docs.rs/safetensors/latest/src/safetensors/tensor.rs.html

use std::{collections::HashMap, fs::File};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::read_exact_at;
use crate::DataType;

#[derive(Debug, Error)]
pub enum HeaderLoadingError {
    #[error("The header is an invalid UTF-8 string and cannot be read.")]
    InvalidHeader,
    #[error(
        "The header does contain a valid string, but it is not valid JSON: {0}"
    )]
    InvalidHeaderDeserialization(serde_json::Error),
    #[error("The header is larger than 100Mo which is considered too large.")]
    HeaderTooLarge,
    #[error("The header is smaller than 8 bytes.")]
    HeaderTooSmall,
    #[error("The header length is invalid.")]
    InvalidHeaderLength,
    #[error("Tensor \"{0}\" has invalid data offsets.")]
    InvalidOffsets(String),
    #[error("Tensor \"{0}\" has a shape whose byte size overflows.")]
    ShapeOverflow(String),
    #[error("Failed to inspect the file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tensor \"{name}\" uses unsupported dtype {dtype:?}.")]
    UnsupportedDtype {
        name: String,
        dtype: Dtype,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "__metadata__")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(flatten)]
    pub tensors: HashMap<String, TensorInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TensorInfo {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data_offsets: (usize, usize),
}

#[derive(
    Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Ord, PartialOrd,
)]
#[non_exhaustive]
pub enum Dtype {
    /// Boolan type
    BOOL,
    /// Unsigned byte
    U8,
    /// Signed byte
    I8,
    /// FP8 <https://arxiv.org/pdf/2209.05433.pdf>_
    #[allow(non_camel_case_types)]
    F8_E5M2,
    /// FP8 <https://arxiv.org/pdf/2209.05433.pdf>_
    #[allow(non_camel_case_types)]
    F8_E4M3,
    /// Signed integer (16-bit)
    I16,
    /// Unsigned integer (16-bit)
    U16,
    /// Half-precision floating point
    F16,
    /// Brain floating point
    BF16,
    /// Signed integer (32-bit)
    I32,
    /// Unsigned integer (32-bit)
    U32,
    /// Floating point (32-bit)
    F32,
    /// Floating point (64-bit)
    F64,
    /// Signed integer (64-bit)
    I64,
    /// Unsigned integer (64-bit)
    U64,
}

impl Dtype {
    pub fn data_type(self) -> Option<DataType> {
        match self {
            Dtype::BOOL => Some(DataType::Bool),
            Dtype::U8 => Some(DataType::U8),
            Dtype::I8 => Some(DataType::I8),
            Dtype::I16 => Some(DataType::I16),
            Dtype::U16 => Some(DataType::U16),
            Dtype::F16 => Some(DataType::F16),
            Dtype::BF16 => Some(DataType::BF16),
            Dtype::I32 => Some(DataType::I32),
            Dtype::U32 => Some(DataType::U32),
            Dtype::F32 => Some(DataType::F32),
            Dtype::F64 => Some(DataType::F64),
            Dtype::I64 => Some(DataType::I64),
            Dtype::U64 => Some(DataType::U64),
            Dtype::F8_E5M2 | Dtype::F8_E4M3 => None,
        }
    }
}

impl From<DataType> for Dtype {
    fn from(dtype: DataType) -> Self {
        match dtype {
            DataType::Bool => Dtype::BOOL,
            DataType::U8 => Dtype::U8,
            DataType::I8 => Dtype::I8,
            DataType::I16 => Dtype::I16,
            DataType::U16 => Dtype::U16,
            DataType::F16 => Dtype::F16,
            DataType::BF16 => Dtype::BF16,
            DataType::I32 => Dtype::I32,
            DataType::U32 => Dtype::U32,
            DataType::F32 => Dtype::F32,
            DataType::F64 => Dtype::F64,
            DataType::I64 => Dtype::I64,
            DataType::U64 => Dtype::U64,
        }
    }
}

const MAX_HEADER_SIZE: usize = 100_000_000;

/// Returns the absolute offset of the data section and the parsed header.
pub fn read_metadata(
    file: &File
) -> Result<(usize, HashMetadata), HeaderLoadingError> {
    let mut header_buffer = [0u8; size_of::<u64>()];
    read_exact_at(file, &mut header_buffer, 0)
        .map_err(|_| HeaderLoadingError::HeaderTooSmall)?;
    let metadata_size: usize = u64::from_le_bytes(header_buffer)
        .try_into()
        .map_err(|_| HeaderLoadingError::HeaderTooLarge)?;
    if metadata_size > MAX_HEADER_SIZE {
        return Err(HeaderLoadingError::InvalidHeaderLength);
    }

    let stop = metadata_size
        .checked_add(8)
        .ok_or(HeaderLoadingError::InvalidHeaderLength)?;
    let mut json_buffer = vec![0u8; metadata_size];
    read_exact_at(file, &mut json_buffer, 8)
        .map_err(|_| HeaderLoadingError::InvalidHeader)?;
    let string = core::str::from_utf8(&json_buffer)
        .map_err(|_| HeaderLoadingError::InvalidHeader)?;
    let metadata: HashMetadata = serde_json::from_str(string)
        .map_err(HeaderLoadingError::InvalidHeaderDeserialization)?;
    Ok((stop, metadata))
}

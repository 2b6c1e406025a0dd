use std::{
    collections::{HashMap, hash_map::Keys},
    fs::File,
};

use thiserror::Error;

use super::{
    read_exact_at,
    safetensors_metadata::{
        HashMetadata as STMetadata, HeaderLoadingError,
        read_metadata as read_st_metadata,
    },
};
use crate::{
    Array, DataType, Device,
    array::{ArraySizeError, size_for_shape},
};

#[derive(Debug, Error)]
pub enum ParameterLoaderError {
    #[error("Array with key \"{0}\" not found.")]
    KeyNotFound(String),
    #[error("Invalid data for \"{key}\": {source}")]
    InvalidSize {
        key: String,
        source: ArraySizeError,
    },
    #[error("Failed to read data for \"{key}\": {source}")]
    ArrayLoadingError {
        key: String,
        source: std::io::Error,
    },
}

pub struct ParameterMetadata {
    shape: Box<[usize]>,
    data_type: DataType,
    offset: usize,
    size: usize,
}

/// Every entry must lie inside `[global_offset, file_len)`.
fn st_metadata_into_index(
    global_offset: usize,
    file_len: usize,
    st_metadata: STMetadata,
) -> Result<HashMap<String, ParameterMetadata>, HeaderLoadingError> {
    st_metadata
        .tensors
        .into_iter()
        .map(|(key, value)| {
            let (local_begin, local_end) = value.data_offsets;
            let Some(data_type) = value.dtype.data_type() else {
                return Err(HeaderLoadingError::UnsupportedDtype {
                    name: key,
                    dtype: value.dtype,
                });
            };
            if size_for_shape(&value.shape, data_type).is_none() {
                return Err(HeaderLoadingError::ShapeOverflow(key));
            }
            let in_bounds = global_offset
                .checked_add(local_end)
                .is_some_and(|end| end <= file_len);
            if local_end < local_begin || !in_bounds {
                return Err(HeaderLoadingError::InvalidOffsets(key));
            }
            let weight_metadata = ParameterMetadata {
                shape: value.shape.into(),
                data_type,
                offset: global_offset + local_begin,
                size: local_end - local_begin,
            };
            Ok((key, weight_metadata))
        })
        .collect()
}

/// Reads named tensors out of one safetensors container.
///
/// Borrows the file; every array it returns is an independent copy, so the
/// file can be closed as soon as loading finishes.
pub struct ParameterLoader<'file> {
    file: &'file File,
    index: HashMap<String, ParameterMetadata>,
    device: Device,
}

impl<'file> ParameterLoader<'file> {
    pub fn new(
        file: &'file File,
        device: Device,
    ) -> Result<Self, HeaderLoadingError> {
        let (global_offset, st_metadata) = read_st_metadata(file)?;
        let file_len =
            usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
        let index =
            st_metadata_into_index(global_offset, file_len, st_metadata)?;
        Ok(ParameterLoader {
            file,
            index,
            device,
        })
    }

    pub fn keys(&self) -> Keys<'_, String, ParameterMetadata> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Result<Array, ParameterLoaderError> {
        let metadata_entry = self
            .index
            .get(key)
            .ok_or(ParameterLoaderError::KeyNotFound(key.to_string()))?;
        let mut bytes = vec![0u8; metadata_entry.size];
        read_exact_at(self.file, &mut bytes, metadata_entry.offset as u64)
            .map_err(|source| ParameterLoaderError::ArrayLoadingError {
                key: key.to_string(),
                source,
            })?;
        Array::from_bytes(
            bytes,
            &metadata_entry.shape,
            metadata_entry.data_type,
            self.device,
        )
        .map_err(|source| ParameterLoaderError::InvalidSize {
            key: key.to_string(),
            source,
        })
    }

    /// Materializes every stored tensor.
    pub fn load_all(&self) -> Result<HashMap<String, Array>, ParameterLoaderError> {
        self.keys().map(|key| Ok((key.clone(), self.get(key)?))).collect()
    }
}

mod loader;
pub use loader::{ParameterLoader, ParameterLoaderError};
mod safetensors_metadata;
mod torch_checkpoint;

pub use safetensors_metadata::read_metadata as read_safetensors_metadata;
pub use safetensors_metadata::{
    Dtype, HashMetadata, HeaderLoadingError, TensorInfo,
};
pub use torch_checkpoint::{
    TorchCheckpoint, TorchCheckpointError, TorchDType, TorchTensor,
    TorchTensorSpec,
};

use std::{fs::File, io};

/// Positional read that leaves no cursor state behind, so one file handle
/// can serve concurrent readers.
#[cfg(unix)]
pub(crate) fn read_exact_at(
    file: &File,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(
    file: &File,
    mut buf: &mut [u8],
    mut offset: u64,
) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            },
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Writes `tensors` back to back after an unpadded header.
#[cfg(test)]
pub(crate) fn write_test_safetensors(
    path: &std::path::Path,
    tensors: &[(&str, &crate::Array)],
) {
    use std::collections::HashMap;

    let mut header = HashMetadata {
        metadata: None,
        tensors: HashMap::new(),
    };
    let mut data = Vec::new();
    for (name, array) in tensors {
        let begin = data.len();
        data.extend_from_slice(array.as_bytes());
        header.tensors.insert(
            name.to_string(),
            TensorInfo {
                dtype: Dtype::from(array.data_type()),
                shape: array.shape().to_vec(),
                data_offsets: (begin, data.len()),
            },
        );
    }
    let header_bytes = serde_json::to_vec(&header).unwrap();
    let mut bytes = (header_bytes.len() as u64).to_le_bytes().to_vec();
    bytes.extend(header_bytes);
    bytes.extend(data);
    std::fs::write(path, bytes).unwrap();
}

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use super::TensorMap;
use crate::{
    ArtifactFetcher, Device, LoaderError,
    parameters::{ParameterLoader, TorchCheckpoint},
};

/// Joins a repository folder and a file name the way hub paths are written.
pub(super) fn repo_file(
    folder: &str,
    filename: &str,
) -> String {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{folder}/{filename}")
    }
}

pub(super) fn fetch_artifact(
    fetcher: &dyn ArtifactFetcher,
    repo_id: &str,
    filename: &str,
    force_refetch: bool,
) -> Result<PathBuf, LoaderError> {
    log::debug!("fetching {repo_id}/{filename} (force_refetch: {force_refetch})");
    fetcher
        .fetch(repo_id, filename, force_refetch)
        .map_err(|error| LoaderError::not_found(repo_id, filename, error))
}

pub(super) fn read_json_object(
    path: &Path,
    repo_id: &str,
    filename: &str,
) -> Result<Map<String, Value>, LoaderError> {
    let file =
        File::open(path).map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    match value {
        Value::Object(fields) => {
            log::debug!("{repo_id}/{filename}: {} keys", fields.len());
            Ok(fields)
        },
        other => Err(LoaderError::malformed(
            repo_id,
            filename,
            format!("expected a JSON object, found {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads every tensor of a safetensors container. The file handle is closed
/// before this returns.
pub(super) fn materialize_safetensors(
    path: &Path,
    device: Device,
    repo_id: &str,
    filename: &str,
) -> Result<TensorMap, LoaderError> {
    let file =
        File::open(path).map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    let loader = ParameterLoader::new(&file, device)
        .map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    let tensors = loader
        .load_all()
        .map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    non_empty(tensors, repo_id, filename)
}

pub(super) fn materialize_torch_checkpoint(
    path: &Path,
    device: Device,
    repo_id: &str,
    filename: &str,
) -> Result<TensorMap, LoaderError> {
    let mut checkpoint = TorchCheckpoint::open_from_path(path)
        .map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    let tensors = checkpoint
        .load_all(device)
        .map_err(|error| LoaderError::malformed(repo_id, filename, error))?;
    non_empty(tensors, repo_id, filename)
}

fn non_empty(
    tensors: TensorMap,
    repo_id: &str,
    filename: &str,
) -> Result<TensorMap, LoaderError> {
    if tensors.is_empty() {
        return Err(LoaderError::malformed(repo_id, filename, "container holds no tensors"));
    }
    log::debug!("{repo_id}/{filename}: {} tensors", tensors.len());
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_repo_file() {
        assert_eq!(repo_file("layer_0", "cfg.json"), "layer_0/cfg.json");
        assert_eq!(repo_file("layer_0/", "cfg.json"), "layer_0/cfg.json");
        assert_eq!(repo_file("", "cfg.json"), "cfg.json");
    }

    #[test]
    fn test_read_json_object_rejects_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");

        fs::write(&path, b"[1, 2, 3]").unwrap();
        let error = read_json_object(&path, "org/repo", "cfg.json").unwrap_err();
        assert!(matches!(error, LoaderError::MalformedArtifact { .. }));
        assert!(error.to_string().contains("an array"));

        fs::write(&path, b"{\"d_in\": ").unwrap();
        assert!(matches!(
            read_json_object(&path, "org/repo", "cfg.json"),
            Err(LoaderError::MalformedArtifact { .. })
        ));

        fs::write(&path, b"{\"d_in\": 4}").unwrap();
        let fields = read_json_object(&path, "org/repo", "cfg.json").unwrap();
        assert_eq!(fields.get("d_in"), Some(&Value::from(4)));
    }

    #[test]
    fn test_garbage_weights_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sae_weights.safetensors");
        fs::write(&path, b"definitely not a tensor container").unwrap();
        assert!(matches!(
            materialize_safetensors(&path, Device::Cpu, "org/repo", "sae_weights.safetensors"),
            Err(LoaderError::MalformedArtifact { .. })
        ));
        assert!(matches!(
            materialize_torch_checkpoint(&path, Device::Cpu, "org/repo", "sae.pt"),
            Err(LoaderError::MalformedArtifact { .. })
        ));
    }
}

use std::path::Path;

use super::{
    PretrainedSaeLoader, TensorMap,
    materialize::{fetch_artifact, materialize_safetensors, read_json_object, repo_file},
};
use crate::{ArtifactFetcher, ConfigDataType, Device, LoaderError, SaeConfig};

pub const SAE_LENS_CONFIG_FILENAME: &str = "cfg.json";
pub const SAE_LENS_WEIGHTS_FILENAME: &str = "sae_weights.safetensors";

/// Repository label used in errors for artifacts read straight from disk.
const LOCAL_REPO: &str = "<local>";

/// Artifacts already stored in the canonical layout: `<folder>/cfg.json`
/// next to `<folder>/sae_weights.safetensors`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaeLensLoader;

impl PretrainedSaeLoader for SaeLensLoader {
    fn name(&self) -> &'static str {
        "sae_lens"
    }

    fn load(
        &self,
        fetcher: &dyn ArtifactFetcher,
        repo_id: &str,
        source_path: &str,
        device: Option<Device>,
        force_refetch: bool,
    ) -> Result<(SaeConfig, TensorMap), LoaderError> {
        let device = Device::or_default(device);

        let cfg_name = repo_file(source_path, SAE_LENS_CONFIG_FILENAME);
        let cfg_path = fetch_artifact(fetcher, repo_id, &cfg_name, force_refetch)?;
        let config = read_config(
            &cfg_path,
            repo_id,
            &cfg_name,
            source_path,
            device,
            ConfigDataType::default(),
        )?;

        let weights_name = repo_file(source_path, SAE_LENS_WEIGHTS_FILENAME);
        let weights_path = fetch_artifact(fetcher, repo_id, &weights_name, force_refetch)?;
        let tensors = materialize_safetensors(&weights_path, device, repo_id, &weights_name)?;

        log::info!(
            "{}: loaded {repo_id}/{source_path} ({} tensors on {device})",
            self.name(),
            tensors.len()
        );
        Ok((config, tensors))
    }
}

/// Loads a canonical config/weights pair that is already on disk.
///
/// `dtype` defaults to `float32`.
pub fn load_sae_lens_components(
    cfg_path: &Path,
    weights_path: &Path,
    device: Device,
    dtype: Option<ConfigDataType>,
) -> Result<(SaeConfig, TensorMap), LoaderError> {
    let cfg_name = cfg_path.display().to_string();
    let config = read_config(
        cfg_path,
        LOCAL_REPO,
        &cfg_name,
        &cfg_name,
        device,
        dtype.unwrap_or_default(),
    )?;
    let weights_name = weights_path.display().to_string();
    let tensors = materialize_safetensors(weights_path, device, LOCAL_REPO, &weights_name)?;
    Ok((config, tensors))
}

fn read_config(
    cfg_path: &Path,
    repo_id: &str,
    cfg_name: &str,
    source_path: &str,
    device: Device,
    dtype: ConfigDataType,
) -> Result<SaeConfig, LoaderError> {
    let mut config = SaeConfig::from_map(read_json_object(cfg_path, repo_id, cfg_name)?);
    config.set_placement(device, dtype);
    config
        .validate()
        .map_err(|error| LoaderError::invalid_config(repo_id, source_path, error))?;
    Ok(config)
}

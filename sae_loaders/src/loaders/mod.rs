use std::collections::HashMap;

use crate::{Array, ArtifactFetcher, Device, LoaderError, SaeConfig};

mod connor_rob_hook_z;
pub use connor_rob_hook_z::{
    CONNOR_ROB_HOOK_Z_TABLE, ConnorRobHookZLoader, companion_config_filename,
};

mod materialize;

mod sae_lens;
pub use sae_lens::{
    SAE_LENS_CONFIG_FILENAME, SAE_LENS_WEIGHTS_FILENAME, SaeLensLoader,
    load_sae_lens_components,
};

/// Parameter name to fully materialized tensor.
pub type TensorMap = HashMap<String, Array>;

/// One on-disk checkpoint convention, normalized to the canonical config.
///
/// Implementations hold no per-call state; every `load` builds its result
/// from the fetched bytes alone.
pub trait PretrainedSaeLoader: Send + Sync {
    /// Name the loader is registered under.
    fn name(&self) -> &'static str;

    /// Fetches the artifacts under `source_path` in `repo_id` and returns the
    /// canonical config together with every stored tensor.
    ///
    /// When `device` is `None` the loader picks
    /// [`Device::default_available`].
    fn load(
        &self,
        fetcher: &dyn ArtifactFetcher,
        repo_id: &str,
        source_path: &str,
        device: Option<Device>,
        force_refetch: bool,
    ) -> Result<(SaeConfig, TensorMap), LoaderError>;
}

use std::{collections::BTreeMap, sync::LazyLock};

use crate::{
    Device, HubFetcher, LoaderError, SaeConfig,
    loaders::{ConnorRobHookZLoader, PretrainedSaeLoader, SaeLensLoader, TensorMap},
};

static BUILTIN_LOADERS: [&dyn PretrainedSaeLoader; 2] =
    [&SaeLensLoader, &ConnorRobHookZLoader];

static REGISTRY: LazyLock<LoaderRegistry> =
    LazyLock::new(|| LoaderRegistry::from_loaders(&BUILTIN_LOADERS));

/// Name to loader table, built once and never mutated afterwards.
pub struct LoaderRegistry {
    loaders: BTreeMap<&'static str, &'static dyn PretrainedSaeLoader>,
}

impl LoaderRegistry {
    pub fn global() -> &'static Self {
        &REGISTRY
    }

    fn from_loaders(loaders: &[&'static dyn PretrainedSaeLoader]) -> Self {
        Self {
            loaders: loaders.iter().map(|loader| (loader.name(), *loader)).collect(),
        }
    }

    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<&'static dyn PretrainedSaeLoader, LoaderError> {
        self.loaders.get(name).copied().ok_or_else(|| LoaderError::UnknownLoaderKind {
            name: name.to_string(),
            known: self.names(),
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.loaders.keys().copied().collect()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.loaders.contains_key(name)
    }
}

pub fn loader_for(name: &str) -> Result<&'static dyn PretrainedSaeLoader, LoaderError> {
    LoaderRegistry::global().resolve(name)
}

/// Resolves `loader_name` and loads through the hub configured by the
/// environment.
pub fn load_pretrained_sae(
    loader_name: &str,
    repo_id: &str,
    source_path: &str,
    device: Option<Device>,
    force_refetch: bool,
) -> Result<(SaeConfig, TensorMap), LoaderError> {
    let loader = loader_for(loader_name)?;
    let fetcher = HubFetcher::from_env()
        .map_err(|error| LoaderError::not_found(repo_id, source_path, error))?;
    loader.load(&fetcher, repo_id, source_path, device, force_refetch)
}

use std::path::PathBuf;

use hf_hub::{
    Cache,
    api::sync::{Api, ApiBuilder},
};

use super::fetcher::{ArtifactFetcher, FetchError, validate_request};
use crate::env_utils::{EnvVar, default_cache_dir};

/// Fetches model repository files from the Hugging Face hub, backed by the
/// shared on-disk hub cache.
pub struct HubFetcher {
    api: Api,
    cache_dir: PathBuf,
    offline: bool,
}

#[derive(Debug, Clone)]
pub struct HubFetcherBuilder {
    cache_dir: PathBuf,
    token: Option<String>,
    endpoint: Option<String>,
    offline: bool,
    progress: bool,
}

impl HubFetcherBuilder {
    fn from_env() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            token: EnvVar::HubToken.get(),
            endpoint: EnvVar::HubEndpoint.get(),
            offline: EnvVar::HubOffline.is_enabled(),
            progress: false,
        }
    }

    pub fn with_cache_dir(
        mut self,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_token(
        mut self,
        token: Option<String>,
    ) -> Self {
        self.token = token;
        self
    }

    pub fn with_endpoint(
        mut self,
        endpoint: Option<String>,
    ) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_offline(
        mut self,
        offline: bool,
    ) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_progress(
        mut self,
        progress: bool,
    ) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Result<HubFetcher, FetchError> {
        let mut builder = ApiBuilder::new()
            .with_progress(self.progress)
            .with_cache_dir(self.cache_dir.clone());
        // Without an explicit token the hub's stored login is kept.
        if self.token.is_some() {
            builder = builder.with_token(self.token);
        }
        if let Some(endpoint) = self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let api = builder.build()?;
        log::debug!(
            "hub fetcher ready (cache: {}, offline: {})",
            self.cache_dir.display(),
            self.offline
        );
        Ok(HubFetcher {
            api,
            cache_dir: self.cache_dir,
            offline: self.offline,
        })
    }
}

impl HubFetcher {
    /// Builder seeded from the process environment.
    pub fn builder() -> HubFetcherBuilder {
        HubFetcherBuilder::from_env()
    }

    pub fn from_env() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }
}

impl ArtifactFetcher for HubFetcher {
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        force_refetch: bool,
    ) -> Result<PathBuf, FetchError> {
        validate_request(repo_id, filename)?;
        if self.offline {
            return Cache::new(self.cache_dir.clone())
                .model(repo_id.to_string())
                .get(filename)
                .ok_or_else(|| FetchError::NotCached(format!("{repo_id}/{filename}")));
        }

        let repo = self.api.model(repo_id.to_string());
        let path = if force_refetch {
            repo.download(filename)?
        } else {
            repo.get(filename)?
        };
        Ok(path)
    }
}

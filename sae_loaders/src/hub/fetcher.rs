use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Repository id must not be empty")]
    EmptyRepoId,
    #[error("Invalid artifact path \"{0}\"")]
    InvalidPath(String),
    #[error("\"{filename}\" does not exist in \"{repo_id}\"")]
    NotFound {
        repo_id: String,
        filename: String,
    },
    #[error("\"{0}\" is not cached and the hub is offline")]
    NotCached(String),
    #[error("Hub request failed: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),
}

/// Obtains one remote file and hands back a local path to it.
///
/// Implementations own caching, retries and transport. Loaders only tell
/// "file obtained" apart from "file not obtainable".
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        force_refetch: bool,
    ) -> Result<PathBuf, FetchError>;
}

impl<F: ArtifactFetcher + ?Sized> ArtifactFetcher for &F {
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        force_refetch: bool,
    ) -> Result<PathBuf, FetchError> {
        (**self).fetch(repo_id, filename, force_refetch)
    }
}

pub(crate) fn validate_request(
    repo_id: &str,
    filename: &str,
) -> Result<(), FetchError> {
    if repo_id.trim().is_empty() {
        return Err(FetchError::EmptyRepoId);
    }
    let escapes = |path: &str| {
        Path::new(path).components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        })
    };
    if repo_id.split('/').any(|part| part.is_empty()) || escapes(repo_id) {
        return Err(FetchError::InvalidPath(repo_id.to_string()));
    }
    if filename.is_empty() || escapes(filename) {
        return Err(FetchError::InvalidPath(filename.to_string()));
    }
    Ok(())
}

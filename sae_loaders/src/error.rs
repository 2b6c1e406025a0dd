use thiserror::Error;

use crate::config::{ConfigError, InvalidField, describe};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of a single load call. No partial result accompanies
/// any of these.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Unknown loader \"{name}\" (registered: {})", .known.join(", "))]
    UnknownLoaderKind {
        name: String,
        known: Vec<&'static str>,
    },
    #[error("Could not obtain \"{filename}\" from \"{repo_id}\": {reason}")]
    RemoteArtifactNotFound {
        repo_id: String,
        filename: String,
        #[source]
        reason: BoxedError,
    },
    #[error("Malformed artifact \"{filename}\" in \"{repo_id}\": {reason}")]
    MalformedArtifact {
        repo_id: String,
        filename: String,
        #[source]
        reason: BoxedError,
    },
    #[error(
        "Invalid config for \"{source_path}\" in \"{repo_id}\": {}",
        describe(.missing, .invalid)
    )]
    ConfigValidationError {
        repo_id: String,
        source_path: String,
        missing: Vec<String>,
        invalid: Vec<InvalidField>,
    },
}

impl LoaderError {
    pub fn not_found(
        repo_id: &str,
        filename: &str,
        reason: impl Into<BoxedError>,
    ) -> Self {
        LoaderError::RemoteArtifactNotFound {
            repo_id: repo_id.to_string(),
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(
        repo_id: &str,
        filename: &str,
        reason: impl Into<BoxedError>,
    ) -> Self {
        LoaderError::MalformedArtifact {
            repo_id: repo_id.to_string(),
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(
        repo_id: &str,
        source_path: &str,
        error: ConfigError,
    ) -> Self {
        LoaderError::ConfigValidationError {
            repo_id: repo_id.to_string(),
            source_path: source_path.to_string(),
            missing: error.missing,
            invalid: error.invalid,
        }
    }

    /// Repository the failed call targeted, if it got that far.
    pub fn repo_id(&self) -> Option<&str> {
        match self {
            LoaderError::UnknownLoaderKind { .. } => None,
            LoaderError::RemoteArtifactNotFound { repo_id, .. }
            | LoaderError::MalformedArtifact { repo_id, .. }
            | LoaderError::ConfigValidationError { repo_id, .. } => Some(repo_id),
        }
    }
}

use std::path::PathBuf;

use super::fetcher::{ArtifactFetcher, FetchError, validate_request};

/// Serves artifacts from a local mirror laid out as `<root>/<repo_id>/<filename>`.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl ArtifactFetcher for LocalFetcher {
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        _force_refetch: bool,
    ) -> Result<PathBuf, FetchError> {
        validate_request(repo_id, filename)?;
        let path = self.root.join(repo_id).join(filename);
        if !path.is_file() {
            return Err(FetchError::NotFound {
                repo_id: repo_id.to_string(),
                filename: filename.to_string(),
            });
        }
        Ok(path)
    }
}

use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvVar {
    HubToken,
    HubEndpoint,
    HubHome,
    HubOffline,
    CacheDir,
    ForceCpu,
    CudaVisibleDevices,
}

impl EnvVar {
    pub fn key(&self) -> &'static str {
        match self {
            EnvVar::HubToken => "HF_TOKEN",
            EnvVar::HubEndpoint => "HF_ENDPOINT",
            EnvVar::HubHome => "HF_HOME",
            EnvVar::HubOffline => "HF_HUB_OFFLINE",
            EnvVar::CacheDir => "SAE_LOADERS_CACHE",
            EnvVar::ForceCpu => "SAE_LOADERS_FORCE_CPU",
            EnvVar::CudaVisibleDevices => "CUDA_VISIBLE_DEVICES",
        }
    }

    pub fn value(&self) -> String {
        std::env::var(self.key()).unwrap_or_default()
    }

    /// The value, or `None` when unset or blank.
    pub fn get(&self) -> Option<String> {
        let value = self.value();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn is_enabled(&self) -> bool {
        is_truthy(&self.value())
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    let upper = value.trim().to_ascii_uppercase();
    matches!(upper.as_str(), "1" | "YES" | "TRUE" | "ON")
}

/// Cache directory used for hub downloads.
///
/// * `$SAE_LOADERS_CACHE` when set
/// * `$HF_HOME/hub` when set
/// * `$HOME/.cache/huggingface/hub` otherwise
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = EnvVar::CacheDir.get() {
        return PathBuf::from(dir);
    }
    if let Some(home) = EnvVar::HubHome.get() {
        return PathBuf::from(home).join("hub");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| String::from("."));
    PathBuf::from(home).join(".cache").join("huggingface").join("hub")
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::DataType;

/// Numeric precision as written in config files.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default)]
#[serde(rename = "DataType")]
#[serde(rename_all = "lowercase")]
pub enum ConfigDataType {
    BFloat16,
    Float16,
    #[default]
    Float32,
    Float64,
}

impl ConfigDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigDataType::BFloat16 => "bfloat16",
            ConfigDataType::Float16 => "float16",
            ConfigDataType::Float32 => "float32",
            ConfigDataType::Float64 => "float64",
        }
    }
}

impl fmt::Display for ConfigDataType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigDataType {
    type Err = String;

    /// Accepts the canonical names plus the `torch.` prefixed and short
    /// spellings found in older checkpoints.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("torch.").unwrap_or(name);
        match name {
            "bfloat16" | "bf16" => Ok(ConfigDataType::BFloat16),
            "float16" | "fp16" | "half" => Ok(ConfigDataType::Float16),
            "float32" | "fp32" | "float" => Ok(ConfigDataType::Float32),
            "float64" | "fp64" | "double" => Ok(ConfigDataType::Float64),
            _ => Err(format!("unsupported dtype \"{s}\"")),
        }
    }
}

impl From<ConfigDataType> for DataType {
    fn from(dtype: ConfigDataType) -> Self {
        match dtype {
            ConfigDataType::BFloat16 => DataType::BF16,
            ConfigDataType::Float16 => DataType::F16,
            ConfigDataType::Float32 => DataType::F32,
            ConfigDataType::Float64 => DataType::F64,
        }
    }
}

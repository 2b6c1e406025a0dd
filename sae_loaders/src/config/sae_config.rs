use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    common::ConfigDataType,
    error::{ConfigError, InvalidField},
    keys,
};
use crate::Device;

/// Canonical SAE config: a flat, ordered mapping from key to JSON scalar.
///
/// Unknown keys are preserved untouched so training metadata survives the
/// round trip; only `device` and `dtype` are rewritten by loaders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaeConfig {
    fields: Map<String, Value>,
}

impl SaeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
        }
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // Typed accessors

    pub fn d_in(&self) -> Option<usize> {
        self.positive_integer(keys::D_IN)
    }

    pub fn d_sae(&self) -> Option<usize> {
        self.positive_integer(keys::D_SAE)
    }

    pub fn dtype(&self) -> Option<ConfigDataType> {
        self.str(keys::DTYPE)?.parse().ok()
    }

    pub fn device(&self) -> Option<Device> {
        self.str(keys::DEVICE)?.parse().ok()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.str(keys::MODEL_NAME)
    }

    pub fn hook_point(&self) -> Option<&str> {
        self.str(keys::HOOK_POINT)
    }

    pub fn hook_point_layer(&self) -> Option<i64> {
        self.fields.get(keys::HOOK_POINT_LAYER)?.as_i64()
    }

    pub fn hook_point_head_index(&self) -> Option<i64> {
        self.fields.get(keys::HOOK_POINT_HEAD_INDEX)?.as_i64()
    }

    fn str(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.fields.get(key)?.as_str()
    }

    fn positive_integer(
        &self,
        key: &str,
    ) -> Option<usize> {
        self.fields
            .get(key)?
            .as_u64()
            .filter(|value| *value > 0)
            .and_then(|value| usize::try_from(value).ok())
    }

    /// Overwrites the runtime placement fields. Persisted values lose.
    pub fn set_placement(
        &mut self,
        device: Device,
        dtype: ConfigDataType,
    ) {
        self.insert(keys::DEVICE, device.to_string());
        self.insert(keys::DTYPE, dtype.as_str());
    }

    /// Checks every mandatory key and reports all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut error = ConfigError {
            missing: Vec::new(),
            invalid: Vec::new(),
        };
        for key in keys::MANDATORY {
            let Some(value) = self.fields.get(key) else {
                error.missing.push(key.to_string());
                continue;
            };
            let (well_typed, expected) = match key {
                keys::DTYPE => (
                    value
                        .as_str()
                        .is_some_and(|s| s.parse::<ConfigDataType>().is_ok()),
                    "dtype name",
                ),
                _ => (self.positive_integer(key).is_some(), "positive integer"),
            };
            if !well_typed {
                error.invalid.push(InvalidField {
                    key: key.to_string(),
                    expected,
                    found: value.clone(),
                });
            }
        }
        if error.is_empty() {
            Ok(())
        } else {
            Err(error)
        }
    }

    pub fn architecture(&self) -> Result<SaeArchitecture, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Typed view of the canonical keys downstream model construction needs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SaeArchitecture {
    pub d_in: usize,
    pub d_sae: usize,
    pub dtype: ConfigDataType,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub activation_fn_str: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub hook_point: Option<String>,
    #[serde(default)]
    pub hook_point_layer: Option<i64>,
    #[serde(default)]
    pub hook_point_head_index: Option<i64>,
    #[serde(default)]
    pub apply_b_dec_to_input: Option<bool>,
    #[serde(default)]
    pub normalize_activations: Option<bool>,
    #[serde(default)]
    pub uses_scaling_factor: Option<bool>,
    #[serde(default)]
    pub context_size: Option<usize>,
    #[serde(default)]
    pub dataset_path: Option<String>,
    #[serde(default)]
    pub prepend_bos: Option<bool>,
    #[serde(default)]
    pub sae_lens_training_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> SaeConfig {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        SaeConfig::from_map(map)
    }

    #[test]
    fn test_validate_ok() {
        let config = config(json!({
            "d_in": 768,
            "d_sae": 24576,
            "dtype": "float32",
        }));
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.d_in(), Some(768));
        assert_eq!(config.d_sae(), Some(24576));
        assert_eq!(config.dtype(), Some(ConfigDataType::Float32));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = config(json!({
            "d_in": "768",
            "dtype": "int4",
        }));
        let error = config.validate().unwrap_err();
        assert_eq!(error.missing, vec!["d_sae".to_string()]);
        let invalid: Vec<&str> =
            error.invalid.iter().map(|field| field.key.as_str()).collect();
        assert_eq!(invalid, vec!["d_in", "dtype"]);
        assert!(error.to_string().contains("missing required fields: d_sae"));
    }

    #[test]
    fn test_zero_width_is_invalid() {
        let config = config(json!({
            "d_in": 0,
            "d_sae": 16,
            "dtype": "float32",
        }));
        let error = config.validate().unwrap_err();
        assert!(error.missing.is_empty());
        assert_eq!(error.invalid[0].key, "d_in");
    }

    #[test]
    fn test_set_placement_overrides_persisted_values() {
        let mut config = config(json!({
            "d_in": 4,
            "d_sae": 8,
            "dtype": "bfloat16",
            "device": "cuda:3",
            "lr": 0.0004,
        }));
        config.set_placement(Device::Cpu, ConfigDataType::Float32);
        assert_eq!(config.get("device"), Some(&json!("cpu")));
        assert_eq!(config.get("dtype"), Some(&json!("float32")));
        assert_eq!(config.device(), Some(Device::Cpu));
        assert_eq!(config.get("lr"), Some(&json!(0.0004)));
    }

    #[test]
    fn test_architecture() {
        let config = config(json!({
            "d_in": 768,
            "d_sae": 24576,
            "dtype": "float32",
            "device": "cpu",
            "hook_point": "blocks.0.attn.hook_z",
            "hook_point_layer": 0,
            "hook_point_head_index": null,
            "activation_fn_str": "relu",
            "sae_lens_training_version": null,
            "lr": 0.0012,
        }));

        let architecture = config.architecture().unwrap();
        assert_eq!(architecture.d_in, 768);
        assert_eq!(architecture.d_sae, 24576);
        assert_eq!(architecture.dtype, ConfigDataType::Float32);
        assert_eq!(
            architecture.hook_point.as_deref(),
            Some("blocks.0.attn.hook_z")
        );
        assert_eq!(architecture.hook_point_layer, Some(0));
        assert_eq!(architecture.hook_point_head_index, None);
        assert_eq!(architecture.sae_lens_training_version, None);
    }
}

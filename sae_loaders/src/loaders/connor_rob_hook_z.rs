use super::{
    PretrainedSaeLoader, TensorMap,
    materialize::{fetch_artifact, materialize_torch_checkpoint, read_json_object},
};
use crate::{
    ArtifactFetcher, ConfigDataType, Device, LoaderError, SaeConfig,
    config::{
        FieldMapping, FixedValue, TranslationTable,
        keys::{
            ACTIVATION_FN_STR, APPLY_B_DEC_TO_INPUT, CONTEXT_SIZE, D_IN, D_SAE,
            DATASET_PATH, DEVICE, DTYPE, HOOK_POINT, HOOK_POINT_HEAD_INDEX,
            HOOK_POINT_LAYER, MODEL_NAME, NORMALIZE_ACTIVATIONS, PREPEND_BOS,
            SAE_LENS_TRAINING_VERSION, USES_SCALING_FACTOR,
        },
    },
};

/// GPT-2 small attention `hook_z` SAEs trained by Connor Kissane and Rob
/// Krzyzanowski, stored as one `torch.save` state dict plus a training
/// hyperparameter dump.
pub const CONNOR_ROB_HOOK_Z_TABLE: TranslationTable = TranslationTable {
    name: "connor_rob_hook_z",
    fields: &[
        FieldMapping::rename(D_IN, "act_size"),
        FieldMapping::rename(D_SAE, "dict_size"),
        FieldMapping::fixed(DTYPE, FixedValue::Str("float32")),
        // Replaced by the requested device.
        FieldMapping::fixed(DEVICE, FixedValue::Str("cpu")),
        FieldMapping::fixed(MODEL_NAME, FixedValue::Str("gpt2-small")),
        FieldMapping::rename(HOOK_POINT, "act_name"),
        FieldMapping::rename(HOOK_POINT_LAYER, "layer"),
        FieldMapping::fixed(HOOK_POINT_HEAD_INDEX, FixedValue::Null),
        FieldMapping::fixed(ACTIVATION_FN_STR, FixedValue::Str("relu")),
        FieldMapping::fixed(APPLY_B_DEC_TO_INPUT, FixedValue::Bool(true)),
        FieldMapping::fixed(USES_SCALING_FACTOR, FixedValue::Bool(false)),
        FieldMapping::fixed(SAE_LENS_TRAINING_VERSION, FixedValue::Null),
        FieldMapping::fixed(PREPEND_BOS, FixedValue::Bool(true)),
        FieldMapping::fixed(
            DATASET_PATH,
            FixedValue::Str("apollo-research/Skylion007-openwebtext-tokenizer-gpt2"),
        ),
        FieldMapping::fixed(CONTEXT_SIZE, FixedValue::Int(128)),
        FieldMapping::fixed(NORMALIZE_ACTIVATIONS, FixedValue::Bool(false)),
    ],
};

/// `gpt2-small_0_24576_z.pt` -> `gpt2-small_0_24576_z_cfg.json`
pub fn companion_config_filename(source_path: &str) -> String {
    let stem = source_path
        .find(".pt")
        .map_or(source_path, |end| &source_path[..end]);
    format!("{stem}_cfg.json")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnorRobHookZLoader;

impl PretrainedSaeLoader for ConnorRobHookZLoader {
    fn name(&self) -> &'static str {
        CONNOR_ROB_HOOK_Z_TABLE.name
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

        let weights_path = fetch_artifact(fetcher, repo_id, source_path, force_refetch)?;
        let cfg_name = companion_config_filename(source_path);
        let cfg_path = fetch_artifact(fetcher, repo_id, &cfg_name, force_refetch)?;

        let legacy = read_json_object(&cfg_path, repo_id, &cfg_name)?;
        let translation = CONNOR_ROB_HOOK_Z_TABLE.translate(&legacy);
        for target in &translation.unresolved {
            log::warn!(
                "{}: {repo_id}/{cfg_name} has no source for \"{target}\"",
                self.name()
            );
        }
        let mut config = translation.config;
        config.set_placement(device, ConfigDataType::Float32);
        config
            .validate()
            .map_err(|error| LoaderError::invalid_config(repo_id, source_path, error))?;

        let tensors = materialize_torch_checkpoint(&weights_path, device, repo_id, source_path)?;

        log::info!(
            "{}: loaded {repo_id}/{source_path} ({} tensors on {device})",
            self.name(),
            tensors.len()
        );
        Ok((config, tensors))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::config::keys;

    #[test]
    fn test_companion_config_filename() {
        assert_eq!(
            companion_config_filename("gpt2-small_0_24576_z.pt"),
            "gpt2-small_0_24576_z_cfg.json"
        );
        assert_eq!(
            companion_config_filename("saes/layer_3.pt"),
            "saes/layer_3_cfg.json"
        );
        assert_eq!(companion_config_filename("weights"), "weights_cfg.json");
    }

    #[test]
    fn test_table_covers_mandatory_keys() {
        let targets: Vec<&str> = CONNOR_ROB_HOOK_Z_TABLE.targets().collect();
        for key in keys::MANDATORY {
            assert!(targets.contains(&key), "{key} missing from table");
        }
    }

    #[test]
    fn test_translation_drops_training_hyperparameters() {
        let legacy: Map<String, Value> = json!({
            "act_size": 768,
            "dict_size": 24576,
            "act_name": "blocks.0.attn.hook_z",
            "layer": 0,
            "lr": 0.0012,
            "l1_coeff": 3.0,
            "beta1": 0.9,
            "seed": 49,
        })
        .as_object()
        .cloned()
        .unwrap();

        let translation = CONNOR_ROB_HOOK_Z_TABLE.translate(&legacy);
        assert!(translation.unresolved.is_empty());
        let config = translation.config;
        assert!(config.validate().is_ok());
        assert_eq!(config.d_in(), Some(768));
        assert_eq!(config.d_sae(), Some(24576));
        assert_eq!(config.hook_point(), Some("blocks.0.attn.hook_z"));
        assert_eq!(config.hook_point_layer(), Some(0));
        assert_eq!(config.get(keys::CONTEXT_SIZE), Some(&json!(128)));
        assert_eq!(config.get(keys::HOOK_POINT_HEAD_INDEX), Some(&Value::Null));
        assert!(!config.contains_key("lr"));
        assert!(!config.contains_key("l1_coeff"));
        assert_eq!(config.len(), CONNOR_ROB_HOOK_Z_TABLE.fields.len());
    }
}

//! Canonical config keys.

pub const D_IN: &str = "d_in";
pub const D_SAE: &str = "d_sae";
pub const DTYPE: &str = "dtype";
pub const DEVICE: &str = "device";
pub const MODEL_NAME: &str = "model_name";
pub const HOOK_POINT: &str = "hook_point";
pub const HOOK_POINT_LAYER: &str = "hook_point_layer";
pub const HOOK_POINT_HEAD_INDEX: &str = "hook_point_head_index";
pub const ACTIVATION_FN_STR: &str = "activation_fn_str";
pub const APPLY_B_DEC_TO_INPUT: &str = "apply_b_dec_to_input";
pub const USES_SCALING_FACTOR: &str = "uses_scaling_factor";
pub const SAE_LENS_TRAINING_VERSION: &str = "sae_lens_training_version";
pub const PREPEND_BOS: &str = "prepend_bos";
pub const DATASET_PATH: &str = "dataset_path";
pub const CONTEXT_SIZE: &str = "context_size";
pub const NORMALIZE_ACTIVATIONS: &str = "normalize_activations";

/// Keys every returned config must carry, in validation order.
pub const MANDATORY: [&str; 3] = [D_SAE, D_IN, DTYPE];

mod common;
pub use common::ConfigDataType;

mod error;
pub use error::{ConfigError, InvalidField};
pub(crate) use error::describe;

pub mod keys;

mod sae_config;
pub use sae_config::{SaeArchitecture, SaeConfig};

pub mod translation;
pub use translation::{FieldMapping, FieldRule, FixedValue, TranslationTable};

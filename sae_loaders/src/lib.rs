#[cfg(test)]
#[macro_use]
extern crate is_close;

pub mod array;
pub use array::Array;

pub mod config;
pub use config::{ConfigDataType, SaeConfig};

pub mod data_type;
pub use data_type::{ArrayElement, DataType};

pub mod device;
pub use device::Device;

pub mod env_utils;

pub mod error;
pub use error::LoaderError;

pub mod hub;
pub use hub::{ArtifactFetcher, HubFetcher, LocalFetcher};

pub mod loaders;
pub use loaders::{PretrainedSaeLoader, TensorMap};

pub mod parameters;

pub mod registry;
pub use registry::{LoaderRegistry, load_pretrained_sae, loader_for};

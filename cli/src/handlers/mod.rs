mod load;
mod loaders;

pub use load::{LoadRequest, handle_load, tensor_rows};
pub use loaders::handle_loaders;

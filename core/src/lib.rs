pub mod config;
pub mod dataset;
pub mod error;
pub mod index;
pub mod model;
pub mod store;

mod traits;

pub use config::*;
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use index::*;
pub use model::ReluModel;
pub use traits::*;

pub use learned_index_segmentation::Breakpoint;

pub use std::path::Path;

/// Appends `_<suffix>` to the last component of `path`, so `data/nn` becomes `data/nn_3`.
pub fn path_with_suffix(path: impl AsRef<Path>, suffix: impl std::fmt::Display) -> std::path::PathBuf {
    let path = path.as_ref();

    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!("_{suffix}"));

    path.with_file_name(name)
}

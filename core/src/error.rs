//! Error type shared by every fallible operation of the index.

use learned_index_segmentation::SegmentationError;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read dataset `{}`: {source}", .path.display())]
    DatasetIo {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("dataset is not sorted, key at position {position} is smaller than its predecessor")]
    Unsorted { position: usize },

    #[error("cannot access model file `{}`: {source}", .path.display())]
    ModelIo {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("need at least 2 keys to fit a line, got {len}")]
    InsufficientData { len: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("index is not ready, train or load it first")]
    NotReady,
}

impl Error {
    pub(crate) fn dataset_io(path: &Path, source: impl Into<bincode::Error>) -> Self {
        Self::DatasetIo {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub(crate) fn model_io(path: &Path, source: impl Into<bincode::Error>) -> Self {
        Self::ModelIo {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    /// An I/O error for malformed contents, which has no underlying `std::io::Error`
    pub(crate) fn malformed(message: String) -> bincode::Error {
        Box::new(bincode::ErrorKind::Custom(message))
    }
}

impl From<SegmentationError> for Error {
    fn from(error: SegmentationError) -> Self {
        match error {
            SegmentationError::InsufficientData { len } => Self::InsufficientData { len },
        }
    }
}

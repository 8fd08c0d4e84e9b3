//! `hinge_engine` builds a learned rank index over a sorted array of fixed-width
//! unsigned keys. The keys are sharded by their top bits, each shard is summarized
//! by a piecewise linear function with a bounded error, and every function is
//! compiled in closed form into a single hidden layer ReLU network.
//!
//! ```
//! use hinge_engine::prelude::*;
//!
//! # fn main() -> hinge_engine::Result<()> {
//! let dataset = Dataset::from_sorted(vec![10_u32, 20, 20, 30, 40])?;
//!
//! let mut index = LearnedIndex::new(IndexConfig::new(0, 1))?;
//! index.train(&dataset)?;
//!
//! assert_eq!(index.find(20)?, 1);
//! assert_eq!(index.max_error()?, 1);
//! assert_eq!(index.lookup(&dataset, 30)?, Some(3));
//! # Ok(())
//! # }
//! ```
//!
//! A lookup evaluates the model of the key's bucket and then only searches the
//! window of `2 * max_error + 1` positions around the prediction.
//!
//! Trained models are persisted as one file per bucket, next to a side-car holding
//! the maximum error, and can be loaded back without the dataset:
//!
//! ```ignore
//! index.save("data/nn")?;
//!
//! let index: LearnedIndex<u32> = LearnedIndex::load("data/nn", IndexConfig::new(0, 1))?;
//! ```
#![deny(missing_docs)]

/// Include this at the top of the file when training or querying an index.
pub mod prelude {
    pub use hinge_core::Breakpoint;
    pub use hinge_core::Dataset;
    pub use hinge_core::IndexConfig;
    pub use hinge_core::Key;
    pub use hinge_core::KeyWidth;
    pub use hinge_core::LearnedIndex;
    pub use hinge_core::Segmentation;
}

pub use hinge_core::{Error, Result};

/// Reading and writing model, max error and boundaries files.
pub use hinge_core::store;

#[doc(hidden)]
pub use hinge_core as private;

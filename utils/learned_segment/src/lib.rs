//! Algorithms for summarizing a sorted key array as a piecewise linear function from keys
//! to ranks, with a bounded interpolation error.
//!
//! The output of a segmentation is a list of [`Breakpoint`]s. Interpolating linearly between
//! two consecutive breakpoints predicts the rank of every key in between to within the
//! configured error threshold.

mod model;
mod point;
mod segmentation;

pub use model::{segments, Segment};
pub use point::Breakpoint;
pub use segmentation::{
    branching_segmentation, greedy_segmentation, BranchingSegmentation, SegmentationError,
};

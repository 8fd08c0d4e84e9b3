//! A segment is the linear piece between two consecutive breakpoints of a boundary list.

use num::PrimInt;

use crate::point::{as_f64, Breakpoint};

/// The linear interpolant between two consecutive breakpoints.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment<K> {
    pub start: Breakpoint<K>,
    pub end: Breakpoint<K>,
}

impl<K: PrimInt> Segment<K> {
    pub fn new(start: Breakpoint<K>, end: Breakpoint<K>) -> Self {
        debug_assert!(start.key < end.key);
        debug_assert!(start.rank <= end.rank);

        Self { start, end }
    }

    /// Ranks per key along this segment.
    pub fn slope(&self) -> f64 {
        self.start.slope_to(&self.end)
    }

    /// Interpolated rank of `key`. Keys outside of the segment are extrapolated.
    pub fn interpolate(&self, key: K) -> f64 {
        let run = if key >= self.start.key {
            as_f64(key - self.start.key)
        } else {
            -as_f64(self.start.key - key)
        };

        self.start.rank as f64 + self.slope() * run
    }

    /// Whether `key` lies strictly between the two knots.
    pub fn is_interior(&self, key: K) -> bool {
        self.start.key < key && key < self.end.key
    }
}

/// Iterates over the segments of a boundary list, in order.
pub fn segments<K: PrimInt>(boundaries: &[Breakpoint<K>]) -> impl Iterator<Item = Segment<K>> + '_ {
    boundaries
        .windows(2)
        .map(|pair| Segment::new(pair[0], pair[1]))
}

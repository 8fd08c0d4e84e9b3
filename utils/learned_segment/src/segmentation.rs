use num::PrimInt;
use std::fmt;

use crate::point::{as_f64, Breakpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationError {
    /// A line needs at least two distinct keys. `len` is the number of distinct keys seen.
    InsufficientData { len: usize },
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { len } => {
                write!(f, "need at least 2 distinct keys to fit a line, got {len}")
            }
        }
    }
}

impl std::error::Error for SegmentationError {}

/// A boundary list shared by several buckets, produced in a single pass with a forced
/// breakpoint wherever the bucket of the keys changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchingSegmentation<K> {
    boundaries: Vec<Breakpoint<K>>,

    /// Index into `boundaries` at which each bucket's sub-list begins. The first entry is
    /// always 0.
    branching_points: Vec<usize>,
}

impl<K> BranchingSegmentation<K> {
    pub fn boundaries(&self) -> &[Breakpoint<K>] {
        &self.boundaries
    }

    pub fn branching_points(&self) -> &[usize] {
        &self.branching_points
    }

    /// Number of non-empty buckets covered by this segmentation.
    pub fn len(&self) -> usize {
        self.branching_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branching_points.is_empty()
    }

    /// The independent boundary list of the `i`-th non-empty bucket.
    pub fn bucket_boundaries(&self, i: usize) -> &[Breakpoint<K>] {
        let start = self.branching_points[i];
        let end = self
            .branching_points
            .get(i + 1)
            .copied()
            .unwrap_or(self.boundaries.len());

        &self.boundaries[start..end]
    }

    /// Slices the shared list at the branching points, one sub-list per non-empty bucket.
    pub fn split(&self) -> impl Iterator<Item = &[Breakpoint<K>]> + '_ {
        (0..self.len()).map(|i| self.bucket_boundaries(i))
    }
}

/// Grows line segments from left to right, stretching each one as far as the error
/// threshold allows before starting a new one at the last point that still fit.
struct GreedySegmenter<'a, K> {
    keys: &'a [K],
    base_rank: u64,
    epsilon: f64,
    boundaries: Vec<Breakpoint<K>>,

    /// Open interval of slopes, through the current anchor, which keep every interior
    /// point seen so far within epsilon.
    cone: (f64, f64),
}

impl<'a, K: PrimInt> GreedySegmenter<'a, K> {
    fn new(keys: &'a [K], base_rank: u64, epsilon: u64) -> Self {
        Self {
            keys,
            base_rank,
            epsilon: epsilon as f64,
            boundaries: Vec::new(),
            cone: (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    /// Position of the first key after `i` which differs from `keys[i]`, or the length of
    /// the data. Runs of duplicates are always skipped as a whole, so every position the
    /// segmenter visits is the first occurrence of its key.
    #[inline]
    fn next_distinct(&self, i: usize) -> usize {
        let key = self.keys[i];
        let mut j = i + 1;
        while j < self.keys.len() && self.keys[j] == key {
            j += 1;
        }
        j
    }

    fn emit(&mut self, i: usize) {
        self.boundaries
            .push(Breakpoint::new(self.keys[i], i as u64 + self.base_rank));
    }

    /// Offsets of position `i` from the anchor `l`, in keys and in ranks.
    ///
    /// Errors are computed relative to the anchor, which keeps them independent of the
    /// absolute rank and of the magnitude of the keys.
    #[inline]
    fn offsets(&self, l: usize, i: usize) -> (f64, f64) {
        (as_f64(self.keys[i] - self.keys[l]), (i - l) as f64)
    }

    /// Whether every distinct key strictly between positions `l` and `r` is predicted to
    /// within epsilon by the line through `(keys[l], l)` and `(keys[r], r)`. Only valid
    /// once all of those keys have been added with [`Self::narrow`].
    #[inline]
    fn fits(&self, l: usize, r: usize) -> bool {
        let (dk, dr) = self.offsets(l, r);
        let slope = dr / dk;
        self.cone.0 < slope && slope < self.cone.1
    }

    /// Restricts the cone of the anchor `l` to the slopes which predict position `i` to
    /// within epsilon.
    #[inline]
    fn narrow(&mut self, l: usize, i: usize) {
        let (dk, dr) = self.offsets(l, i);
        self.cone.0 = self.cone.0.max((dr - self.epsilon) / dk);
        self.cone.1 = self.cone.1.min((dr + self.epsilon) / dk);
    }

    fn reset(&mut self) {
        self.cone = (f64::NEG_INFINITY, f64::INFINITY);
    }

    /// Runs the segmentation over all keys, forcing a breakpoint whenever `prefix` of the
    /// next key differs from that of the current anchor. The index of the first breakpoint
    /// of every new bucket is appended to `branching_points`.
    fn run(
        mut self,
        prefix: impl Fn(K) -> usize,
        branching_points: &mut Vec<usize>,
    ) -> Vec<Breakpoint<K>> {
        let n = self.keys.len();

        self.emit(0);

        // l: the current anchor, always the last emitted breakpoint
        // prev: the furthest point known to fit on a segment starting at l
        // r: the candidate end point of the segment
        let mut l = 0;
        let mut prev = 0;
        let mut r = self.next_distinct(0);

        while r < n {
            if prefix(self.keys[r]) != prefix(self.keys[l]) {
                if prev != l {
                    self.emit(prev);
                }

                branching_points.push(self.boundaries.len());
                self.emit(r);

                l = r;
                prev = r;
                r = self.next_distinct(r);
                self.reset();
                continue;
            }

            if prev != l && !self.fits(l, r) {
                self.emit(prev);
                l = prev;
                self.reset();
            }

            // r is interior to every later candidate of this anchor
            self.narrow(l, r);
            prev = r;
            r = self.next_distinct(r);
        }

        if prev != l {
            self.emit(prev);
        }

        self.boundaries
    }
}

/// Segments a sorted run of keys whose first key has rank `base_rank`.
///
/// Every distinct key strictly between two consecutive breakpoints is predicted by linear
/// interpolation to within less than `epsilon` of the rank of its first occurrence.
/// Duplicated keys bind to the rank of their first occurrence.
pub fn greedy_segmentation<K: PrimInt>(
    keys: &[K],
    base_rank: u64,
    epsilon: u64,
) -> Result<Vec<Breakpoint<K>>, SegmentationError> {
    if keys.len() < 2 {
        return Err(SegmentationError::InsufficientData { len: keys.len() });
    }

    let boundaries =
        GreedySegmenter::new(keys, base_rank, epsilon).run(|_| 0, &mut Vec::new());

    if boundaries.len() < 2 {
        return Err(SegmentationError::InsufficientData {
            len: boundaries.len(),
        });
    }

    Ok(boundaries)
}

/// Segments all keys in one pass, with a forced breakpoint at each change of `prefix`.
///
/// Ranks are positions in `keys`. Slicing the result at its branching points yields, for
/// each non-empty bucket, exactly the boundary list that [`greedy_segmentation`] produces
/// for that bucket's keys with the bucket's starting rank. Buckets with a single distinct
/// key get a single breakpoint.
pub fn branching_segmentation<K: PrimInt>(
    keys: &[K],
    epsilon: u64,
    prefix: impl Fn(K) -> usize,
) -> Result<BranchingSegmentation<K>, SegmentationError> {
    if keys.len() < 2 {
        return Err(SegmentationError::InsufficientData { len: keys.len() });
    }

    let mut branching_points = vec![0];
    let boundaries = GreedySegmenter::new(keys, 0, epsilon).run(prefix, &mut branching_points);

    Ok(BranchingSegmentation {
        boundaries,
        branching_points,
    })
}

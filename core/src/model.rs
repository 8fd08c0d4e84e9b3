//! A single hidden layer ReLU network which reproduces a piecewise linear function exactly.
//!
//! Every hidden unit is a hinge `max(0, w1 * key + b1)` which switches on at the first key of
//! its segment and contributes the change in slope from the previous segment. Summing the
//! hinges (signed by `w2`) on top of the rank of the first breakpoint gives back the
//! piecewise linear interpolant of the boundary list.

use crate::{Breakpoint, Error, Key, Result};
use learned_index_segmentation::segments;

/// Number of hidden units evaluated together
pub const LANES: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct ReluModel {
    weight1: Box<[f64]>,
    bias1: Box<[f64]>,
    weight2: Box<[f64]>,
    bias2: f64,
}

impl ReluModel {
    /// A model without hidden units, which predicts `rank` for every key.
    pub fn constant(rank: u64) -> Self {
        Self {
            weight1: Box::default(),
            bias1: Box::default(),
            weight2: Box::default(),
            bias2: rank as f64,
        }
    }

    /// Computes the weights which reproduce the interpolant of `boundaries`, one hidden unit
    /// per segment. A single breakpoint gives a constant model.
    pub fn compile<K: Key>(boundaries: &[Breakpoint<K>]) -> Result<Self> {
        let first = boundaries
            .first()
            .ok_or(Error::InsufficientData { len: 0 })?;

        let num_neurons = boundaries.len() - 1;
        let mut weight1 = Vec::with_capacity(num_neurons);
        let mut bias1 = Vec::with_capacity(num_neurons);
        let mut weight2 = Vec::with_capacity(num_neurons);

        let mut prev_slope = 0.0;
        for segment in segments(boundaries) {
            let slope = segment.slope();
            let w1 = (slope - prev_slope).abs();

            weight1.push(w1);
            bias1.push(-(w1 * segment.start.key.as_f64()));
            weight2.push(if slope > prev_slope { 1.0 } else { -1.0 });

            prev_slope = slope;
        }

        Ok(Self::from_parts(weight1, bias1, weight2, first.rank as f64))
    }

    pub(crate) fn from_parts(
        weight1: Vec<f64>,
        bias1: Vec<f64>,
        weight2: Vec<f64>,
        bias2: f64,
    ) -> Self {
        debug_assert_eq!(weight1.len(), bias1.len());
        debug_assert_eq!(weight1.len(), weight2.len());

        Self {
            weight1: weight1.into_boxed_slice(),
            bias1: bias1.into_boxed_slice(),
            weight2: weight2.into_boxed_slice(),
            bias2,
        }
    }

    pub fn num_neurons(&self) -> usize {
        self.weight1.len()
    }

    pub fn weight1(&self) -> &[f64] {
        &self.weight1
    }

    pub fn bias1(&self) -> &[f64] {
        &self.bias1
    }

    pub fn weight2(&self) -> &[f64] {
        &self.weight2
    }

    pub fn bias2(&self) -> f64 {
        self.bias2
    }

    /// Predicted rank of `key`, using vector instructions when the CPU has them.
    #[inline]
    pub fn evaluate<K: Key>(&self, key: K) -> f64 {
        let x = key.as_f64();

        #[cfg(target_arch = "x86_64")]
        {
            if avx::is_available() {
                // SAFETY: the required CPU features were detected at run time
                return unsafe { avx::evaluate(self, x) };
            }
        }

        self.evaluate_lanes(x)
    }

    /// Predicted rank of `key` without vector instructions. Bit-identical to [`Self::evaluate`].
    pub fn evaluate_scalar<K: Key>(&self, key: K) -> f64 {
        self.evaluate_lanes(key.as_f64())
    }

    /// Accumulates full groups of hidden units in `LANES` separate sums, in the same order
    /// as the vector registers do, then reduces them the same way.
    fn evaluate_lanes(&self, x: f64) -> f64 {
        let mut lanes = [0.0; LANES];

        let groups = self
            .weight1
            .chunks_exact(LANES)
            .zip(self.bias1.chunks_exact(LANES))
            .zip(self.weight2.chunks_exact(LANES));

        for ((w1, b1), w2) in groups {
            for lane in 0..LANES {
                lanes[lane] += hinge(w1[lane], b1[lane], w2[lane], x);
            }
        }

        let sum = (lanes[2] + lanes[3]) + (lanes[0] + lanes[1]);
        self.finish(sum, x)
    }

    /// Adds the hidden units which don't fill a whole group, then the output bias.
    #[inline(always)]
    fn finish(&self, mut sum: f64, x: f64) -> f64 {
        let tail = self.num_neurons() - self.num_neurons() % LANES;
        for i in tail..self.num_neurons() {
            sum += hinge(self.weight1[i], self.bias1[i], self.weight2[i], x);
        }

        sum + self.bias2
    }
}

/// One hidden unit: fused multiply-add, ReLU, then the output weight.
#[inline(always)]
fn hinge(w1: f64, b1: f64, w2: f64, x: f64) -> f64 {
    let y = w1.mul_add(x, b1);
    // Same as `max_pd(y, 0)`, which returns zero for NaN and for negative zero
    let y = if y > 0.0 { y } else { 0.0 };
    y * w2
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use super::{ReluModel, LANES};
    use std::arch::x86_64::*;

    #[inline]
    pub(super) fn is_available() -> bool {
        is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn evaluate(model: &ReluModel, x: f64) -> f64 {
        let input = _mm256_set1_pd(x);
        let zeros = _mm256_setzero_pd();
        let mut sum = _mm256_setzero_pd();

        for group in 0..model.num_neurons() / LANES {
            let offset = group * LANES;
            let weight1 = _mm256_loadu_pd(model.weight1.as_ptr().add(offset));
            let bias1 = _mm256_loadu_pd(model.bias1.as_ptr().add(offset));
            let weight2 = _mm256_loadu_pd(model.weight2.as_ptr().add(offset));

            let layer1 = _mm256_fmadd_pd(weight1, input, bias1);
            let layer1 = _mm256_max_pd(layer1, zeros);

            sum = _mm256_add_pd(sum, _mm256_mul_pd(layer1, weight2));
        }

        // [s0 + s1, s0 + s1, s2 + s3, s2 + s3]
        let pairs = _mm256_hadd_pd(sum, sum);
        let high = _mm256_extractf128_pd(pairs, 1);
        let total = _mm_add_pd(high, _mm256_castpd256_pd128(pairs));

        model.finish(_mm_cvtsd_f64(total), x)
    }
}

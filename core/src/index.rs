//! A learned index sharded by key prefix: one compiled [`ReluModel`] per bucket of keys
//! sharing their top `prefix_bits` bits.

use crate::{
    store, Breakpoint, Dataset, Error, IndexConfig, Key, ReluModel, Result, Segmentation,
};
use learned_index_segmentation::{branching_segmentation, greedy_segmentation};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{fmt, ops::Range, path::Path};

/// Predictions this close below an integer are taken to be that integer, so that a knot
/// whose evaluation lands an ulp short still maps to its own rank.
pub const KNOT_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Trained,
    Loaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Untrained,
    Training,
    Ready(Origin),
}

#[derive(Clone, Debug)]
pub struct Bucket<K> {
    span: Option<Range<usize>>,
    boundaries: Vec<Breakpoint<K>>,
    model: ReluModel,
}

impl<K> Bucket<K> {
    /// Positions of the bucket's keys in the dataset. Unknown for loaded buckets.
    pub fn span(&self) -> Option<Range<usize>> {
        self.span.clone()
    }

    /// Boundary list the model was compiled from. Empty for loaded buckets.
    pub fn boundaries(&self) -> &[Breakpoint<K>] {
        &self.boundaries
    }

    pub fn model(&self) -> &ReluModel {
        &self.model
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub buckets: usize,
    /// Only known for a trained index
    pub non_empty_buckets: Option<usize>,
    pub neurons: usize,
    pub max_neurons: usize,
    pub constant_models: usize,
    pub max_error: u64,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} buckets", self.buckets)?;
        if let Some(non_empty) = self.non_empty_buckets {
            write!(f, " ({non_empty} non-empty)")?;
        }
        write!(
            f,
            ", {} neurons (at most {} per model), {} constant models, max error {}",
            self.neurons, self.max_neurons, self.constant_models, self.max_error
        )
    }
}

pub struct LearnedIndex<K> {
    config: IndexConfig,
    phase: Phase,
    buckets: Vec<Bucket<K>>,
    max_error: u64,
}

// Once ready, `find` only reads immutable models and may be called from any thread
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}

    #[allow(dead_code)]
    fn shared_index<K: Key>() {
        assert_send_sync::<LearnedIndex<K>>();
    }
};

impl<K: Key> LearnedIndex<K> {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate::<K>()?;

        Ok(Self {
            config,
            phase: Phase::Untrained,
            buckets: Vec::new(),
            max_error: 0,
        })
    }

    /// Reads a dataset file and trains on it.
    pub fn train_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let dataset = Dataset::open(path)?;
        self.train(&dataset)
    }

    /// Replaces every bucket with a model trained on `dataset`, then measures the maximum
    /// error of the new models over the whole dataset. On failure the index is left
    /// untrained.
    pub fn train(&mut self, dataset: &Dataset<K>) -> Result<()> {
        info!(
            "training on {} keys, {} buckets, error threshold {}",
            dataset.len(),
            self.config.num_buckets(),
            self.config.error_threshold
        );

        self.phase = Phase::Training;
        self.buckets.clear();
        self.max_error = 0;

        match self.build(dataset) {
            Ok(buckets) => {
                self.max_error = self.measure(&buckets, dataset);
                self.buckets = buckets;
                self.phase = Phase::Ready(Origin::Trained);

                info!("trained {}", self.stats());
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Untrained;
                Err(err)
            }
        }
    }

    fn build(&self, dataset: &Dataset<K>) -> Result<Vec<Bucket<K>>> {
        if dataset.len() < 2 {
            return Err(Error::InsufficientData { len: dataset.len() });
        }

        let spans = self.partition(dataset);
        let boundaries = match self.config.segmentation {
            Segmentation::Branching => self.branching_boundaries(dataset)?,
            Segmentation::PerBucket => {
                let epsilon = self.config.error_threshold;
                self.map_buckets(spans.clone(), |_, span| {
                    segment_bucket(dataset, span, epsilon)
                })
            }
        };

        let parts: Vec<_> = spans.into_iter().zip(boundaries).collect();
        self.map_buckets(parts, |bucket, (span, boundaries)| {
            compile_bucket(bucket, span, boundaries)
        })
        .into_iter()
        .collect()
    }

    /// Splits the dataset into one contiguous span per prefix, in prefix order.
    fn partition(&self, keys: &[K]) -> Vec<Range<usize>> {
        let bits = self.config.prefix_bits;

        let mut start = 0;
        (0..self.config.num_buckets())
            .map(|bucket| {
                let end = start + keys[start..].partition_point(|key| key.prefix(bits) <= bucket);
                let span = start..end;
                start = end;
                span
            })
            .collect()
    }

    /// A single segmentation pass over all keys, sliced into the lists of the buckets.
    fn branching_boundaries(&self, keys: &[K]) -> Result<Vec<Vec<Breakpoint<K>>>> {
        let bits = self.config.prefix_bits;
        let segmentation =
            branching_segmentation(keys, self.config.error_threshold, |key: K| key.prefix(bits))?;

        debug!(
            "branching segmentation: {} breakpoints over {} non-empty buckets",
            segmentation.boundaries().len(),
            segmentation.len()
        );

        let mut boundaries = vec![Vec::new(); self.config.num_buckets()];
        for list in segmentation.split() {
            if let Some(first) = list.first() {
                boundaries[first.key.prefix(bits)] = list.to_vec();
            }
        }

        Ok(boundaries)
    }

    /// Runs `f` on every bucket's item, on the thread pool if configured. Results stay in
    /// bucket order.
    fn map_buckets<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Send + Sync,
    {
        if self.config.parallel {
            items
                .into_par_iter()
                .enumerate()
                .map(|(bucket, item)| f(bucket, item))
                .collect()
        } else {
            items
                .into_iter()
                .enumerate()
                .map(|(bucket, item)| f(bucket, item))
                .collect()
        }
    }

    /// Largest distance between the prediction for a distinct key and the rank of its first
    /// occurrence.
    fn measure(&self, buckets: &[Bucket<K>], keys: &[K]) -> u64 {
        self.map_buckets(self.partition(keys), |bucket, span| {
            bucket_error(&buckets[bucket].model, keys, span)
        })
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Maximum error of the current models over `dataset`, which need not be the dataset
    /// they were trained on.
    pub fn validate(&self, dataset: &Dataset<K>) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.measure(&self.buckets, dataset))
    }

    /// Predicted rank of `key`, truncated towards zero after adding [`KNOT_TOLERANCE`], so
    /// a prediction within `1e-6` below an integer yields that integer. Negative
    /// predictions give 0.
    #[inline]
    pub fn find(&self, key: K) -> Result<u64> {
        self.ensure_ready()?;

        let bucket = &self.buckets[key.prefix(self.config.prefix_bits)];
        Ok(predict(&bucket.model, key))
    }

    /// Positions around the prediction for `key` which hold its first occurrence, if the
    /// key is in a dataset of `len` keys the index was validated on.
    pub fn search_window(&self, key: K, len: usize) -> Result<Range<usize>> {
        let predicted = self.find(key)?;
        let len = len as u64;

        let start = predicted.saturating_sub(self.max_error).min(len);
        let end = predicted
            .saturating_add(self.max_error)
            .saturating_add(1)
            .min(len);

        Ok(start as usize..end as usize)
    }

    /// Position of the first occurrence of `key`, searching only the window around its
    /// predicted rank.
    pub fn lookup(&self, dataset: &Dataset<K>, key: K) -> Result<Option<usize>> {
        let window = self.search_window(key, dataset.len())?;
        let position = window.start + dataset[window].partition_point(|&k| k < key);

        Ok((dataset.get(position) == Some(&key)).then_some(position))
    }

    /// Writes the model of every bucket to `<base>_<bucket>` and the max error to
    /// `<base>_max_error`.
    pub fn save(&self, base: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let base = base.as_ref();

        for (bucket, Bucket { model, .. }) in self.buckets.iter().enumerate() {
            store::write_model(store::model_path(base, bucket), model)?;
        }
        store::write_max_error(store::max_error_path(base), self.max_error)?;

        info!(
            "saved {} models to `{}_*`",
            self.buckets.len(),
            base.display()
        );
        Ok(())
    }

    /// Reads the models written by [`Self::save`] with the same `prefix_bits`.
    pub fn load(base: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        config.validate::<K>()?;
        let base = base.as_ref();

        let buckets = (0..config.num_buckets())
            .map(|bucket| -> Result<Bucket<K>> {
                Ok(Bucket {
                    span: None,
                    boundaries: Vec::new(),
                    model: store::read_model(store::model_path(base, bucket))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let max_error = store::read_max_error(store::max_error_path(base))?;

        let index = Self {
            config,
            phase: Phase::Ready(Origin::Loaded),
            buckets,
            max_error,
        };

        info!("loaded {} from `{}_*`", index.stats(), base.display());
        Ok(index)
    }

    /// Writes the boundary lists of all buckets, in bucket order. A loaded index has none.
    pub fn save_boundaries(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;

        let boundaries: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.boundaries.iter().copied())
            .collect();

        store::write_boundaries(path, &boundaries)
    }

    pub fn stats(&self) -> IndexStats {
        let non_empty_buckets = match self.phase {
            Phase::Ready(Origin::Trained) => Some(
                self.buckets
                    .iter()
                    .filter(|bucket| bucket.span.as_ref().is_some_and(|span| !span.is_empty()))
                    .count(),
            ),
            _ => None,
        };

        let neurons = self.buckets.iter().map(|bucket| bucket.model.num_neurons());

        IndexStats {
            buckets: self.buckets.len(),
            non_empty_buckets,
            neurons: neurons.clone().sum(),
            max_neurons: neurons.clone().max().unwrap_or(0),
            constant_models: neurons.filter(|&n| n == 0).count(),
            max_error: self.max_error,
        }
    }

    pub fn max_error(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.max_error)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn error_threshold(&self) -> u64 {
        self.config.error_threshold
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }

    pub fn buckets(&self) -> &[Bucket<K>] {
        &self.buckets
    }

    #[inline]
    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }
}

#[inline]
fn predict<K: Key>(model: &ReluModel, key: K) -> u64 {
    // Saturating cast, negative and NaN predictions become 0
    (model.evaluate(key) + KNOT_TOLERANCE) as u64
}

/// Boundary list of a single bucket. Buckets with fewer than two distinct keys get a
/// single breakpoint, empty buckets get none.
fn segment_bucket<K: Key>(keys: &[K], span: Range<usize>, epsilon: u64) -> Vec<Breakpoint<K>> {
    let base_rank = span.start as u64;
    let keys = &keys[span];

    match keys.first() {
        Some(&first) => greedy_segmentation(keys, base_rank, epsilon)
            .unwrap_or_else(|_| vec![Breakpoint::new(first, base_rank)]),
        None => Vec::new(),
    }
}

fn compile_bucket<K: Key>(
    bucket: usize,
    span: Range<usize>,
    boundaries: Vec<Breakpoint<K>>,
) -> Result<Bucket<K>> {
    let model = match boundaries.len() {
        // Empty buckets predict the rank at which their keys would be inserted
        0 => ReluModel::constant(span.start as u64),
        1 => {
            warn!(
                "bucket {bucket} has a single distinct key, using a constant model at rank {}",
                span.start
            );
            ReluModel::compile(&boundaries)?
        }
        _ => ReluModel::compile(&boundaries)?,
    };

    if !span.is_empty() {
        debug!(
            "bucket {bucket}: {} keys, {} breakpoints",
            span.len(),
            boundaries.len()
        );
    }

    Ok(Bucket {
        span: Some(span),
        boundaries,
        model,
    })
}

fn bucket_error<K: Key>(model: &ReluModel, keys: &[K], span: Range<usize>) -> u64 {
    let mut max_error = 0;
    let mut previous = None;

    for (rank, &key) in span.clone().zip(&keys[span]) {
        if previous == Some(key) {
            continue;
        }
        previous = Some(key);

        max_error = max_error.max(predict(model, key).abs_diff(rank as u64));
    }

    max_error
}

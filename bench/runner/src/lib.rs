use std::{
    fmt,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context;
use average::{Estimate, MeanWithError};
use hinge_engine::prelude::*;
use rand::{distributions::uniform::SampleUniform, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Reads an index configuration from a JSON file. Missing fields take their defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<IndexConfig> {
    let Some(path) = path else {
        return Ok(IndexConfig::default());
    };

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config `{}`", path.display()))?;

    serde_json::from_str(&json).with_context(|| format!("invalid config `{}`", path.display()))
}

/// Uniformly random keys in `[0, max]`, sorted, duplicates allowed.
pub fn generate_keys<K: Key + SampleUniform>(size: usize, max: K, seed: Option<u64>) -> Vec<K> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut keys: Vec<K> = (0..size).map(|_| rng.gen_range(K::zero()..=max)).collect();
    keys.sort_unstable();
    keys
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BenchReport {
    pub name: String,
    pub mean_ns: f64,
    pub error_ns: f64,
    pub samples: u64,
}

impl BenchReport {
    pub fn new(name: impl Into<String>, times: &MeanWithError) -> Self {
        Self {
            name: name.into(),
            mean_ns: times.mean() * 1e9,
            error_ns: times.error() * 1e9,
            samples: times.len(),
        }
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ± {}    ({} samples)",
            self.name,
            humantime::format_duration(Duration::from_nanos(self.mean_ns as u64)),
            humantime::format_duration(Duration::from_nanos(self.error_ns as u64)),
            self.samples,
        )
    }
}

/// Times single calls of `func`, each on fresh parameters from `gen_params`.
pub fn bench_function<T, R>(
    mut gen_params: impl FnMut() -> T,
    mut func: impl FnMut(T) -> R,
    warmup: Duration,
    trial: Duration,
) -> MeanWithError {
    let samples = 100;

    // Measure a rough call time, to check the clock only every ~10ms
    let mut mean_time = MeanWithError::new();
    for _ in 0..samples {
        let params = gen_params();
        let start = Instant::now();
        std::hint::black_box(func(params));
        mean_time.add(start.elapsed().as_secs_f64());
    }
    let batch = (0.01 / mean_time.mean()).clamp(1.0, 1e6) as usize;

    // Warm up
    let start = Instant::now();
    while start.elapsed() < warmup {
        for _ in 0..batch {
            let params = gen_params();
            std::hint::black_box(func(params));
        }
    }

    // Run trial
    let mut mean_time = MeanWithError::new();

    let start = Instant::now();
    while start.elapsed() < trial {
        for _ in 0..batch {
            let params = gen_params();

            let start = Instant::now();
            std::hint::black_box(func(params));
            let elapsed = start.elapsed().as_secs_f64();

            mean_time.add(elapsed);
        }
    }

    mean_time
}

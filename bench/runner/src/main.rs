use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use bench_common::{bench_function, generate_keys, load_config, BenchReport};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hinge_engine::{prelude::*, store};
use log::{info, warn};
use rand::{
    distributions::{uniform::SampleUniform, Distribution, Uniform},
    thread_rng,
};
use strum::AsRefStr;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one model per bucket and save them
    Train(TrainArgs),
    /// Measure the maximum error of saved models over a dataset
    Validate(ValidateArgs),
    /// Write a random sorted dataset
    Generate(GenerateArgs),
    /// Time lookups against saved models
    Bench(BenchArgs),
    /// Print a boundaries file
    Inspect(InspectArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, AsRefStr, Default)]
#[strum(serialize_all = "kebab-case")]
pub enum SegmentationType {
    #[default]
    Branching,
    PerBucket,
}

impl From<SegmentationType> for Segmentation {
    fn from(segmentation: SegmentationType) -> Self {
        match segmentation {
            SegmentationType::Branching => Segmentation::Branching,
            SegmentationType::PerBucket => Segmentation::PerBucket,
        }
    }
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[arg(long, help = "Width of the keys in bits, 32 or 64.", default_value_t = 32)]
    pub key_width: u32,
}

impl KeyArgs {
    fn width(&self) -> anyhow::Result<KeyWidth> {
        Ok(KeyWidth::from_bits(self.key_width)?)
    }
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    #[arg(long, help = "JSON file with an index configuration, overridden by the flags.")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Number of top key bits which select the bucket.")]
    pub prefix_bits: Option<u32>,

    #[arg(long, help = "Error threshold of the segmentation.")]
    pub error: Option<u64>,

    #[arg(long, help = "How the buckets are segmented.")]
    pub segmentation: Option<SegmentationType>,

    #[arg(long, help = "Train on a single thread.")]
    pub sequential: bool,
}

impl IndexArgs {
    fn config(&self) -> anyhow::Result<IndexConfig> {
        let mut config = load_config(self.config.as_deref())?;

        if let Some(prefix_bits) = self.prefix_bits {
            config.prefix_bits = prefix_bits;
        }
        if let Some(error) = self.error {
            config.error_threshold = error;
        }
        if let Some(segmentation) = self.segmentation {
            info!("using {} segmentation", segmentation.as_ref());
            config.segmentation = segmentation.into();
        }
        if self.sequential {
            config.parallel = false;
        }

        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, help = "Sorted dataset file.")]
    pub dataset: PathBuf,

    #[arg(long, help = "Base path of the model files.")]
    pub output: PathBuf,

    #[arg(long, help = "Also write the boundaries of every bucket to this file.")]
    pub boundaries: Option<PathBuf>,

    #[command(flatten)]
    pub key: KeyArgs,

    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(long, help = "Sorted dataset file.")]
    pub dataset: PathBuf,

    #[arg(long, help = "Base path of the model files.")]
    pub model: PathBuf,

    #[command(flatten)]
    pub key: KeyArgs,

    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(long, help = "Dataset file to write.")]
    pub output: PathBuf,

    #[arg(long, help = "Number of keys.", default_value_t = 1 << 20)]
    pub size: usize,

    #[arg(long, help = "Largest possible key, defaults to the largest key of the width.")]
    pub max_key: Option<u64>,

    #[arg(long, help = "Seed of the random number generator.")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub key: KeyArgs,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[arg(long, help = "Sorted dataset file, the source of the queried keys.")]
    pub dataset: PathBuf,

    #[arg(long, help = "Base path of the model files.")]
    pub model: PathBuf,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub warmup: Duration,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "3s")]
    pub trial: Duration,

    #[arg(long, help = "Print the results as JSON.")]
    pub json: bool,

    #[command(flatten)]
    pub key: KeyArgs,

    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long, help = "Boundaries file written by `train --boundaries`.")]
    pub boundaries: PathBuf,

    #[arg(long, help = "Print at most this many breakpoints.")]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub key: KeyArgs,
}

/// Calls a generic function with the key type selected at run time.
macro_rules! with_key_width {
    ($width:expr, $func:ident($($arg:expr),*)) => {
        match $width {
            KeyWidth::U32 => $func::<u32>($($arg),*),
            KeyWidth::U64 => $func::<u64>($($arg),*),
        }
    };
}

fn train<K: Key>(args: &TrainArgs) -> anyhow::Result<()> {
    let mut index = LearnedIndex::<K>::new(args.index.config()?)?;

    let start = Instant::now();
    index
        .train_file(&args.dataset)
        .with_context(|| format!("training on `{}` failed", args.dataset.display()))?;
    let elapsed = Duration::from_millis(start.elapsed().as_millis() as u64);

    println!("trained in {}", humantime::format_duration(elapsed));
    println!("{}", index.stats());

    index.save(&args.output)?;
    if let Some(path) = &args.boundaries {
        index.save_boundaries(path)?;
    }

    Ok(())
}

fn validate<K: Key>(args: &ValidateArgs) -> anyhow::Result<()> {
    let index = LearnedIndex::<K>::load(&args.model, args.index.config()?)?;
    let dataset = Dataset::<K>::open(&args.dataset)?;

    let measured = index.validate(&dataset)?;
    let stored = index.max_error()?;
    println!("max error {measured} (stored {stored})");

    if measured > stored {
        bail!(
            "models at `{}` exceed their stored max error of {stored}",
            args.model.display()
        );
    }

    Ok(())
}

fn generate<K: Key + SampleUniform>(args: &GenerateArgs) -> anyhow::Result<()> {
    let max = match args.max_key {
        Some(max) => num::cast::<u64, K>(max)
            .with_context(|| format!("max key {max} does not fit in {} bits", K::BITS))?,
        None => K::max_value(),
    };

    let keys = generate_keys(args.size, max, args.seed);
    Dataset::from_sorted(keys)?.save(&args.output)?;

    println!("wrote {} keys to `{}`", args.size, args.output.display());
    Ok(())
}

fn bench<K: Key>(args: &BenchArgs) -> anyhow::Result<()> {
    let index = LearnedIndex::<K>::load(&args.model, args.index.config()?)?;
    let dataset = Dataset::<K>::open(&args.dataset)?;

    if dataset.is_empty() {
        bail!("dataset `{}` has no keys to query", args.dataset.display());
    }
    if index.validate(&dataset)? > index.max_error()? {
        warn!("models were not trained on this dataset, lookups may miss");
    }

    let mut rng = thread_rng();
    let positions = Uniform::from(0..dataset.len());

    let find = bench_function(
        || dataset[positions.sample(&mut rng)],
        |key| index.find(key),
        args.warmup,
        args.trial,
    );
    let lookup = bench_function(
        || dataset[positions.sample(&mut rng)],
        |key| index.lookup(&dataset, key),
        args.warmup,
        args.trial,
    );
    let binary_search = bench_function(
        || dataset[positions.sample(&mut rng)],
        |key| dataset.lower_bound(key),
        args.warmup,
        args.trial,
    );

    let reports = [
        BenchReport::new("find", &find),
        BenchReport::new("lookup", &lookup),
        BenchReport::new("binary_search", &binary_search),
    ];

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{report}");
        }
    }

    Ok(())
}

fn inspect<K: Key>(args: &InspectArgs) -> anyhow::Result<()> {
    let boundaries = store::read_boundaries::<K>(&args.boundaries)?;

    match (boundaries.first(), boundaries.last()) {
        (Some(first), Some(last)) => println!(
            "{} breakpoints, keys {} to {}, ranks {} to {}",
            boundaries.len(),
            first.key,
            last.key,
            first.rank,
            last.rank
        ),
        _ => println!("no breakpoints"),
    }

    for point in boundaries.iter().take(args.limit.unwrap_or(usize::MAX)) {
        println!("{}\t{}", point.key, point.rank);
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    log_init::init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Train(args) => with_key_width!(args.key.width()?, train(args)),
        Commands::Validate(args) => with_key_width!(args.key.width()?, validate(args)),
        Commands::Generate(args) => with_key_width!(args.key.width()?, generate(args)),
        Commands::Bench(args) => with_key_width!(args.key.width()?, bench(args)),
        Commands::Inspect(args) => with_key_width!(args.key.width()?, inspect(args)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_names() {
        assert_eq!(SegmentationType::Branching.as_ref(), "branching");
        assert_eq!(SegmentationType::PerBucket.as_ref(), "per-bucket");
        assert_eq!(
            Segmentation::from(SegmentationType::PerBucket),
            Segmentation::PerBucket
        );
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(
            "hinge validate --dataset keys --model nn --prefix-bits 4 --segmentation per-bucket --sequential"
                .split_whitespace(),
        );

        let Commands::Validate(args) = cli.command else {
            panic!("parsed the wrong command");
        };
        let config = args.index.config().unwrap();
        assert_eq!(config.prefix_bits, 4);
        assert_eq!(config.segmentation, Segmentation::PerBucket);
        assert!(!config.parallel);
        assert_eq!(args.key.width().unwrap(), KeyWidth::U32);
    }
}

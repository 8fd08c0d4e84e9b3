//! Build-time parameters of a learned index.

use crate::{Error, Key, Result};
use serde::{Deserialize, Serialize};

/// Largest supported prefix length. Each index owns `2^prefix_bits` models.
pub const MAX_PREFIX_BITS: u32 = 24;

/// How the boundary lists of the buckets are produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Segmentation {
    /// One pass over the whole dataset, with a forced breakpoint at every bucket boundary
    #[default]
    Branching,

    /// An independent pass per bucket, which can run in parallel
    PerBucket,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of top key bits which select the bucket of a key
    pub prefix_bits: u32,

    /// Interior points of a segment are interpolated to less than this many ranks
    pub error_threshold: u64,

    pub segmentation: Segmentation,

    /// Train buckets on the rayon thread pool
    pub parallel: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix_bits: 8,
            error_threshold: 16,
            segmentation: Segmentation::default(),
            parallel: true,
        }
    }
}

impl IndexConfig {
    pub fn new(prefix_bits: u32, error_threshold: u64) -> Self {
        Self {
            prefix_bits,
            error_threshold,
            ..Default::default()
        }
    }

    pub fn with_segmentation(mut self, segmentation: Segmentation) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn num_buckets(&self) -> usize {
        1 << self.prefix_bits
    }

    /// Checks that the configuration can be used with keys of type `K`.
    pub fn validate<K: Key>(&self) -> Result<()> {
        let max = K::BITS.min(MAX_PREFIX_BITS);
        if self.prefix_bits > max {
            return Err(Error::InvalidConfiguration(format!(
                "prefix of {} bits, expected at most {max} for {}-bit keys",
                self.prefix_bits,
                K::BITS
            )));
        }

        Ok(())
    }
}

/// Key widths that can be chosen at run time, e.g. from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyWidth {
    U32,
    U64,
}

impl KeyWidth {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            32 => Ok(Self::U32),
            64 => Ok(Self::U64),
            _ => Err(Error::InvalidConfiguration(format!(
                "unsupported key width of {bits} bits, expected 32 or 64"
            ))),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::U32 => 32,
            Self::U64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_bits_range() {
        assert!(IndexConfig::new(0, 1).validate::<u32>().is_ok());
        assert!(IndexConfig::new(24, 1).validate::<u64>().is_ok());
        assert!(matches!(
            IndexConfig::new(25, 1).validate::<u64>(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn key_widths() {
        assert_eq!(KeyWidth::from_bits(32).unwrap(), KeyWidth::U32);
        assert_eq!(KeyWidth::from_bits(64).unwrap().bytes(), 8);
        assert!(matches!(
            KeyWidth::from_bits(16),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn json_defaults() {
        let config: IndexConfig =
            serde_json::from_str(r#"{ "prefix_bits": 4, "segmentation": "per-bucket" }"#).unwrap();

        assert_eq!(config.prefix_bits, 4);
        assert_eq!(config.error_threshold, 16);
        assert_eq!(config.segmentation, Segmentation::PerBucket);
        assert!(config.parallel);
    }
}

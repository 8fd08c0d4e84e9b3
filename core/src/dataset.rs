//! The sorted, immutable key array an index is trained on.
//!
//! On disk a dataset is a `u64` count followed by `count` little-endian keys, which is
//! exactly the `bincode` encoding of a `Vec<K>`.

use crate::{Error, Key, Result};
use log::debug;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    ops::Deref,
    path::Path,
};

/// Size of the key count in front of the keys
const HEADER_BYTES: usize = std::mem::size_of::<u64>();

/// Keys in non-decreasing order. Duplicates are allowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset<K> {
    keys: Vec<K>,
}

impl<K: Key> Dataset<K> {
    /// Wraps keys which must already be sorted.
    pub fn from_sorted(keys: Vec<K>) -> Result<Self> {
        if let Some(position) = keys.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(Error::Unsorted {
                position: position + 1,
            });
        }

        Ok(Self { keys })
    }

    /// Reads a dataset file, checking that its length matches the key count and width.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|err| Error::dataset_io(path, err))?;
        let len = file
            .metadata()
            .map_err(|err| Error::dataset_io(path, err))?
            .len();

        // Decoded straight from the file, a short file fails here with an unexpected EOF
        let keys: Vec<K> = bincode::deserialize_from(BufReader::new(file))
            .map_err(|err| Error::dataset_io(path, err))?;

        let expected = (HEADER_BYTES + keys.len() * K::BYTES) as u64;
        if len != expected {
            return Err(Error::dataset_io(
                path,
                Error::malformed(format!(
                    "{} keys of {} bytes need {expected} bytes, found {len}",
                    keys.len(),
                    K::BYTES,
                )),
            ));
        }

        debug!("read {} keys from `{}`", keys.len(), path.display());
        Self::from_sorted(keys)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let file = File::create(path).map_err(|err| Error::dataset_io(path, err))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &self.keys)
            .map_err(|err| Error::dataset_io(path, err))?;
        writer.flush().map_err(|err| Error::dataset_io(path, err))?;

        debug!("wrote {} keys to `{}`", self.keys.len(), path.display());
        Ok(())
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn into_keys(self) -> Vec<K> {
        self.keys
    }

    /// Position of the first key which is not smaller than `key`.
    pub fn lower_bound(&self, key: K) -> usize {
        self.keys.partition_point(|&k| k < key)
    }
}

impl<K> Deref for Dataset<K> {
    type Target = [K];

    fn deref(&self) -> &Self::Target {
        &self.keys
    }
}

//! Binary persistence of compiled models and the debug boundary artifact.
//!
//! A model file holds a `u32` neuron count, then the `weight1`, `bias1` and `weight2`
//! arrays, then `bias2`, all little-endian. The observed max error is kept next to the
//! models as decimal text.

use crate::{path_with_suffix, Breakpoint, Error, Key, ReluModel, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

const F64_BYTES: usize = std::mem::size_of::<f64>();
const COUNT_BYTES: usize = std::mem::size_of::<u32>();

/// `<base>_<bucket>`
pub fn model_path(base: impl AsRef<Path>, bucket: usize) -> PathBuf {
    path_with_suffix(base, bucket)
}

/// `<base>_max_error`
pub fn max_error_path(base: impl AsRef<Path>) -> PathBuf {
    path_with_suffix(base, "max_error")
}

/// Bincode writer which attributes every failure to the model file at `path`.
struct ModelWriter<'p> {
    path: &'p Path,
    inner: BufWriter<File>,
}

impl<'p> ModelWriter<'p> {
    fn create(path: &'p Path) -> Result<Self> {
        let file = File::create(path).map_err(|err| Error::model_io(path, err))?;
        Ok(Self {
            path,
            inner: BufWriter::new(file),
        })
    }

    fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.inner, value).map_err(|err| Error::model_io(self.path, err))
    }

    fn write_all<T: Serialize>(&mut self, values: &[T]) -> Result<()> {
        values.iter().try_for_each(|value| self.write(value))
    }

    fn finish(mut self) -> Result<()> {
        self.inner.flush().map_err(|err| Error::model_io(self.path, err))
    }
}

/// Reads a whole model file, then decodes it front to back.
struct ModelReader<'p> {
    path: &'p Path,
    bytes: Vec<u8>,
    offset: usize,
}

impl<'p> ModelReader<'p> {
    fn open(path: &'p Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|err| Error::model_io(path, err))?;
        Ok(Self {
            path,
            bytes,
            offset: 0,
        })
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut rest = &self.bytes[self.offset..];
        let before = rest.len();

        let value = bincode::deserialize_from(&mut rest).map_err(|err| Error::model_io(self.path, err))?;
        self.offset += before - rest.len();

        Ok(value)
    }

    fn read_all<T: DeserializeOwned>(&mut self, count: usize) -> Result<Vec<T>> {
        (0..count).map(|_| self.read()).collect()
    }

    fn malformed(&self, message: String) -> Error {
        Error::model_io(self.path, Error::malformed(message))
    }
}

pub fn write_model(path: impl AsRef<Path>, model: &ReluModel) -> Result<()> {
    let path = path.as_ref();
    let num_neurons = u32::try_from(model.num_neurons()).map_err(|_| {
        Error::model_io(
            path,
            Error::malformed(format!("{} neurons don't fit the file format", model.num_neurons())),
        )
    })?;

    let mut writer = ModelWriter::create(path)?;
    writer.write(&num_neurons)?;
    writer.write_all(model.weight1())?;
    writer.write_all(model.bias1())?;
    writer.write_all(model.weight2())?;
    writer.write(&model.bias2())?;
    writer.finish()
}

pub fn read_model(path: impl AsRef<Path>) -> Result<ReluModel> {
    let path = path.as_ref();
    let mut reader = ModelReader::open(path)?;

    let num_neurons = reader.read::<u32>()? as usize;

    // Check the size up front, so a corrupt count can't trigger a huge allocation
    let expected = (3 * num_neurons + 1) * F64_BYTES;
    if reader.remaining() != expected {
        return Err(reader.malformed(format!(
            "{num_neurons} neurons need {} bytes, found {}",
            COUNT_BYTES + expected,
            COUNT_BYTES + reader.remaining()
        )));
    }

    let weight1 = reader.read_all(num_neurons)?;
    let bias1 = reader.read_all(num_neurons)?;
    let weight2 = reader.read_all(num_neurons)?;
    let bias2 = reader.read()?;

    Ok(ReluModel::from_parts(weight1, bias1, weight2, bias2))
}

pub fn write_max_error(path: impl AsRef<Path>, max_error: u64) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, max_error.to_string()).map_err(|err| Error::model_io(path, err))
}

pub fn read_max_error(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| Error::model_io(path, err))?;

    text.trim().parse().map_err(|err| {
        Error::model_io(
            path,
            Error::malformed(format!("max error `{}` is not an integer: {err}", text.trim())),
        )
    })
}

/// Writes `(key, u64 rank)` pairs back to back, for offline inspection.
pub fn write_boundaries<K: Key>(path: impl AsRef<Path>, boundaries: &[Breakpoint<K>]) -> Result<()> {
    let path = path.as_ref();

    let mut writer = ModelWriter::create(path)?;
    writer.write_all(boundaries)?;
    writer.finish()
}

pub fn read_boundaries<K: Key>(path: impl AsRef<Path>) -> Result<Vec<Breakpoint<K>>> {
    let path = path.as_ref();
    let mut reader = ModelReader::open(path)?;

    let width = K::BYTES + std::mem::size_of::<u64>();
    if reader.remaining() % width != 0 {
        return Err(reader.malformed(format!(
            "{} bytes is not a whole number of {width} byte breakpoints",
            reader.remaining()
        )));
    }

    let count = reader.remaining() / width;
    reader.read_all(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_model() -> ReluModel {
        let points: Vec<Breakpoint<u32>> = [(0, 0), (2, 1), (5, 2), (10, 3), (22, 4), (30, 9)]
            .into_iter()
            .map(|(k, r)| Breakpoint::new(k, r))
            .collect();
        ReluModel::compile(&points).unwrap()
    }

    #[test]
    fn paths() {
        assert_eq!(model_path("out/nn", 17), PathBuf::from("out/nn_17"));
        assert_eq!(max_error_path("out/nn"), PathBuf::from("out/nn_max_error"));
    }

    #[test]
    fn model_file_layout() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");

        let model = sample_model();
        write_model(&path, &model)?;

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 4 + (3 * 5 + 1) * 8);
        assert_eq!(&bytes[..4], &5_u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &model.weight1()[0].to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..], &model.bias2().to_le_bytes());

        assert_eq!(read_model(&path)?, model);
        Ok(())
    }

    #[test]
    fn constant_model_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");

        write_model(&path, &ReluModel::constant(12))?;
        assert_eq!(std::fs::read(&path).unwrap().len(), 4 + 8);
        assert_eq!(read_model(&path)?, ReluModel::constant(12));
        Ok(())
    }

    #[test]
    fn short_or_missing_model_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");

        write_model(&path, &sample_model())?;
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        assert!(matches!(read_model(&path), Err(Error::ModelIo { .. })));
        assert!(matches!(
            read_model(dir.path().join("missing")),
            Err(Error::ModelIo { .. })
        ));
        assert!(matches!(
            write_model(dir.path().join("missing/model"), &sample_model()),
            Err(Error::ModelIo { .. })
        ));
        Ok(())
    }

    #[test]
    fn max_error_side_car() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = max_error_path(dir.path().join("nn"));

        write_max_error(&path, 17)?;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "17");
        assert_eq!(read_max_error(&path)?, 17);

        std::fs::write(&path, "seventeen").unwrap();
        assert!(matches!(read_max_error(&path), Err(Error::ModelIo { .. })));
        Ok(())
    }

    #[test]
    fn boundaries_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boundaries");

        let boundaries = vec![Breakpoint::new(3_u64, 0), Breakpoint::new(90, 12)];
        write_boundaries(&path, &boundaries)?;

        assert_eq!(std::fs::read(&path).unwrap().len(), 2 * 16);
        assert_eq!(read_boundaries::<u64>(&path)?, boundaries);
        assert!(matches!(
            read_boundaries::<u32>(&path),
            Err(Error::ModelIo { .. })
        ));
        Ok(())
    }
}

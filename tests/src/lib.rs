#[cfg(test)]
mod tests {
    use hinge_engine::prelude::*;
    use hinge_engine::store;
    use hinge_engine::Error;
    use rand::{distributions::uniform::SampleUniform, thread_rng, Rng};
    use rand_distr::Uniform;
    use tempfile::tempdir;

    #[static_init::constructor(0)]
    extern "C" fn _log_init() {
        log_init::init();
    }

    fn random_dataset<K: Key + SampleUniform>(num: usize, max: K) -> Dataset<K> {
        let mut keys: Vec<K> = thread_rng()
            .sample_iter(Uniform::new(K::zero(), max))
            .take(num)
            .collect();
        keys.sort();

        Dataset::from_sorted(keys).unwrap()
    }

    fn assert_lookups<K: Key>(index: &LearnedIndex<K>, dataset: &Dataset<K>) {
        for &key in dataset.iter() {
            assert_eq!(
                index.lookup(dataset, key).unwrap(),
                Some(dataset.lower_bound(key)),
                "lookup of {key}"
            );
        }
    }

    fn test_persisted_index<K: Key + SampleUniform>(
        config: IndexConfig,
        max: K,
    ) -> hinge_engine::Result<()> {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("nn");

        let num = 20_000;
        let dataset = random_dataset(num, max);

        let mut index = LearnedIndex::new(config.clone())?;
        index.train(&dataset)?;
        assert_lookups(&index, &dataset);
        index.save(&base)?;

        // One model per bucket plus the max error
        let files = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, config.num_buckets() + 1);

        let loaded = LearnedIndex::<K>::load(&base, config)?;
        assert!(loaded.is_ready());
        assert_eq!(loaded.max_error()?, index.max_error()?);
        assert_eq!(loaded.validate(&dataset)?, index.max_error()?);

        for (trained, loaded) in index.buckets().iter().zip(loaded.buckets()) {
            assert_eq!(trained.model(), loaded.model());
            assert!(loaded.span().is_none());
        }

        for &key in dataset.iter() {
            assert_eq!(index.find(key)?, loaded.find(key)?);
        }
        assert_lookups(&loaded, &dataset);

        Ok(())
    }

    #[test]
    fn test_persisted_index_1() -> hinge_engine::Result<()> {
        test_persisted_index(IndexConfig::new(0, 1), 1_u32 << 24)
    }

    #[test]
    fn test_persisted_index_2() -> hinge_engine::Result<()> {
        test_persisted_index(IndexConfig::new(4, 8), 1_u32 << 24)
    }

    #[test]
    fn test_persisted_index_3() -> hinge_engine::Result<()> {
        test_persisted_index(IndexConfig::new(8, 16), u32::MAX)
    }

    #[test]
    fn test_persisted_index_4() -> hinge_engine::Result<()> {
        test_persisted_index(
            IndexConfig::new(8, 64).with_segmentation(Segmentation::PerBucket),
            u32::MAX,
        )
    }

    #[test]
    fn test_persisted_index_5() -> hinge_engine::Result<()> {
        test_persisted_index(IndexConfig::new(2, 4).with_parallel(false), 1_u32 << 16)
    }

    #[test]
    fn test_persisted_index_6() -> hinge_engine::Result<()> {
        test_persisted_index(IndexConfig::new(8, 16), 1_u64 << 40)
    }

    #[test]
    fn test_persisted_index_7() -> hinge_engine::Result<()> {
        test_persisted_index(
            IndexConfig::new(10, 32).with_segmentation(Segmentation::PerBucket),
            u64::MAX,
        )
    }

    #[test]
    fn test_error_bound() -> hinge_engine::Result<()> {
        for epsilon in [0, 1, 4, 16, 64] {
            let dataset = random_dataset(20_000, 1_u32 << 20);

            let mut index = LearnedIndex::new(IndexConfig::new(4, epsilon))?;
            index.train(&dataset)?;
            assert!(index.max_error()? <= epsilon);
        }

        Ok(())
    }

    #[test]
    fn test_train_file() -> hinge_engine::Result<()> {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("keys");

        let dataset = random_dataset(5_000, u64::MAX);
        dataset.save(&path)?;
        assert_eq!(Dataset::<u64>::open(&path)?, dataset);

        let mut from_file = LearnedIndex::<u64>::new(IndexConfig::default())?;
        from_file.train_file(&path)?;

        let mut from_memory = LearnedIndex::new(IndexConfig::default())?;
        from_memory.train(&dataset)?;

        assert_eq!(from_file.stats(), from_memory.stats());
        for &key in dataset.iter() {
            assert_eq!(from_file.find(key)?, from_memory.find(key)?);
        }

        Ok(())
    }

    #[test]
    fn test_boundaries_file() -> hinge_engine::Result<()> {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("nn");
        let path = temp_dir.path().join("boundaries");

        let config = IndexConfig::new(3, 8);
        let mut index = LearnedIndex::new(config.clone())?;
        index.train(&random_dataset(10_000, 1_u32 << 24))?;
        index.save_boundaries(&path)?;

        let expected: Vec<Breakpoint<u32>> = index
            .buckets()
            .iter()
            .flat_map(|bucket| bucket.boundaries().to_vec())
            .collect();
        assert_eq!(store::read_boundaries::<u32>(&path)?, expected);

        // Keys and ranks only grow within a bucket
        for bucket in index.buckets() {
            for pair in bucket.boundaries().windows(2) {
                assert!(pair[0].key < pair[1].key);
                assert!(pair[0].rank < pair[1].rank);
            }
        }

        index.save(&base)?;
        let loaded = LearnedIndex::<u32>::load(&base, config)?;
        loaded.save_boundaries(&path)?;
        assert!(store::read_boundaries::<u32>(&path)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_concurrent_find() -> hinge_engine::Result<()> {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("nn");

        let config = IndexConfig::new(8, 16);
        let dataset = random_dataset(40_000, u64::MAX);

        let mut index = LearnedIndex::new(config.clone())?;
        index.train(&dataset)?;
        index.save(&base)?;
        let loaded = LearnedIndex::<u64>::load(&base, config)?;

        let expected: Vec<u64> = dataset
            .iter()
            .map(|&key| index.find(key))
            .collect::<hinge_engine::Result<_>>()?;

        let threads = 8;
        let chunk = dataset.len().div_ceil(threads);
        std::thread::scope(|scope| {
            let handles: Vec<_> = dataset
                .chunks(chunk)
                .zip(expected.chunks(chunk))
                .flat_map(|(keys, expected)| {
                    [&index, &loaded].map(|shared| {
                        scope.spawn(move || {
                            for (&key, &rank) in keys.iter().zip(expected) {
                                assert_eq!(shared.find(key).unwrap(), rank, "find of {key}");
                            }
                        })
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
        });

        Ok(())
    }

    fn assert_model_io(result: hinge_engine::Result<LearnedIndex<u32>>, file: &str) {
        match result {
            Err(Error::ModelIo { path, .. }) => {
                assert_eq!(path.file_name().unwrap(), file)
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("loaded an incomplete index"),
        }
    }

    #[test]
    fn test_missing_files() -> hinge_engine::Result<()> {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("nn");

        let mut index = LearnedIndex::new(IndexConfig::new(2, 8))?;
        index.train(&random_dataset(1_000, u32::MAX))?;
        index.save(&base)?;

        // More buckets than were saved
        assert_model_io(LearnedIndex::load(&base, IndexConfig::new(3, 8)), "nn_4");

        std::fs::remove_file(temp_dir.path().join("nn_max_error")).unwrap();
        assert_model_io(LearnedIndex::load(&base, IndexConfig::new(2, 8)), "nn_max_error");

        std::fs::remove_file(temp_dir.path().join("nn_1")).unwrap();
        assert_model_io(LearnedIndex::load(&base, IndexConfig::new(2, 8)), "nn_1");

        let mut untrained = LearnedIndex::<u32>::new(IndexConfig::default())?;
        assert!(matches!(
            untrained.train_file(temp_dir.path().join("keys")),
            Err(Error::DatasetIo { .. })
        ));
        assert!(!untrained.is_ready());

        Ok(())
    }
}

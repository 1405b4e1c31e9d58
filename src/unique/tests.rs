#[cfg(test)]
mod tests {
    use std::cmp::Ordering;
    use std::collections::BTreeSet;

    use tempfile::{tempdir, TempDir};

    use crate::unique::{
        collect_unique, ByteOrder, FixedStrideBuffer, LittleEndianU32, SequentialStream, Unique,
        UniqueConfig, UniqueError,
    };

    fn engine(budget: usize) -> (TempDir, Unique<LittleEndianU32>) {
        let temp_dir = tempdir().unwrap();
        let config = UniqueConfig::default()
            .with_memory_budget(budget)
            .with_temp_directory(temp_dir.path());
        let engine = Unique::new(LittleEndianU32, 4, config).unwrap();
        (temp_dir, engine)
    }

    fn put_all(engine: &mut Unique<LittleEndianU32>, values: &[u32]) {
        for value in values {
            engine.put(&value.to_le_bytes()).unwrap();
        }
    }

    fn walk_u32(engine: &mut Unique<LittleEndianU32>) -> Vec<u32> {
        let mut out = Vec::new();
        engine
            .walk(|key| {
                out.push(u32::from_le_bytes(key.try_into().unwrap()));
                Ok::<_, UniqueError>(())
            })
            .unwrap();
        out
    }

    /// Deterministic shuffle of `0..n` with every value repeated `copies` times.
    fn scrambled(n: u32, copies: u32) -> Vec<u32> {
        let mut values = Vec::new();
        for copy in 0..copies {
            for i in 0..n {
                values.push((i * 37 + copy * 11) % n);
            }
        }
        values
    }

    #[test]
    fn test_walk_in_memory() {
        let (_dir, mut engine) = engine(1 << 20);
        put_all(&mut engine, &[3, 1, 2, 1]);

        assert_eq!(walk_u32(&mut engine), vec![1, 2, 3]);
        assert_eq!(engine.run_count(), 0);
        assert!(!engine.has_scratch_file());
    }

    #[test]
    fn test_walk_after_flushes() {
        // 32-byte elements: two keys per tree
        let (_dir, mut engine) = engine(64);
        assert_eq!(engine.max_elements(), 2);
        put_all(&mut engine, &[3, 1, 2, 1]);
        assert_eq!(engine.run_count(), 1);

        assert_eq!(walk_u32(&mut engine), vec![1, 2, 3]);
        assert_eq!(engine.run_count(), 2);
        assert!(engine.has_scratch_file());
    }

    #[test]
    fn test_cross_run_duplicate_emitted_once() {
        let (_dir, mut engine) = engine(96);
        assert_eq!(engine.max_elements(), 3);
        put_all(&mut engine, &[1, 3, 5, 2, 3, 6]);

        assert_eq!(walk_u32(&mut engine), vec![1, 2, 3, 5, 6]);
        let stats = engine.stats();
        assert_eq!(stats.keys_emitted, 5);
        assert_eq!(stats.duplicates_removed(), 1);
    }

    #[test]
    fn test_get_in_memory_into_buffer() {
        let (_dir, mut engine) = engine(1 << 20);
        put_all(&mut engine, &[5, 2, 8]);

        let mut buffer = FixedStrideBuffer::new();
        assert_eq!(engine.get(&mut buffer).unwrap(), 3);

        let expected: Vec<u8> = [2u32, 5, 8].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(buffer.as_bytes(), expected.as_slice());
        assert!(!engine.has_scratch_file());
        assert_eq!(engine.stats().scratch_bytes_written, 0);
    }

    #[test]
    fn test_get_many_runs_into_stream() {
        let (dir, mut engine) = engine(64);
        put_all(&mut engine, &scrambled(200, 2));
        assert!(engine.run_count() > 15);

        let mut stream = SequentialStream::new_in(dir.path(), 256);
        assert_eq!(engine.get(&mut stream).unwrap(), 200);
        assert!(engine.stats().collapse_passes >= 1);

        let bytes = stream.read_all().unwrap();
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|k| u32::from_le_bytes(k.try_into().unwrap()))
            .collect();
        assert_eq!(values, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_get_many_runs_into_buffer() {
        let (_dir, mut engine) = engine(64);
        put_all(&mut engine, &scrambled(120, 3));

        let mut buffer = FixedStrideBuffer::new();
        engine.get(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 120);
        assert_eq!(buffer.get(119), Some(&119u32.to_le_bytes()[..]));
    }

    #[test]
    fn test_walk_collapses_when_buffer_is_short() {
        let (_dir, mut engine) = engine(64);
        put_all(&mut engine, &scrambled(300, 2));
        let runs_before = engine.run_count();
        assert!(runs_before > 15);

        assert_eq!(walk_u32(&mut engine), (0..300).collect::<Vec<_>>());
        assert!(engine.stats().collapse_passes >= 1);
        assert!(engine.run_count() <= 15);
    }

    #[test]
    fn test_output_independent_of_budget() {
        let values = scrambled(500, 3);
        let expected: Vec<u32> = values.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        for budget in [64, 96, 256, 4096, 1 << 20] {
            let (_dir, mut engine) = engine(budget);
            put_all(&mut engine, &values);
            assert_eq!(walk_u32(&mut engine), expected, "budget {}", budget);
        }
    }

    #[test]
    fn test_reset_between_passes() {
        let (_dir, mut engine) = engine(64);
        put_all(&mut engine, &[10, 20, 30, 40, 50, 10]);
        assert_eq!(walk_u32(&mut engine), vec![10, 20, 30, 40, 50]);

        engine.reset().unwrap();
        assert_eq!(engine.run_count(), 0);
        assert_eq!(engine.elements_flushed(), 0);
        assert_eq!(engine.stats().puts, 0);

        put_all(&mut engine, &[7, 3, 7]);
        assert_eq!(walk_u32(&mut engine), vec![3, 7]);
    }

    #[test]
    fn test_finished_pass_rejects_use() {
        let (_dir, mut engine) = engine(1 << 20);
        put_all(&mut engine, &[1]);
        walk_u32(&mut engine);

        assert!(engine.is_finished());
        assert!(matches!(engine.put(&2u32.to_le_bytes()), Err(UniqueError::ResultConsumed)));
        let mut buffer = FixedStrideBuffer::new();
        assert!(matches!(engine.get(&mut buffer), Err(UniqueError::ResultConsumed)));
    }

    #[test]
    fn test_callback_error_poisons_engine() {
        let (_dir, mut engine) = engine(64);
        put_all(&mut engine, &[1, 2, 3, 4, 5]);

        let mut seen = 0;
        let result: anyhow::Result<u64> = engine.walk(|_| {
            seen += 1;
            if seen == 2 {
                anyhow::bail!("consumer gave up");
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, 2);
        assert!(engine.flush().is_err());

        engine.reset().unwrap();
        put_all(&mut engine, &[9]);
        assert_eq!(walk_u32(&mut engine), vec![9]);
    }

    #[test]
    fn test_scratch_failure_poisons_until_reset() {
        let temp_dir = tempdir().unwrap();
        // a regular file where the scratch directory should be
        let blocker = temp_dir.path().join("not_a_directory");
        std::fs::write(&blocker, b"occupied").unwrap();
        let config = UniqueConfig::default()
            .with_memory_budget(64)
            .with_temp_directory(&blocker);
        let mut engine = Unique::new(LittleEndianU32, 4, config).unwrap();

        put_all(&mut engine, &[1, 2]);
        let spill = engine.put(&3u32.to_le_bytes());
        assert!(matches!(spill, Err(UniqueError::Io(_))), "got {:?}", spill);
        assert!(matches!(engine.put(&4u32.to_le_bytes()), Err(UniqueError::ResultConsumed)));
        assert!(matches!(engine.flush(), Err(UniqueError::ResultConsumed)));
        assert!(!engine.has_scratch_file());

        engine.reset().unwrap();
        assert_eq!(engine.run_count(), 0);
        put_all(&mut engine, &[8, 5, 8]);
        assert_eq!(walk_u32(&mut engine), vec![5, 8]);
    }

    #[test]
    fn test_key_size_mismatch() {
        let (_dir, mut engine) = engine(1024);
        let result = engine.put(b"toolong");
        assert!(matches!(
            result,
            Err(UniqueError::KeySizeMismatch { expected: 4, actual: 7 })
        ));
        // the pass is still usable
        put_all(&mut engine, &[1]);
        assert_eq!(walk_u32(&mut engine), vec![1]);
    }

    #[test]
    fn test_counters_track_flushes() {
        let (_dir, mut engine) = engine(64);
        put_all(&mut engine, &[1, 2, 2, 3, 4, 5]);

        // trees of two: {1,2} and {3,4} went out, {5} is resident
        assert_eq!(engine.elements_flushed(), 4);
        assert_eq!(engine.elements_in_tree(), 1);
        assert_eq!(engine.found_records(), 5);

        let stats = engine.stats();
        assert_eq!(stats.puts, 6);
        assert_eq!(stats.duplicates_in_memory, 1);
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.scratch_bytes_written, 16);
    }

    #[test]
    fn test_explicit_flush() {
        let (_dir, mut engine) = engine(1 << 20);
        engine.flush().unwrap();
        assert_eq!(engine.run_count(), 0);

        put_all(&mut engine, &[4, 2]);
        engine.flush().unwrap();
        put_all(&mut engine, &[2, 1]);
        assert_eq!(engine.run_count(), 1);
        assert_eq!(walk_u32(&mut engine), vec![1, 2, 4]);
    }

    #[test]
    fn test_budget_below_one_element() {
        let temp_dir = tempdir().unwrap();
        let config = UniqueConfig::default()
            .with_memory_budget(64)
            .with_temp_directory(temp_dir.path());
        let mut engine = Unique::new(ByteOrder, 64, config).unwrap();
        assert_eq!(engine.max_elements(), 1);

        for byte in [3u8, 1, 3, 2] {
            engine.put(&[byte; 64]).unwrap();
        }
        let mut buffer = FixedStrideBuffer::new();
        assert_eq!(engine.get(&mut buffer).unwrap(), 3);
        assert_eq!(buffer.get(0), Some(&[1u8; 64][..]));
    }

    #[test]
    fn test_closure_comparator_reverses_order() {
        let temp_dir = tempdir().unwrap();
        let config = UniqueConfig::default()
            .with_memory_budget(64)
            .with_temp_directory(temp_dir.path());
        let descending = |a: &[u8], b: &[u8]| -> Ordering { b.cmp(a) };
        let keys: Vec<[u8; 2]> = vec![*b"ab", *b"zz", *b"mm", *b"ab", *b"cd"];

        let buffer = collect_unique(keys, 2, descending, config).unwrap();
        assert_eq!(buffer.as_bytes(), b"zzmmcdab");
    }

    #[test]
    fn test_zero_key_size_rejected() {
        let result = Unique::with_budget(ByteOrder, 0, 1024);
        assert!(matches!(result, Err(UniqueError::InvalidConfig(_))));
    }
}

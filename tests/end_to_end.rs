//! End-to-end sort scenarios against the `FsBackend` adapter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use xsort::{sort_listfile, DuplicatePolicy, FsBackend, GetRecord, PutRecord, RecordSink, RecordSource, SortConfig};

struct VecSource {
    records: Vec<Vec<u8>>,
    cursor: usize,
}

impl VecSource {
    fn new(records: Vec<Vec<u8>>) -> Self {
        Self { records, cursor: 0 }
    }
}

impl RecordSource for VecSource {
    fn get_record(&mut self, buf: &mut Vec<u8>) -> GetRecord {
        if self.cursor >= self.records.len() {
            return GetRecord::EndOfStream;
        }
        buf.extend_from_slice(&self.records[self.cursor]);
        self.cursor += 1;
        GetRecord::Success(buf.len())
    }
}

struct VecSink {
    records: Vec<Vec<u8>>,
    stop_after: Option<usize>,
}

impl VecSink {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            stop_after: None,
        }
    }

    fn stopping_after(n: usize) -> Self {
        Self {
            records: Vec::new(),
            stop_after: Some(n),
        }
    }
}

impl RecordSink for VecSink {
    fn put_record(&mut self, record: &[u8]) -> PutRecord {
        self.records.push(record.to_vec());
        if let Some(n) = self.stop_after {
            if self.records.len() >= n {
                return PutRecord::Stop;
            }
        }
        PutRecord::Ok
    }
}

fn int_bytes(values: &[i32]) -> Vec<Vec<u8>> {
    values.iter().map(|v| v.to_le_bytes().to_vec()).collect()
}

fn int_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a = i32::from_le_bytes(a.try_into().unwrap());
    let b = i32::from_le_bytes(b.try_into().unwrap());
    a.cmp(&b)
}

fn to_ints(records: &[Vec<u8>]) -> Vec<i32> {
    records
        .iter()
        .map(|r| i32::from_le_bytes(r.as_slice().try_into().unwrap()))
        .collect()
}

#[test]
fn sorted_ten_integers_eliminate() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert_eq!(to_ints(&sink.records), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn reverse_ten_integers_link() {
    let config = SortConfig {
        duplicate_policy: DuplicatePolicy::Link,
        ..SortConfig::default_config()
    };
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert_eq!(to_ints(&sink.records), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn duplicates_with_link_preserve_encounter_order() {
    let config = SortConfig {
        duplicate_policy: DuplicatePolicy::Link,
        ..SortConfig::default_config()
    };
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[3, 1, 2, 3, 2, 3]));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    // LINK keeps every input record; only their relative order is sorted,
    // with duplicates of a keeper immediately following it.
    assert_eq!(to_ints(&sink.records), vec![1, 2, 2, 3, 3, 3]);
}

#[test]
fn duplicates_with_eliminate_drop_all_but_the_keeper() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[3, 1, 2, 3, 2, 3]));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert_eq!(to_ints(&sink.records), vec![1, 2, 3]);
}

#[test]
fn forced_multi_pass_merge_sorts_a_thousand_random_integers() {
    let mut config = SortConfig::small_memory();
    // Arena sized to hold roughly 3 four-byte records plus slot overhead,
    // forcing many runs and at least two merge passes.
    config.page_size = 256;
    config.sort_buffer_pages = 4;
    config.default_temp_file_pages = 4;

    let mut backend = FsBackend::new(config.page_size).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let values: Vec<i32> = (0..1000).map(|_| rng.gen_range(-10_000..10_000)).collect();
    let mut source = VecSource::new(int_bytes(&values));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 200).unwrap();

    let mut expected = values.clone();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(to_ints(&sink.records), expected);
}

#[test]
fn one_long_record_among_small_ones() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();

    let mut records: Vec<Vec<u8>> = vec![vec![1u8; 10], vec![9u8; 10]];
    records.push(vec![5u8; 4 * config.page_size]);
    records.push(vec![3u8; 10]);
    records.push(vec![7u8; 10]);

    let mut source = VecSource::new(records);
    let mut sink = VecSink::new();

    // Order purely by the first byte, so the long record (all 5s) sorts
    // between the record of 3s and the record of 7s.
    let mut cmp = |a: &[u8], b: &[u8]| a[0].cmp(&b[0]);
    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut cmp, 0).unwrap();

    assert_eq!(sink.records.len(), 5);
    let first_bytes: Vec<u8> = sink.records.iter().map(|r| r[0]).collect();
    assert_eq!(first_bytes, vec![1, 3, 5, 7, 9]);
    assert_eq!(sink.records[2].len(), 4 * config.page_size);
}

#[test]
fn consumer_stop_after_first_record_is_not_an_error() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));
    let mut sink = VecSink::stopping_after(1);

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert_eq!(sink.records.len(), 1);
    assert_eq!(to_ints(&sink.records), vec![1]);
}

#[test]
fn empty_input_produces_no_output() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(Vec::new());
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert!(sink.records.is_empty());
}

#[test]
fn single_record_round_trips() {
    let config = SortConfig::default_config();
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource::new(int_bytes(&[42]));
    let mut sink = VecSink::new();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    assert_eq!(to_ints(&sink.records), vec![42]);
}

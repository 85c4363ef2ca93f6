use proptest::prelude::*;
use std::cmp::Ordering;
use xsort::{sort_listfile, DuplicatePolicy, FsBackend, GetRecord, PutRecord, RecordSink, RecordSource, SortConfig};

struct VecSource {
    records: Vec<Vec<u8>>,
    cursor: usize,
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

#[derive(Default)]
struct VecSink {
    records: Vec<Vec<u8>>,
}

impl RecordSink for VecSink {
    fn put_record(&mut self, record: &[u8]) -> PutRecord {
        self.records.push(record.to_vec());
        PutRecord::Ok
    }
}

fn int_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a = i32::from_le_bytes(a.try_into().unwrap());
    let b = i32::from_le_bytes(b.try_into().unwrap());
    a.cmp(&b)
}

fn run_sort(values: &[i32], policy: DuplicatePolicy) -> Vec<i32> {
    // A tiny arena and few pages per temp file push even modest inputs
    // through several flushed runs and merge passes.
    let config = SortConfig {
        page_size: 256,
        sort_buffer_pages: 4,
        default_temp_file_pages: 4,
        duplicate_policy: policy,
        ..SortConfig::small_memory()
    };
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let mut source = VecSource {
        records: values.iter().map(|v| v.to_le_bytes().to_vec()).collect(),
        cursor: 0,
    };
    let mut sink = VecSink::default();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut int_cmp, 0).unwrap();

    sink.records
        .iter()
        .map(|r| i32::from_le_bytes(r.as_slice().try_into().unwrap()))
        .collect()
}

proptest! {
    #[test]
    fn prop_eliminate_matches_sorted_dedup(values in prop::collection::vec(any::<i32>(), 0..300)) {
        let got = run_sort(&values, DuplicatePolicy::Eliminate);

        let mut expected = values.clone();
        expected.sort_unstable();
        expected.dedup();

        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_link_is_sorted_permutation_preserving_multiplicity(
        values in prop::collection::vec(any::<i32>(), 0..300)
    ) {
        let got = run_sort(&values, DuplicatePolicy::Link);

        prop_assert_eq!(got.len(), values.len());
        prop_assert!(got.windows(2).all(|w| w[0] <= w[1]));

        let mut got_sorted = got.clone();
        got_sorted.sort_unstable();
        let mut values_sorted = values.clone();
        values_sorted.sort_unstable();
        prop_assert_eq!(got_sorted, values_sorted);
    }

    #[test]
    fn prop_reversing_input_does_not_change_eliminate_output(
        mut values in prop::collection::vec(any::<i32>(), 0..200)
    ) {
        let forward = run_sort(&values, DuplicatePolicy::Eliminate);
        values.reverse();
        let backward = run_sort(&values, DuplicatePolicy::Eliminate);

        prop_assert_eq!(forward, backward);
    }
}

fn tag_cmp(a: &[u8], b: &[u8]) -> Ordering {
    i32::from_le_bytes(a[0..4].try_into().unwrap()).cmp(&i32::from_le_bytes(b[0..4].try_into().unwrap()))
}

#[test]
fn link_keeps_first_encountered_duplicate_as_keeper() {
    // Each record is a 4-byte key plus a 1-byte encounter tag; the
    // comparator only looks at the key, so equal keys are genuine
    // duplicates and the trailing tag reveals encounter order.
    let config = SortConfig {
        page_size: 256,
        sort_buffer_pages: 4,
        default_temp_file_pages: 4,
        duplicate_policy: DuplicatePolicy::Link,
        ..SortConfig::small_memory()
    };
    let mut backend = FsBackend::new(config.page_size).unwrap();
    let tagged: Vec<(i32, u8)> = vec![(5, 0), (3, 1), (5, 2), (5, 3), (1, 4)];
    let records: Vec<Vec<u8>> = tagged
        .iter()
        .map(|&(key, tag)| {
            let mut bytes = key.to_le_bytes().to_vec();
            bytes.push(tag);
            bytes
        })
        .collect();
    let mut source = VecSource { records, cursor: 0 };
    let mut sink = VecSink::default();

    sort_listfile(&config, &mut backend, &mut source, &mut sink, &mut tag_cmp, 0).unwrap();

    let keys: Vec<i32> = sink.records.iter().map(|r| i32::from_le_bytes(r[0..4].try_into().unwrap())).collect();
    assert_eq!(keys, vec![1, 5, 5, 5]);
    let tags: Vec<u8> = sink.records.iter().map(|r| r[4]).collect();
    assert_eq!(&tags[1..4], &[0, 2, 3], "keeper first, duplicates chained in encounter order");
}

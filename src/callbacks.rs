//! The record producer, consumer, and comparator interfaces.
//!
//! These are the query executor or index builder that feeds records in
//! and receives sorted records out — orthogonal to this core, consumed
//! only through these three traits.

/// What [`RecordSource::get_record`] returns in place of a plain `Result`,
/// because a callback returning "no more data" is not an error and a
/// callback returning "this record doesn't fit the buffer you gave me" is
/// a distinct, recoverable signal the run generator reacts to specially.
pub enum GetRecord {
    /// A record was written into the caller-provided buffer; this many
    /// bytes are valid.
    Success(usize),
    /// The producer is exhausted.
    EndOfStream,
    /// The record does not fit the buffer given; the caller should retry
    /// with a larger buffer (this is how long records are surfaced).
    DoesNotFit,
    /// The producer failed; propagate the message as a producer error.
    Error(String),
}

/// Pulls the next record into caller-provided storage.
pub trait RecordSource {
    /// Writes the next record into `buf`, returning how the read went.
    /// On [`GetRecord::DoesNotFit`], the core grows its buffer and calls
    /// again; the second call must receive the full record in one go.
    fn get_record(&mut self, buf: &mut Vec<u8>) -> GetRecord;
}

/// What [`RecordSink::put_record`] returns.
pub enum PutRecord {
    /// Continue.
    Ok,
    /// Stop gracefully; this is not an error.
    Stop,
    /// Fail; propagate the message.
    Error(String),
}

/// Receives the final sorted records, in order.
pub trait RecordSink {
    fn put_record(&mut self, record: &[u8]) -> PutRecord;
}

/// Imposes a strict weak order on record bytes. `compare(a, b) == 0`
/// triggers duplicate handling per the configured [`crate::DuplicatePolicy`].
pub trait Comparator {
    fn compare(&mut self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;
}

impl<F> Comparator for F
where
    F: FnMut(&[u8], &[u8]) -> std::cmp::Ordering,
{
    fn compare(&mut self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        self(a, b)
    }
}

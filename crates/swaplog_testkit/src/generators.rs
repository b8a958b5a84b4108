//! Self-describing records and proptest strategies.
//!
//! The router never frames records, so tests that want to check flushed
//! output write records that carry their own identity:
//!
//! ```text
//! +-------+-------------+-------------+-------------+-----------+
//! | magic | producer    | sequence    | payload len | payload   |
//! | 0xA5  | u32 LE      | u32 LE      | u32 LE      | len bytes |
//! +-------+-------------+-------------+-------------+-----------+
//! ```
//!
//! A flushed buffer is a run of records followed by zero padding, so a
//! parser can stop at the first zero byte where a magic is expected.

use proptest::prelude::*;

/// First byte of every generated record.
pub const RECORD_MAGIC: u8 = 0xA5;

/// Bytes before the payload.
pub const RECORD_HEADER_LEN: usize = 13;

/// Identity of a generated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    /// The producer (usually a thread index) that wrote it.
    pub producer: u32,
    /// Position in that producer's stream.
    pub sequence: u32,
}

/// Builds a record with a payload derived from its identity.
pub fn record(producer: u32, sequence: u32, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload_len);
    out.push(RECORD_MAGIC);
    out.extend_from_slice(&producer.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&(payload_len as u32).to_le_bytes());
    out.extend((0..payload_len).map(|i| payload_byte(producer, sequence, i)));
    out
}

fn payload_byte(producer: u32, sequence: u32, index: usize) -> u8 {
    (producer as usize * 31 + sequence as usize * 7 + index) as u8
}

/// Parses the records at the start of one flushed buffer.
///
/// Stops at zero padding or the end of the buffer.
///
/// # Errors
///
/// Returns a description of the first malformed record: a bad magic, a
/// truncated record, or a payload that does not match its identity.
pub fn parse_buffer(buffer: &[u8]) -> Result<Vec<RecordId>, String> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        match buffer[pos] {
            0 => break,
            RECORD_MAGIC => {}
            other => return Err(format!("bad magic {other:#04x} at offset {pos}")),
        }
        let header = buffer
            .get(pos..pos + RECORD_HEADER_LEN)
            .ok_or_else(|| format!("truncated header at offset {pos}"))?;
        let producer = read_u32(&header[1..5]);
        let sequence = read_u32(&header[5..9]);
        let len = read_u32(&header[9..13]) as usize;

        let start = pos + RECORD_HEADER_LEN;
        let payload = buffer
            .get(start..start + len)
            .ok_or_else(|| format!("truncated payload at offset {pos}"))?;
        if payload
            .iter()
            .enumerate()
            .any(|(i, &b)| b != payload_byte(producer, sequence, i))
        {
            return Err(format!(
                "corrupt payload for producer {producer} sequence {sequence}"
            ));
        }

        records.push(RecordId { producer, sequence });
        pos = start + len;
    }

    Ok(records)
}

/// Parses every buffer in flushed output made of `buffer_capacity`-sized
/// chunks.
///
/// # Errors
///
/// Returns an error if any chunk holds a malformed record.
pub fn parse_flushed(data: &[u8], buffer_capacity: usize) -> Result<Vec<RecordId>, String> {
    let mut records = Vec::new();
    for (index, chunk) in data.chunks(buffer_capacity).enumerate() {
        let parsed = parse_buffer(chunk).map_err(|e| format!("buffer {index}: {e}"))?;
        records.extend(parsed);
    }
    Ok(records)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

/// Strategy for payload lengths of small to medium records.
pub fn payload_len_strategy() -> impl Strategy<Value = usize> {
    0usize..512
}

/// Strategy for a producer's sequence of payload lengths.
pub fn record_sizes_strategy(max_records: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(payload_len_strategy(), 1..max_records.max(2))
}

/// Strategy for arbitrary raw write payloads.
pub fn raw_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

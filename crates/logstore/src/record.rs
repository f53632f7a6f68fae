//! Log record types and reserved values.

use common::{StoreError, StoreResult};
use tracing::error;

use crate::codec;

/// `fed_index` value marking a record as not part of the federated stream.
pub const FED_NONE: i64 = -1;

/// `log_index` of the reserved slot holding consensus persistent state.
pub const RESERVED_INDEX: i64 = -1;

/// `term` of the reserved slot.
pub const RESERVED_TERM: i64 = -1;

/// One durable log row, together with its predecessor's identity.
///
/// The predecessor pair is returned because the consensus module needs
/// `(prev_index, prev_term)` for its AppendEntries consistency check; index
/// 0 is its own predecessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub index: i64,
    pub term: i64,
    /// The state-machine command, already decompressed.
    pub payload: String,
    /// 0 while replicated-but-unapplied; apply wall-clock seconds after.
    pub timestamp: i64,
    /// `FED_NONE`, or this record's position in the federated stream.
    pub fed_index: i64,
    pub prev_index: i64,
    pub prev_term: i64,
}

impl LogRecord {
    /// Build a record from the 7-column self-join row produced by the log
    /// store's record query. Decode failures are structured errors carrying
    /// the record's identity; a record never reads back with a silently
    /// empty payload.
    pub(crate) fn from_row(row: &[Option<String>]) -> StoreResult<Self> {
        if row.len() != 7 {
            return Err(StoreError::Decode(format!(
                "log record row has {} columns, expected 7",
                row.len()
            )));
        }

        let index = field(row, 0)?;
        let term = field(row, 1)?;
        let packed = row[2]
            .clone()
            .ok_or_else(|| StoreError::Decode(format!("log record {index}: NULL payload")))?;
        let timestamp = field(row, 3)?;
        let fed_index = field(row, 4)?;
        let prev_index = field(row, 5)?;
        let prev_term = field(row, 6)?;

        let payload = codec::decompress(&packed).map_err(|e| {
            error!(index, fed_index, "cannot decode log record payload: {e}");
            StoreError::Decode(format!("log record {index} (fed {fed_index}): {e}"))
        })?;

        Ok(Self {
            index,
            term,
            payload,
            timestamp,
            fed_index,
            prev_index,
            prev_term,
        })
    }
}

fn field(row: &[Option<String>], i: usize) -> StoreResult<i64> {
    let text = row[i]
        .as_deref()
        .ok_or_else(|| StoreError::Decode(format!("log record column {i} is NULL")))?;
    text.parse()
        .map_err(|_| StoreError::Decode(format!("log record column {i}: not an integer: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn from_row_roundtrip() {
        let packed = codec::compress("UPDATE t SET x = 1").unwrap();
        let row = vec![
            col("4"),
            col("2"),
            col(&packed),
            col("0"),
            col("-1"),
            col("3"),
            col("2"),
        ];
        let record = LogRecord::from_row(&row).unwrap();
        assert_eq!(record.index, 4);
        assert_eq!(record.term, 2);
        assert_eq!(record.payload, "UPDATE t SET x = 1");
        assert_eq!(record.timestamp, 0);
        assert_eq!(record.fed_index, FED_NONE);
        assert_eq!(record.prev_index, 3);
        assert_eq!(record.prev_term, 2);
    }

    #[test]
    fn from_row_rejects_short_rows() {
        let err = LogRecord::from_row(&[col("1")]).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn from_row_rejects_corrupt_payload() {
        let row = vec![
            col("4"),
            col("2"),
            col("definitely not compressed"),
            col("0"),
            col("7"),
            col("3"),
            col("2"),
        ];
        let err = LogRecord::from_row(&row).unwrap_err();
        match err {
            StoreError::Decode(msg) => {
                // Identity context must survive into the error.
                assert!(msg.contains("log record 4"));
                assert!(msg.contains("fed 7"));
            }
            other => panic!("expected decode error, got {other}"),
        }
    }

    #[test]
    fn from_row_rejects_non_integer_columns() {
        let packed = codec::compress("x").unwrap();
        let row = vec![
            col("four"),
            col("2"),
            col(&packed),
            col("0"),
            col("-1"),
            col("3"),
            col("2"),
        ];
        assert!(matches!(
            LogRecord::from_row(&row),
            Err(StoreError::Decode(_))
        ));
    }
}

//! Gzip NDJSON batch encoding and object key layout.

use std::io::{Read, Write};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

/// Category name as used in keys and batch ids (`cs.AI` -> `cs_AI`).
pub fn category_slug(category: &str) -> String {
    category.replace('.', "_")
}

/// Object key for the `n`th batch of a category.
///
/// Layout: `raw/{slug}/{yyyy-mm-dd}/{slug}_batch_{n}_{unix_ts}.jsonl.gz`
pub fn object_key(category: &str, date: NaiveDate, n: u32, unix_ts: i64) -> String {
    let slug = category_slug(category);
    format!(
        "raw/{slug}/{}/{slug}_batch_{n}_{unix_ts}.jsonl.gz",
        date.format("%Y-%m-%d")
    )
}

/// Batch descriptor id matching [`object_key`].
pub fn batch_id(category: &str, date: NaiveDate, n: u32, unix_ts: i64) -> String {
    format!(
        "{}_{}_batch_{n}_{unix_ts}",
        category_slug(category),
        date.format("%Y-%m-%d")
    )
}

/// Serialize records one per line and gzip the result.
pub fn encode_ndjson_gz<T: Serialize>(records: &[T]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for record in records {
        serde_json::to_writer(&mut encoder, record)?;
        encoder.write_all(b"\n")?;
    }
    encoder.finish()
}

/// Decompress a gzip object and split it into non-empty lines.
///
/// A corrupt or truncated stream is an error; the content of each line is
/// left for the caller to parse.
pub fn decode_ndjson_gz(body: &[u8]) -> std::io::Result<Vec<Vec<u8>>> {
    let mut raw = Vec::new();
    GzDecoder::new(body).read_to_end(&mut raw)?;
    Ok(raw
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(<[u8]>::to_vec)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperRecord;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key("cs.AI", date(), 2, 1710000000),
            "raw/cs_AI/2024-03-09/cs_AI_batch_2_1710000000.jsonl.gz"
        );
        assert_eq!(
            batch_id("cs.AI", date(), 2, 1710000000),
            "cs_AI_2024-03-09_batch_2_1710000000"
        );
    }

    #[test]
    fn test_slug_without_dot() {
        assert_eq!(category_slug("econ"), "econ");
    }

    #[test]
    fn test_encoded_lines_match_records() {
        let records: Vec<PaperRecord> = (0..3)
            .map(|i| serde_json::from_str(&format!(r#"{{"entry_id":"id{i}"}}"#)).unwrap())
            .collect();
        let body = encode_ndjson_gz(&records).unwrap();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);

        let lines = decode_ndjson_gz(&body).unwrap();
        assert_eq!(lines.len(), 3);
        let first: PaperRecord = serde_json::from_slice(&lines[0]).unwrap();
        assert_eq!(first.entry_id, "id0");
    }

    #[test]
    fn test_blank_lines_dropped() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"a\":1}\r\n\n  \n{\"a\":2}").unwrap();
        let lines = decode_ndjson_gz(&encoder.finish().unwrap()).unwrap();
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec(), b"{\"a\":2}".to_vec()]);
    }

    #[test]
    fn test_corrupt_stream_is_error() {
        assert!(decode_ndjson_gz(b"definitely not gzip").is_err());
    }
}

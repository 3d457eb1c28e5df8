//! `bulkq encode`: print the bulk body for the input.

use std::io::BufRead;

use colored::Colorize;

use crate::cli::input::read_operations;
use crate::error::BulkError;
use crate::queue::encode_batch;

/// Encode every input operation into one bulk body.
///
/// Operations that cannot be encoded are reported on stderr and left out.
///
/// # Errors
///
/// Returns an error if the input is not valid operation NDJSON.
pub fn encode<R: BufRead>(reader: R) -> Result<String, BulkError> {
    let operations = read_operations(reader)?;
    let batch = encode_batch(&operations);

    for (index, err) in &batch.failures {
        eprintln!(
            "{}: operation {} skipped: {err}",
            "warning".yellow().bold(),
            index + 1
        );
    }

    let body = String::from_utf8(batch.body)
        .map_err(|e| BulkError::Parse(format!("UTF-8 error: {e}")))?;
    Ok(body.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let input = r#"{"op": "update", "collection": "a", "id": "1", "doc": {"n": 1}}
{"op": "delete", "collection": "a", "id": "2"}"#;
        let body = encode(input.as_bytes()).unwrap();
        assert_eq!(
            body,
            "{\"update\":{\"_index\":\"a\",\"_id\":\"1\"}}\n{\"doc\":{\"n\":1}}\n{\"delete\":{\"_index\":\"a\",\"_id\":\"2\"}}"
        );
    }

    #[test]
    fn test_encode_skips_unencodable() {
        let input = r#"{"op": "index", "collection": "a", "doc": 5}"#;
        assert_eq!(encode(input.as_bytes()).unwrap(), "");
    }
}

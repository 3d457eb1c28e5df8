//! Newline-delimited operation input.

use std::io::{BufRead, Lines};
use std::iter::Enumerate;

use serde::Deserialize;
use serde_json::Value;

use crate::error::BulkError;
use crate::queue::{Operation, OperationKind};

/// One input line.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OperationLine {
    op: OperationKind,
    collection: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    routing: Option<String>,
    #[serde(default)]
    doc: Option<Value>,
}

impl From<OperationLine> for Operation {
    fn from(line: OperationLine) -> Self {
        let op = Self::new(line.op, line.collection, line.id, line.doc.map(Into::into));
        match line.routing {
            Some(routing) => op.with_routing(routing),
            None => op,
        }
    }
}

/// Streams operations from NDJSON input, one JSON object per line. Blank
/// lines are skipped.
pub struct OperationReader<R> {
    lines: Enumerate<Lines<R>>,
}

impl<R: BufRead> OperationReader<R> {
    /// Read operations from `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines().enumerate(),
        }
    }
}

impl<R: BufRead> Iterator for OperationReader<R> {
    type Item = Result<Operation, BulkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some(parse_line(index + 1, trimmed));
            }
        }
    }
}

fn parse_line(number: usize, line: &str) -> Result<Operation, BulkError> {
    let parsed: OperationLine = serde_json::from_str(line)
        .map_err(|e| BulkError::Parse(format!("line {number}: {e}")))?;

    if parsed.op != OperationKind::Upsert && parsed.id.as_deref().unwrap_or("").is_empty() {
        return Err(BulkError::Parse(format!(
            "line {number}: {} requires an id",
            parsed.op
        )));
    }

    Ok(parsed.into())
}

/// Parse every operation in the input.
///
/// # Errors
///
/// Returns `BulkError::Parse` naming the first line that is not a valid
/// operation, or `BulkError::Io` if reading fails.
pub fn read_operations<R: BufRead>(reader: R) -> Result<Vec<Operation>, BulkError> {
    OperationReader::new(reader).collect()
}

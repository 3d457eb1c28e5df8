//! Transport that writes bulk bodies to a file or stdout.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::BulkError;
use crate::queue::{ItemResult, OperationKind, Transport, TransportError};

/// Writes each submitted bulk body and acknowledges every item in it.
pub struct WriterTransport {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl WriterTransport {
    /// Write bodies to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write bodies to a file, truncating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn file(path: &Path) -> Result<Self, BulkError> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    /// Write bodies to any writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl Transport for WriterTransport {
    fn submit(&self, payload: &[u8]) -> Result<Vec<ItemResult>, TransportError> {
        let items = count_actions(payload)?;

        let mut writer = self.writer.lock();
        writer
            .write_all(payload)
            .and_then(|()| writer.flush())
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(vec![ItemResult::accepted(200); items])
    }
}

/// Count the operations in a bulk body by walking its action lines.
fn count_actions(body: &[u8]) -> Result<usize, TransportError> {
    let mut lines = body.split(|b| *b == b'\n').filter(|line| !line.is_empty());
    let mut count = 0;

    while let Some(line) = lines.next() {
        let action: Value = serde_json::from_slice(line)
            .map_err(|e| TransportError::MalformedResponse(format!("bad action line: {e}")))?;
        let kind = action
            .as_object()
            .and_then(|fields| fields.keys().next())
            .and_then(|key| OperationKind::from_action(key))
            .ok_or_else(|| TransportError::MalformedResponse("unknown action".to_string()))?;

        if kind.has_document() && lines.next().is_none() {
            return Err(TransportError::MalformedResponse(
                "missing document line".to_string(),
            ));
        }
        count += 1;
    }

    Ok(count)
}

//! Path resolution for bulkq configuration files.
//!
//! bulkq keeps its files in `~/.bulkq/`:
//! - `config.yaml` - Queue and output settings

use std::path::PathBuf;

use crate::error::BulkError;

/// Paths to bulkq configuration files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.bulkq/`
    pub root: PathBuf,
    /// Config file: `~/.bulkq/config.yaml`
    pub config_file: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, BulkError> {
        let home = std::env::var("HOME")
            .map_err(|_| BulkError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".bulkq")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), BulkError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                BulkError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_root(PathBuf::from(".bulkq")))
    }
}

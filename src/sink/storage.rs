//! Append-only durable storage for samples and alert transitions

use crate::error::FlushError;
use crate::sensors::{AlertEvent, Sample};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One persisted record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum Record {
    Sample(Sample),
    Alert(AlertEvent),
}

/// Abstract append-only writer for samples and alert events
///
/// Concrete backends are external collaborators; the core only depends on
/// this contract.
pub trait SampleStore: Send {
    /// Append a batch of records durably
    fn append(&mut self, records: &[Record]) -> Result<(), FlushError>;
}

/// Flat-file backend writing line-delimited JSON
pub struct JsonlStore {
    path: PathBuf,
    file: File,
}

impl JsonlStore {
    /// Open (or create) the record file for appending
    ///
    /// An unwritable path is a startup failure; the caller treats it as a
    /// fatal configuration problem.
    pub fn open(path: &Path) -> Result<Self, FlushError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                FlushError::Permanent(format!("cannot open '{}': {}", path.display(), e))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path this store writes to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleStore for JsonlStore {
    fn append(&mut self, records: &[Record]) -> Result<(), FlushError> {
        let mut buffer = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| FlushError::Permanent(format!("serialization failed: {}", e)))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        self.file
            .write_all(buffer.as_bytes())
            .map_err(|e| FlushError::Transient(format!("write to '{}': {}", self.path.display(), e)))?;
        self.file
            .sync_data()
            .map_err(|e| FlushError::Transient(format!("sync of '{}': {}", self.path.display(), e)))?;
        Ok(())
    }
}

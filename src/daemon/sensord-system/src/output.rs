//! Output channel for framed records
//!
//! Records are appended with a single `write(2)`. A record is either written
//! whole or reported as failed; nothing is retried.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to open output {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("Output already closed")]
    Closed,
}

impl OutputError {
    pub fn status_code(&self) -> i32 {
        match self {
            OutputError::Open { source, .. } | OutputError::WriteFailed(source) => {
                source.raw_os_error().map_or(-1, |e| -e)
            }
            OutputError::ShortWrite { .. } | OutputError::Closed => -1,
        }
    }
}

pub trait OutputChannel {
    /// Write one complete record
    fn emit(&mut self, record: &[u8]) -> Result<(), OutputError>;

    /// Release the channel; a second call is a no-op
    fn close(&mut self) -> Result<(), OutputError>;
}

/// Serial terminal (or any append-only file) receiving records
#[derive(Debug)]
pub struct TtyOutput {
    file: Option<File>,
    path: PathBuf,
}

impl TtyOutput {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|source| OutputError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(output = %path.display(), "Opened output channel");
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputChannel for TtyOutput {
    fn emit(&mut self, record: &[u8]) -> Result<(), OutputError> {
        let file = self.file.as_mut().ok_or(OutputError::Closed)?;
        // Write::write maps to exactly one write(2)
        let written = file.write(record).map_err(OutputError::WriteFailed)?;
        if written != record.len() {
            return Err(OutputError::ShortWrite {
                written,
                expected: record.len(),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if self.file.take().is_some() {
            debug!(output = %self.path.display(), "Closed output channel");
        }
        Ok(())
    }
}

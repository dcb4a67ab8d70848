//! Log writer.

use super::record::{Fragment, FragmentKind, MAX_FRAGMENT_SIZE};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends framed entries to the log file.
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    file_size: u64,
}

impl LogWriter {
    /// Opens the log in append mode, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self { path, writer: BufWriter::new(file), file_size })
    }

    /// Appends one entry, splitting it into fragments when it is large.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let total = data.len();
        let mut offset = 0;
        while offset < total {
            let len = (total - offset).min(MAX_FRAGMENT_SIZE);
            let kind = FragmentKind::for_chunk(offset, len, total);
            let encoded = Fragment::new(kind, data[offset..offset + len].to_vec()).encode();

            self.writer.write_all(&encoded)?;
            self.file_size += encoded.len() as u64;
            offset += len;
        }

        Ok(())
    }

    /// Writes out buffered fragments without forcing them to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Discards the whole log.
    pub fn truncate(&mut self, sync: bool) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        if sync {
            file.sync_all()?;
        }
        self.file_size = 0;
        Ok(())
    }

    /// Current size of the log in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

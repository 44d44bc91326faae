//! # Log Sink
//!
//! Append-only CSV record store for one acquisition run.
//!
//! - One file per run, created with create-new semantics (never overwrites)
//! - Header row written once, before any record
//! - Every `append` writes one full line and flushes it before returning
//! - The sink survives reconnects: the session keeps appending to it

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use super::types::SampleRecord;
use crate::error::{LoggerError, Result};

/// Column names, in record order
pub const CSV_HEADER: [&str; 10] = [
    "Timestamp",
    "Device_ID",
    "Accel_X",
    "Accel_Y",
    "Accel_Z",
    "Gyro_X",
    "Gyro_Y",
    "Gyro_Z",
    "Roll",
    "Pitch",
];

/// Durable, single-writer CSV destination
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    count: u64,
}

impl LogSink {
    /// Open a new destination for `identifier`, stamped with the current time
    ///
    /// The file is named `{prefix}_{identifier without ':'}_{YYYYmmdd_HHMMSS}.csv`
    /// inside `dir` (created if missing). If a file with that name already
    /// exists a numeric suffix is appended instead of reusing it.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Io`] if the directory or file cannot be created
    /// or the header cannot be written.
    pub fn open(dir: &Path, prefix: &str, identifier: &str) -> Result<Self> {
        Self::open_at(dir, prefix, identifier, Local::now())
    }

    /// Same as [`LogSink::open`] with an explicit start time
    pub fn open_at(
        dir: &Path,
        prefix: &str,
        identifier: &str,
        started: DateTime<Local>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let stem = destination_stem(prefix, identifier, started);
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.csv", stem)
            } else {
                format!("{}_{}.csv", stem, attempt)
            };
            let path = dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Self::with_file(path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Destination {} exists, trying next suffix", path.display());
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Create a sink at an exact path; fails if the file already exists
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        Self::with_file(path, file)
    }

    /// Sink whose every write fails with `ENOSPC`
    #[cfg(all(test, target_os = "linux"))]
    pub(crate) fn unwritable() -> Self {
        let file = OpenOptions::new()
            .write(true)
            .open("/dev/full")
            .expect("/dev/full is available on Linux");
        Self {
            path: PathBuf::from("/dev/full"),
            writer: Some(BufWriter::new(file)),
            count: 0,
        }
    }

    fn with_file(path: PathBuf, file: File) -> Result<Self> {
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADER.join(","))?;
        writer.flush()?;

        info!("Logging samples to {}", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            count: 0,
        })
    }

    /// Append one record and flush it to the file
    ///
    /// Returns the number of records written so far, including this one.
    ///
    /// # Errors
    ///
    /// - [`LoggerError::SinkClosed`] if [`LogSink::close`] was already called
    /// - [`LoggerError::Io`] if the write or flush fails
    pub fn append(&mut self, record: &SampleRecord) -> Result<u64> {
        let writer = self.writer.as_mut().ok_or(LoggerError::SinkClosed)?;

        let line = format_row(record);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;

        self.count += 1;
        Ok(self.count)
    }

    /// Flush and release the file, returning the final record count
    ///
    /// Only the first call touches the file; later calls just return the count.
    pub fn close(&mut self) -> Result<u64> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!("Closed {} after {} records", self.path.display(), self.count);
        }
        Ok(self.count)
    }

    /// Records appended so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn destination_stem(prefix: &str, identifier: &str, started: DateTime<Local>) -> String {
    let id: String = identifier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    format!("{}_{}_{}", prefix, id, started.format("%Y%m%d_%H%M%S"))
}

fn format_row(record: &SampleRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{}\n",
        escape_field(record.timestamp.as_str()),
        escape_field(&record.device_id),
        record.accel.x,
        record.accel.y,
        record.accel.z,
        record.gyro.x,
        record.gyro.y,
        record.gyro.z,
        record.angles.roll,
        record.angles.pitch,
    )
}

/// RFC 4180 quoting for free-text fields
fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

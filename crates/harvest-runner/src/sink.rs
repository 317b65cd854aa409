use crate::model::{Record, RecordIdentity, COLUMNS};
use crate::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only CSV output.
///
/// The header is written once, when the file is created. Every
/// [`emit`](Self::emit) flushes and syncs the row before returning, so the
/// caller can advance the checkpoint right after.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    unavailable: String,
    last: Option<RecordIdentity>,
    emitted: u64,
}

impl CsvSink {
    /// Open or create the sink. `unavailable` is written for optional fields
    /// the source did not provide.
    pub fn open(path: impl Into<PathBuf>, unavailable: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let existing = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        let last = if existing {
            last_identity(&path)?
        } else {
            None
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if existing {
            info!("Appending to {}", path.display());
        } else {
            writer.write_record(COLUMNS)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
            info!("Created {} with header", path.display());
        }

        Ok(Self {
            path,
            writer,
            unavailable: unavailable.into(),
            last,
            emitted: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the last row in the file, from before this run or
    /// emitted by it.
    pub fn last_identity(&self) -> Option<&RecordIdentity> {
        self.last.as_ref()
    }

    /// Rows appended through this handle.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Durably append one complete record.
    pub fn emit(&mut self, record: &Record) -> Result<()> {
        let row = record.to_row(&self.unavailable).ok_or_else(|| {
            Error::Sink(format!(
                "record {} at position {} has no detail fields",
                record.identity(),
                record.position
            ))
        })?;
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.last = Some(record.identity());
        self.emitted += 1;
        debug!(position = record.position, "emitted {}", record.identity());
        Ok(())
    }
}

fn last_identity(path: &Path) -> Result<Option<RecordIdentity>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut last = None;
    for row in reader.records() {
        let row = row?;
        if let (Some(name), Some(reg)) = (row.get(0), row.get(1)) {
            last = Some(RecordIdentity::new(name, reg));
        }
    }
    Ok(last)
}

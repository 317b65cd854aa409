use crate::{Error, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Durable position marker: the zero-based position of the next record to
/// process in the flattened record sequence.
///
/// Writes go through a uniquely named sibling temp file, `fsync` and a
/// rename, so a reader never sees a torn value. Any write failure is returned as
/// [`Error::Checkpoint`]; progress cannot be trusted without it.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored position, 0 when no checkpoint exists.
    pub fn load(&self) -> Result<u64> {
        self.read(None)
    }

    /// Like [`load`](Self::load), but also accepts the `page,row` form
    /// (1-based page, 0-based row) and converts it with `page_size`.
    pub fn load_with_page_size(&self, page_size: u32) -> Result<u64> {
        self.read(Some(page_size))
    }

    fn read(&self, page_size: Option<u32>) -> Result<u64> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No checkpoint at {}, starting fresh", self.path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let position = parse(content.trim(), page_size).ok_or_else(|| {
            Error::Checkpoint(format!(
                "unreadable checkpoint '{}' in {}",
                content.trim(),
                self.path.display()
            ))
        })?;
        info!("Resuming from checkpoint position {}", position);
        Ok(position)
    }

    /// Atomically replace the stored position.
    pub fn save(&self, position: u64) -> Result<()> {
        self.write(position).map_err(|e| {
            Error::Checkpoint(format!(
                "failed to write {} to {}: {}",
                position,
                self.path.display(),
                e
            ))
        })?;
        debug!("checkpoint -> {}", position);
        Ok(())
    }

    fn write(&self, position: u64) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent)?;
                parent
            }
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(format!("{}\n", position).as_bytes())?;
        temp.flush()?;
        temp.as_file_mut().sync_all()?;
        temp.into_temp_path()
            .persist(&self.path)
            .map_err(|e| e.error)
    }
}

fn parse(text: &str, page_size: Option<u32>) -> Option<u64> {
    if text.is_empty() {
        return Some(0);
    }
    if let Ok(position) = text.parse::<u64>() {
        return Some(position);
    }
    let size = u64::from(page_size?);
    let (page, row) = text.split_once(',')?;
    let page: u64 = page.trim().parse().ok()?;
    let row: u64 = row.trim().parse().ok()?;
    if page == 0 || row >= size {
        return None;
    }
    Some((page - 1) * size + row)
}

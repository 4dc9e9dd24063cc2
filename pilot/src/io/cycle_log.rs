//! JSONL cycle log: one line per control cycle.
//!
//! The log is a product artifact, independent of `RUST_LOG`. A write failure
//! is reported to the caller; the loop logs it and keeps running.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cycle::CycleReport;

pub struct CycleLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CycleLog {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open cycle log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, report: &CycleReport) -> Result<()> {
        let mut line = serde_json::to_string(report).context("serialize cycle record")?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.flush())
            .with_context(|| format!("append to {}", self.path.display()))
    }
}

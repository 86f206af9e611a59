//! CV persistence and the black-box log.
//!
//! The store is an I/O boundary: loading happens once at boot, every
//! write afterwards is deferred through the [`FileWriteQueue`] so flash
//! latency can never stall the control loop. Write failures are logged
//! and dropped, never fatal.

use crate::cv::CvTable;
use crate::events::Event;
use crate::queues::FileWriteQueue;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// CV table file name.
pub const CONFIG_FILE: &str = "config.json";
/// Append-only black-box log file name.
pub const ERROR_LOG_FILE: &str = "error_log.json";

/// One black-box record, appended on emergency shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackBoxRecord {
    /// Milliseconds since boot at shutdown.
    pub t: u64,
    /// Shutdown cause tag.
    pub err: String,
    /// The event ring at the moment of shutdown.
    pub events: Vec<Event>,
}

/// The persistence boundary the control loop talks to.
pub trait ConfigStore {
    /// Loads the CV table. Called once at boot, after
    /// [`FsConfigStore::ensure_environment`] or an equivalent.
    fn load(&self) -> Result<CvTable>;

    /// Queues a CV table write. Serialization failures are logged and the
    /// write dropped.
    fn queue_save(&self, cv: &CvTable, queue: &mut FileWriteQueue);

    /// Queues a black-box append with priority. Read or serialization
    /// failures degrade to writing just the new record; the shutdown
    /// continues regardless.
    fn queue_black_box(&self, record: &BlackBoxRecord, queue: &mut FileWriteQueue);
}

/// Filesystem-backed store holding `config.json` and `error_log.json` in
/// one directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    dir: PathBuf,
}

impl FsConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.dir.join(ERROR_LOG_FILE)
    }

    /// Creates the config file with factory defaults and an empty error
    /// log when either is missing, so the system can always boot after a
    /// flash erase.
    pub fn ensure_environment(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create config directory {:?}", self.dir))?;

        let config = self.config_path();
        if !config.exists() {
            let defaults = serde_json::to_string_pretty(&CvTable::defaults())?;
            fs::write(&config, defaults)
                .with_context(|| format!("Failed to write defaults to {config:?}"))?;
        }

        let log = self.error_log_path();
        if !log.exists() {
            fs::write(&log, "[]").with_context(|| format!("Failed to create {log:?}"))?;
        }
        Ok(())
    }

    fn read_log(path: &Path) -> Vec<BlackBoxRecord> {
        let Ok(raw) = fs::read_to_string(path) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }
}

impl ConfigStore for FsConfigStore {
    fn load(&self) -> Result<CvTable> {
        let path = self.config_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration file {path:?}"))?;
        let table = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupted configuration file {path:?}"))?;
        Ok(table)
    }

    fn queue_save(&self, cv: &CvTable, queue: &mut FileWriteQueue) {
        match serde_json::to_string_pretty(cv) {
            Ok(content) => queue.enqueue_write(self.config_path(), content, false),
            Err(e) => warn!("dropping CV table write: {e}"),
        }
    }

    fn queue_black_box(&self, record: &BlackBoxRecord, queue: &mut FileWriteQueue) {
        let mut log = Self::read_log(&self.error_log_path());
        log.push(record.clone());
        match serde_json::to_string(&log) {
            Ok(content) => queue.enqueue_write(self.error_log_path(), content, true),
            Err(e) => warn!("dropping black-box record: {e}"),
        }
    }
}

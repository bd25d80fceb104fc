//! Relay state persistence
//!
//! The ledger and the relay's envelopes and messages are written together
//! as one JSON document, so a restart never sees one without the other.

use crate::ledger::Ledger;
use crate::service::ServiceSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub state_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".safe_data"),
            state_file: "state.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// Everything written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub ledger: Ledger,
    #[serde(default)]
    pub service: ServiceSnapshot,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn new(ledger: Ledger, service: ServiceSnapshot) -> Self {
        Self {
            ledger,
            service,
            saved_at: Utc::now(),
        }
    }
}

/// File-backed store for [`PersistedState`]
///
/// Saves are serialized: the temp file and the backups are shared.
pub struct Storage {
    config: StorageConfig,
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.state_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.state_file, index))
    }

    /// Write the state, keeping the previous file as backup 0
    pub fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        // A panicked writer leaves at most a stray temp file behind
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.state_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to a temporary file, then rename over the old state
        let temp_path = self
            .config
            .data_dir
            .join(format!("{}.tmp", self.config.state_file));
        {
            let file = fs::File::create(&temp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, state)?;
        }
        fs::rename(&temp_path, &path)?;

        log::debug!("State saved to {}", path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<PersistedState, StorageError> {
        let path = self.state_path();
        if !path.exists() {
            return Err(StorageError::InvalidData("State file not found".to_string()));
        }
        load_from_file(&path)
    }

    /// Saved state, or `None` on first start
    pub fn load_if_exists(&self) -> Result<Option<PersistedState>, StorageError> {
        if self.exists() {
            self.load().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    pub fn restore_backup(&self, backup_index: usize) -> Result<PersistedState, StorageError> {
        let backup_path = self.backup_path(backup_index);
        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }
        load_from_file(&backup_path)
    }

    /// Indices of the backups present on disk
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }
}

/// Load state from a specific file path
pub fn load_from_file(path: &Path) -> Result<PersistedState, StorageError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

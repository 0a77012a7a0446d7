//! Durable JSON state under `<data_root>/state`
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so
//! readers never observe a half-written file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

use shared::{AppError, ErrorCode};

/// Well-known state files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFile {
    /// Persisted USB device map
    Devices,
    /// Last merged printer set
    Printers,
    ShutdownStats,
    EmergencyDump,
    Health,
}

impl StateFile {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Devices => "usb-devices.json",
            Self::Printers => "printers.json",
            Self::ShutdownStats => "shutdown-stats.json",
            Self::EmergencyDump => "emergency-dump.json",
            Self::Health => "health.json",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::with_message(ErrorCode::StorageError, err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (and create) the state directory
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: StateFile) -> PathBuf {
        self.dir.join(file.file_name())
    }

    /// Atomically replace `file` with `value` as pretty JSON
    pub async fn save<T: Serialize>(&self, file: StateFile, value: &T) -> StorageResult<()> {
        let path = self.path(file);
        let bytes = encode(&path, value)?;
        let tmp = tmp_path(&path);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| io_err(&tmp, source))?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, source));
        }
        tracing::debug!(file = %path.display(), bytes = bytes.len(), "State saved");
        Ok(())
    }

    /// Synchronous variant for panic hooks and the emergency path
    pub fn save_blocking<T: Serialize>(&self, file: StateFile, value: &T) -> StorageResult<()> {
        let path = self.path(file);
        let bytes = encode(&path, value)?;
        let tmp = tmp_path(&path);

        std::fs::write(&tmp, &bytes).map_err(|source| io_err(&tmp, source))?;
        std::fs::rename(&tmp, &path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            io_err(&path, source)
        })
    }

    /// Read `file`; `Ok(None)` when it does not exist yet
    pub async fn load<T: DeserializeOwned>(&self, file: StateFile) -> StorageResult<Option<T>> {
        let path = self.path(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_err(&path, source)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Json { path, source })
    }
}

fn encode<T: Serialize>(path: &Path, value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

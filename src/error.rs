use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::AssetKind;

/// Problems with the environment or the catalog. These abort the whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported operating system: {0}")]
    UnsupportedPlatform(String),
    #[error("Game data directory does not exist: {0}")]
    AssetRootNotFound(PathBuf),
    #[error("Replacement catalog directory does not exist: {0}")]
    CatalogNotFound(PathBuf),
    #[error("Failed to load catalog entry {path}: {reason}")]
    MalformedEntry { path: PathBuf, reason: String },
    #[error("Required game file is missing: {0}. Make sure the game installation is complete.")]
    MissingBundle(PathBuf),
}

/// Problems creating or using a backup. These abort only the affected bundle.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("No backup found for {0}")]
    NotFound(PathBuf),
    #[error("Backup of {path} is corrupt (expected md5 {expected}, found {actual})")]
    Corrupt { path: PathBuf, expected: String, actual: String },
    #[error("Backup of {0} is missing or corrupt and the live file is already patched. Verify the game files and try again.")]
    Unrecoverable(PathBuf),
    #[error("I/O error on {path}: {cause:#}")]
    Io { path: PathBuf, cause: anyhow::Error },
    #[error("Failed to update backup manifest: {0:#}")]
    Manifest(anyhow::Error),
}

#[derive(Debug, Error)]
#[error("Failed to write {path}: {cause:#}")]
pub struct WriteError {
    pub path: PathBuf,
    pub cause: anyhow::Error,
}

/// Something that did not match or could not be applied. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchWarning {
    UnmatchedEntry { kind: AssetKind, name: String },
    Skipped { kind: AssetKind, name: String, reason: String },
}

impl fmt::Display for MatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchWarning::UnmatchedEntry { kind, name } => {
                write!(f, "{} entry '{}' did not match any object", kind, name)
            }
            MatchWarning::Skipped { kind, name, reason } => {
                write!(f, "Skipped {} object '{}': {}", kind, name, reason)
            }
        }
    }
}

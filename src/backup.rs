use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::PatchConfig;
use crate::error::BackupError;
use crate::io_ext;

pub const MANIFEST_FILE_NAME: &str = "backup-manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Live file, relative to the game root.
    pub original: String,
    /// Backup copy, relative to the game root.
    pub backup: String,
    pub md5: String,
    pub size: u64,
    #[serde(default)]
    pub patched_md5: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    records: BTreeMap<String, BackupRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest { version: MANIFEST_VERSION, records: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Untouched,
    BackedUp,
    Patched,
}

/// Proof that a verified backup of a bundle exists. Only
/// [`BackupManager::ensure_backup`] hands these out, and writing a bundle
/// requires one.
#[derive(Debug)]
pub struct VerifiedBackup {
    live: PathBuf,
    backup: PathBuf,
}

impl VerifiedBackup {
    pub fn live_path(&self) -> &Path {
        &self.live
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }
}

pub struct BackupManager {
    game_root: PathBuf,
    backup_dir: PathBuf,
    manifest_path: PathBuf,
    manifest: Manifest,
}

impl BackupManager {
    pub fn open(config: &PatchConfig) -> Result<Self, BackupError> {
        Self::open_in(&config.asset_root.game_root, &config.backup_dir)
    }

    pub(crate) fn open_in(game_root: &Path, backup_dir: &Path) -> Result<Self, BackupError> {
        let manifest_path = backup_dir.join(MANIFEST_FILE_NAME);
        let manifest = if manifest_path.is_file() {
            let data = std::fs::read(&manifest_path)
                .map_err(|e| BackupError::Io { path: manifest_path.clone(), cause: e.into() })?;
            serde_json::from_slice(&data)
                .with_context(|| format!("Failed to parse {}", manifest_path.display()))
                .map_err(BackupError::Manifest)?
        } else {
            Manifest::default()
        };

        Ok(BackupManager {
            game_root: game_root.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            manifest_path,
            manifest,
        })
    }

    pub fn record(&self, live: &Path) -> Option<&BackupRecord> {
        let key = self.key_for(live).ok()?;
        self.manifest.records.get(&key)
    }

    /// Makes sure a verified backup of `live` exists, creating or refreshing it if
    /// needed. Safe to call on every run.
    pub fn ensure_backup(&mut self, live: &Path) -> Result<VerifiedBackup, BackupError> {
        let key = self.key_for(live)?;
        let backup = self.backup_dir.join(&key);
        let live_md5 = md5_file(live)?;

        if let Some(record) = self.manifest.records.get(&key) {
            let backup_ok = backup.is_file() && md5_file(&backup)? == record.md5;
            let live_is_original = live_md5 == record.md5;
            let live_is_patched = record.patched_md5.as_deref() == Some(live_md5.as_str());

            if backup_ok && (live_is_original || live_is_patched) {
                debug!("Reusing backup of {}", key);
                return Ok(VerifiedBackup { live: live.to_path_buf(), backup });
            }
            if !backup_ok && live_is_patched {
                return Err(BackupError::Unrecoverable(live.to_path_buf()));
            }
            if backup_ok {
                info!("{} changed since it was backed up, refreshing the backup", key);
            } else {
                warn!("Backup of {} is missing or corrupt, recreating it", key);
            }
        }

        io_ext::copy_atomic(live, &backup)
            .map_err(|cause| BackupError::Io { path: backup.clone(), cause })?;
        let backup_md5 = md5_file(&backup)?;
        if backup_md5 != live_md5 {
            return Err(BackupError::Corrupt { path: backup, expected: live_md5, actual: backup_md5 });
        }

        let size = std::fs::metadata(&backup)
            .map_err(|e| BackupError::Io { path: backup.clone(), cause: e.into() })?
            .len();
        let record = BackupRecord {
            original: key.clone(),
            backup: relative_key(&self.game_root, &backup).unwrap_or_else(|| backup.display().to_string()),
            md5: live_md5,
            size,
            patched_md5: None,
            created_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        self.manifest.records.insert(key.clone(), record);
        self.save()?;
        info!("Backed up {}", key);

        Ok(VerifiedBackup { live: live.to_path_buf(), backup })
    }

    /// Copies the backup of `live` back over it and forgets the record.
    pub fn restore(&mut self, live: &Path) -> Result<(), BackupError> {
        let key = self.key_for(live)?;
        let record = self.manifest.records.get(&key)
            .ok_or_else(|| BackupError::NotFound(live.to_path_buf()))?;

        let backup = self.backup_dir.join(&key);
        let actual = if backup.is_file() { md5_file(&backup)? } else { "missing".to_string() };
        if actual != record.md5 {
            return Err(BackupError::Corrupt { path: backup, expected: record.md5.clone(), actual });
        }

        io_ext::copy_atomic(&backup, live)
            .map_err(|cause| BackupError::Io { path: live.to_path_buf(), cause })?;
        self.manifest.records.remove(&key);
        self.save()?;
        info!("Restored {}", key);
        Ok(())
    }

    /// Remembers the checksum of the patched output written to `live`.
    pub fn mark_patched(&mut self, live: &Path, checksum: String) -> Result<(), BackupError> {
        let key = self.key_for(live)?;
        let record = self.manifest.records.get_mut(&key)
            .ok_or_else(|| BackupError::NotFound(live.to_path_buf()))?;
        record.patched_md5 = Some(checksum);
        self.save()
    }

    pub fn state(&self, live: &Path) -> Result<BundleState, BackupError> {
        let Some(record) = self.record(live) else {
            return Ok(BundleState::Untouched);
        };
        let live_md5 = md5_file(live)?;
        if record.patched_md5.as_deref() == Some(live_md5.as_str()) {
            Ok(BundleState::Patched)
        } else {
            Ok(BundleState::BackedUp)
        }
    }

    fn key_for(&self, live: &Path) -> Result<String, BackupError> {
        relative_key(&self.game_root, live).ok_or_else(|| BackupError::Io {
            path: live.to_path_buf(),
            cause: anyhow::anyhow!("not inside the game directory {}", self.game_root.display()),
        })
    }

    fn save(&self) -> Result<(), BackupError> {
        let data = serde_json::to_vec_pretty(&self.manifest)
            .context("Failed to serialize backup manifest")
            .map_err(BackupError::Manifest)?;
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| BackupError::Io { path: self.backup_dir.clone(), cause: e.into() })?;
        io_ext::write_atomic(&self.manifest_path, &data)
            .map_err(BackupError::Manifest)
    }
}

/// `path` relative to `root` with `/` separators, used as the manifest key on
/// every platform.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

pub fn md5_file(path: &Path) -> Result<String, BackupError> {
    let io_err = |e: std::io::Error| BackupError::Io { path: path.to_path_buf(), cause: e.into() };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buf).map_err(io_err)?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

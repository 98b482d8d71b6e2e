use crate::backup::VerifiedBackup;
use crate::error::WriteError;
use crate::io_ext;

/// Replaces the live bundle behind `backup` with `data`. The file on disk is either
/// the old content or all of `data`, never something in between.
pub fn write_bundle(backup: &VerifiedBackup, data: &[u8]) -> Result<(), WriteError> {
    let path = backup.live_path();
    io_ext::write_atomic(path, data).map_err(|cause| WriteError { path: path.to_path_buf(), cause })?;
    tracing::debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::backup::BackupManager;

    #[test]
    fn failed_write_leaves_the_live_path_alone() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("Game_Data").join("resources.assets");
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, b"original").unwrap();
        let mut backups = BackupManager::open_in(dir.path(), &dir.path().join("Backup")).unwrap();
        let token = backups.ensure_backup(&live).unwrap();

        // swap the live file for something a rename cannot replace
        fs::remove_file(&live).unwrap();
        fs::create_dir(&live).unwrap();
        fs::write(live.join("keep"), b"x").unwrap();

        let err = write_bundle(&token, b"patched").unwrap_err();
        assert_eq!(err.path, live);
        assert_eq!(fs::read(live.join("keep")).unwrap(), b"x");
        let temps = fs::read_dir(live.parent().unwrap()).unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(temps, 0);
        assert_eq!(fs::read(token.backup_path()).unwrap(), b"original");
    }

    #[test]
    fn writes_through_a_verified_backup() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("Game_Data").join("resources.assets");
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, b"original").unwrap();
        let mut backups = BackupManager::open_in(dir.path(), &dir.path().join("Backup")).unwrap();
        let token = backups.ensure_backup(&live).unwrap();

        write_bundle(&token, b"patched").unwrap();
        assert_eq!(fs::read(&live).unwrap(), b"patched");
        assert_eq!(fs::read(token.backup_path()).unwrap(), b"original");
    }
}

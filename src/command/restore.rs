use std::io::Write;

use tracing::error;

use crate::backup::BackupManager;
use crate::command::patch::RunSummary;
use crate::config::PatchConfig;
use crate::error::BackupError;

/// Puts every backed up target back. Targets without a backup are reported and
/// skipped; a failing target does not stop the others.
pub fn restore(config: &PatchConfig, out: &mut impl Write) -> anyhow::Result<RunSummary> {
    let mut backups = BackupManager::open(config)?;
    let mut summary = RunSummary::default();

    for (rel, path) in config.targets.iter().zip(config.target_paths()) {
        match backups.restore(&path) {
            Ok(()) => {
                writeln!(out, "Restored {}", rel.display())?;
                summary.processed += 1;
            }
            Err(BackupError::NotFound(_)) => {
                writeln!(out, "No backup found for {}", rel.display())?;
                summary.skipped += 1;
            }
            Err(e) => {
                error!("Failed to restore {}: {}", rel.display(), e);
                writeln!(out, "Failed to restore {}: {}", rel.display(), e)?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

use std::io::Write;

use crate::backup::{BackupManager, BundleState};
use crate::catalog::Catalog;
use crate::config::{AssetKind, PatchConfig};
use crate::inventory;

pub const BANNER: &str = "== 絲綢之歌繁體中文化工具 v1.1 ==";

pub fn info(config: &PatchConfig, catalog: Option<&Catalog>, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(out, "{}", BANNER)?;
    writeln!(out, "{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "Platform: {}", config.asset_root.platform)?;
    writeln!(out, "Game directory: {}", config.asset_root.game_root.display())?;
    let executable = config.asset_root.platform.layout().executable;
    if !config.asset_root.game_root.join(executable).exists() {
        writeln!(out, "  ({} not found here, is this the game directory?)", executable)?;
    }
    writeln!(out, "Catalog: {}", config.catalog_dir.display())?;
    if let Some(catalog) = catalog {
        writeln!(
            out,
            "  {} entries: {} text, {} font, {} image",
            catalog.len(),
            catalog.count(AssetKind::Text),
            catalog.count(AssetKind::Font),
            catalog.count(AssetKind::Image),
        )?;
    }

    let backups = BackupManager::open(config)?;
    writeln!(out, "Bundles:")?;
    for (rel, exists) in inventory::describe_targets(config) {
        let state = if !exists {
            "missing".to_string()
        } else {
            match backups.state(&config.asset_root.data_dir.join(&rel)) {
                Ok(BundleState::Untouched) => "untouched".to_string(),
                Ok(BundleState::BackedUp) => "backed up".to_string(),
                Ok(BundleState::Patched) => "patched".to_string(),
                Err(e) => format!("unknown ({})", e),
            }
        };
        writeln!(out, "  {} [{}]", rel.display(), state)?;
    }
    Ok(())
}

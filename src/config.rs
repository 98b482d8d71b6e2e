use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use clap_derive::ValueEnum;

use crate::error::ConfigError;

pub const BACKUP_DIR_NAME: &str = "Backup";
pub const CATALOG_DIR_NAME: &str = "CHT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    Windows,
    #[value(name = "macos")]
    MacOs,
    Linux,
}

/// Where a platform's build keeps its files, relative to the game root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLayout {
    pub data_dir: &'static str,
    pub executable: &'static str,
    pub streaming_platform: &'static str,
}

impl Platform {
    pub fn detect() -> Result<Self, ConfigError> {
        if cfg!(target_os = "windows") {
            Ok(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Ok(Platform::MacOs)
        } else if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else {
            Err(ConfigError::UnsupportedPlatform(std::env::consts::OS.to_string()))
        }
    }

    pub fn layout(self) -> PlatformLayout {
        match self {
            Platform::Windows => PlatformLayout {
                data_dir: "Hollow Knight Silksong_Data",
                executable: "Hollow Knight Silksong.exe",
                streaming_platform: "StandaloneWindows64",
            },
            Platform::MacOs => PlatformLayout {
                data_dir: "Hollow Knight Silksong.app/Contents/Resources/Data",
                executable: "Hollow Knight Silksong.app",
                streaming_platform: "StandaloneOSX",
            },
            Platform::Linux => PlatformLayout {
                data_dir: "Hollow Knight Silksong_Data",
                executable: "Hollow Knight Silksong.x86_64",
                streaming_platform: "StandaloneLinux64",
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        })
    }
}

/// The game's data directory, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRoot {
    pub game_root: PathBuf,
    pub data_dir: PathBuf,
    pub platform: Platform,
}

impl AssetRoot {
    pub fn resolve(game_root: &Path, platform: Platform) -> Result<Self, ConfigError> {
        let game_root = if game_root.is_absolute() {
            game_root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|_| ConfigError::AssetRootNotFound(game_root.to_path_buf()))?
                .join(game_root)
        };

        let data_dir = game_root.join(platform.layout().data_dir);
        if !data_dir.is_dir() {
            return Err(ConfigError::AssetRootNotFound(data_dir));
        }

        Ok(AssetRoot { game_root, data_dir, platform })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetKind {
    Text,
    Font,
    Image,
}

impl AssetKind {
    /// Catalog subdirectory and file extension holding entries of this kind.
    pub fn catalog_source(self) -> (&'static str, &'static str) {
        match self {
            AssetKind::Text => ("Text", "txt"),
            AssetKind::Font => ("Font", "json"),
            AssetKind::Image => ("Png", "png"),
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetKind::Text => "text",
            AssetKind::Font => "font",
            AssetKind::Image => "image",
        })
    }
}

/// Everything a run needs to know about the installation and the catalog.
/// Built once in `main` and passed down explicitly.
#[derive(Debug, Clone)]
pub struct PatchConfig {
    pub asset_root: AssetRoot,
    pub catalog_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Bundles to patch, relative to the data directory.
    pub targets: Vec<PathBuf>,
    /// Object name to catalog name.
    pub aliases: BTreeMap<String, String>,
}

impl PatchConfig {
    pub fn resolve(game_root: &Path, platform: Platform, catalog_dir: PathBuf) -> Result<Self, ConfigError> {
        let asset_root = AssetRoot::resolve(game_root, platform)?;
        Ok(Self::new(asset_root, catalog_dir))
    }

    pub fn new(asset_root: AssetRoot, catalog_dir: PathBuf) -> Self {
        let backup_dir = asset_root.game_root.join(BACKUP_DIR_NAME);
        let targets = default_targets(asset_root.platform);
        PatchConfig {
            asset_root,
            catalog_dir,
            backup_dir,
            targets,
            aliases: default_aliases(),
        }
    }

    pub fn target_paths(&self) -> Vec<PathBuf> {
        self.targets.iter().map(|t| self.asset_root.data_dir.join(t)).collect()
    }
}

pub fn default_targets(platform: Platform) -> Vec<PathBuf> {
    let streaming = Path::new("StreamingAssets")
        .join("aa")
        .join(platform.layout().streaming_platform);
    vec![
        streaming.join("fonts_assets_chinese.bundle"),
        PathBuf::from("resources.assets"),
        streaming.join("atlases_assets_assets")
            .join("sprites")
            .join("_atlases")
            .join("title.spriteatlas.bundle"),
    ]
}

pub fn default_aliases() -> BTreeMap<String, String> {
    [
        ("do_not_use_chinese_body_bold", "chinese_body_bold"),
        ("do_not_use_chinese_body_bold Atlas", "chinese_body_bold Atlas"),
        ("sactx-0-1024x1024-BC7-Title-228dda81", "logo"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// `CHT` next to the executable if present, else `./CHT`.
pub fn default_catalog_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CATALOG_DIR_NAME)))
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(|| PathBuf::from(CATALOG_DIR_NAME))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Creates an empty Linux-layout game directory.
    pub(crate) fn linux_install(root: &Path) -> AssetRoot {
        std::fs::create_dir_all(root.join(Platform::Linux.layout().data_dir)).unwrap();
        AssetRoot::resolve(root, Platform::Linux).unwrap()
    }

    #[test]
    fn layouts_match_the_shipped_builds() {
        assert_eq!(Platform::Windows.layout().data_dir, "Hollow Knight Silksong_Data");
        assert_eq!(Platform::MacOs.layout().data_dir, "Hollow Knight Silksong.app/Contents/Resources/Data");
        assert_eq!(Platform::Linux.layout().executable, "Hollow Knight Silksong.x86_64");
        assert_eq!(Platform::MacOs.layout().streaming_platform, "StandaloneOSX");
    }

    #[test]
    fn missing_data_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = AssetRoot::resolve(dir.path(), Platform::Windows).unwrap_err();
        assert!(matches!(err, ConfigError::AssetRootNotFound(p) if p.ends_with("Hollow Knight Silksong_Data")));
    }

    #[test]
    fn config_is_rooted_in_the_game_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = linux_install(dir.path());
        let config = PatchConfig::new(root, dir.path().join("CHT"));

        assert_eq!(config.backup_dir, dir.path().join("Backup"));
        assert_eq!(config.targets.len(), 3);
        assert_eq!(
            config.target_paths()[0],
            dir.path().join("Hollow Knight Silksong_Data/StreamingAssets/aa/StandaloneLinux64/fonts_assets_chinese.bundle")
        );
        assert_eq!(config.aliases["sactx-0-1024x1024-BC7-Title-228dda81"], "logo");
    }
}

use std::path::PathBuf;

use walkdir::WalkDir;

use crate::config::PatchConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: PathBuf,
    /// Relative to the data directory.
    pub rel_path: PathBuf,
}

/// Finds the configured target bundles under the data directory, sorted by
/// relative path. Directories that cannot contain a target are not descended into.
pub fn scan(config: &PatchConfig) -> Result<Vec<BundleFile>, ConfigError> {
    let data_dir = &config.asset_root.data_dir;
    let mut found = Vec::new();

    let walker = WalkDir::new(data_dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            let Ok(rel) = entry.path().strip_prefix(data_dir) else {
                return false;
            };
            !entry.file_type().is_dir() || config.targets.iter().any(|t| t.starts_with(rel))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(data_dir) else {
            continue;
        };
        if config.targets.iter().any(|t| t.as_path() == rel) {
            found.push(BundleFile { path: entry.path().to_path_buf(), rel_path: rel.to_path_buf() });
        }
    }
    found.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    if let Some(missing) = config.targets.iter().find(|t| !found.iter().any(|f| &f.rel_path == *t)) {
        return Err(ConfigError::MissingBundle(data_dir.join(missing)));
    }
    Ok(found)
}

/// Target paths with whether they currently exist, for reporting.
pub fn describe_targets(config: &PatchConfig) -> Vec<(PathBuf, bool)> {
    config.targets.iter()
        .map(|t| {
            let path = config.asset_root.data_dir.join(t);
            (t.clone(), path.is_file())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::tests::linux_install;

    fn install_targets(config: &PatchConfig) {
        for path in config.target_paths() {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"bundle").unwrap();
        }
    }

    #[test]
    fn finds_targets_in_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = PatchConfig::new(linux_install(dir.path()), dir.path().join("CHT"));
        install_targets(&config);
        let data_dir = &config.asset_root.data_dir;
        fs::write(data_dir.join("sharedassets0.assets"), b"not a target").unwrap();
        fs::create_dir_all(data_dir.join("Managed")).unwrap();
        fs::write(data_dir.join("Managed/Assembly-CSharp.dll"), b"dll").unwrap();

        let found = scan(&config).unwrap();
        let rels: Vec<_> = found.iter().map(|f| f.rel_path.clone()).collect();
        let mut expected = config.targets.clone();
        expected.sort();
        assert_eq!(rels, expected);
    }

    #[test]
    fn missing_target_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PatchConfig::new(linux_install(dir.path()), dir.path().join("CHT"));
        install_targets(&config);
        fs::remove_file(config.asset_root.data_dir.join("resources.assets")).unwrap();

        let err = scan(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBundle(p) if p.ends_with("resources.assets")));
        assert!(describe_targets(&config).iter().any(|(t, exists)| t.ends_with("resources.assets") && !exists));
    }
}

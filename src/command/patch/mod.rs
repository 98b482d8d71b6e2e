use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::backup::BackupManager;
use crate::catalog::Catalog;
use crate::config::{AssetKind, PatchConfig};
use crate::error::MatchWarning;
use crate::inventory::{self, BundleFile};
use crate::unity::AssetContainer;
use crate::writer;

pub mod font_patcher;
pub mod image_patcher;
pub mod text_patcher;

/// The three kinds of replacement a bundle can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patcher {
    Text,
    Font,
    Image,
}

impl Patcher {
    pub const ALL: [Patcher; 3] = [Patcher::Text, Patcher::Font, Patcher::Image];

    pub fn kind(self) -> AssetKind {
        match self {
            Patcher::Text => AssetKind::Text,
            Patcher::Font => AssetKind::Font,
            Patcher::Image => AssetKind::Image,
        }
    }

    pub fn patch(self, container: &mut AssetContainer, catalog: &Catalog) -> PatchResult {
        let mut result = PatchResult::new(self.kind());
        match self {
            Patcher::Text => text_patcher::patch_text(container, catalog, &mut result),
            Patcher::Font => font_patcher::patch_fonts(container, catalog, &mut result),
            Patcher::Image => image_patcher::patch_images(container, catalog, &mut result),
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult {
    pub kind: AssetKind,
    pub matched: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub warnings: Vec<MatchWarning>,
    /// Catalog entries that matched at least one object.
    pub matched_entries: BTreeSet<(AssetKind, String)>,
}

impl PatchResult {
    pub fn new(kind: AssetKind) -> Self {
        PatchResult {
            kind,
            matched: 0,
            replaced: 0,
            skipped: 0,
            warnings: Vec::new(),
            matched_entries: BTreeSet::new(),
        }
    }

    pub(crate) fn record_match(&mut self, entry: &str) {
        self.matched += 1;
        self.matched_entries.insert((self.kind, entry.to_string()));
    }

    pub(crate) fn skip(&mut self, name: &str, reason: impl fmt::Display) {
        let warning = MatchWarning::Skipped {
            kind: self.kind,
            name: name.to_string(),
            reason: reason.to_string(),
        };
        warn!("{}", warning);
        self.skipped += 1;
        self.warnings.push(warning);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: Vec<MatchWarning>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Processed: {}, Skipped: {}, Failed: {}", self.processed, self.skipped, self.failed)?;
        if !self.warnings.is_empty() {
            write!(f, " ({} warnings)", self.warnings.len())?;
        }
        Ok(())
    }
}

enum BundleOutcome {
    Written(Vec<PatchResult>),
    Unchanged(Vec<PatchResult>),
}

/// Patches every target bundle. Missing targets abort before anything is touched;
/// after that a failing bundle is counted and the run moves on.
pub fn apply(config: &PatchConfig, catalog: &Catalog, out: &mut impl Write) -> anyhow::Result<RunSummary> {
    let bundles = inventory::scan(config)?;
    let mut backups = BackupManager::open(config)?;
    let mut summary = RunSummary::default();
    let mut matched = BTreeSet::new();

    for bundle in &bundles {
        writeln!(out, "Patching {}...", bundle.rel_path.display())?;
        match patch_bundle(&mut backups, bundle, catalog) {
            Ok(BundleOutcome::Written(results)) => {
                for result in &results {
                    writeln!(
                        out,
                        "  {}: {} matched, {} replaced, {} skipped",
                        result.kind, result.matched, result.replaced, result.skipped
                    )?;
                }
                summary.processed += 1;
                collect(&mut summary, &mut matched, results);
            }
            Ok(BundleOutcome::Unchanged(results)) => {
                writeln!(out, "  Nothing to replace, left untouched")?;
                summary.skipped += 1;
                collect(&mut summary, &mut matched, results);
            }
            Err(e) => {
                error!("Failed to patch {}: {:#}", bundle.rel_path.display(), e);
                writeln!(out, "  Failed: {:#}", e)?;
                summary.failed += 1;
            }
        }
    }

    for warning in unmatched_entries(catalog, &matched) {
        warn!("{}", warning);
        summary.warnings.push(warning);
    }

    Ok(summary)
}

fn collect(summary: &mut RunSummary, matched: &mut BTreeSet<(AssetKind, String)>, results: Vec<PatchResult>) {
    for result in results {
        summary.warnings.extend(result.warnings);
        matched.extend(result.matched_entries);
    }
}

fn patch_bundle(backups: &mut BackupManager, bundle: &BundleFile, catalog: &Catalog) -> anyhow::Result<BundleOutcome> {
    let token = backups.ensure_backup(&bundle.path)?;

    // always start from the pristine copy so repeated runs produce the same output
    let mut container = AssetContainer::load(token.backup_path())?;
    debug!(
        "Loaded {} from {} ({} serialized files)",
        if container.is_bundle() { "bundle" } else { "assets file" },
        token.backup_path().display(),
        container.files.len()
    );
    let results: Vec<PatchResult> = Patcher::ALL.iter()
        .map(|patcher| patcher.patch(&mut container, catalog))
        .collect();

    if results.iter().all(|r| r.replaced == 0) {
        return Ok(BundleOutcome::Unchanged(results));
    }

    let data = container.to_bytes()
        .with_context(|| format!("Failed to serialize {}", bundle.rel_path.display()))?;
    backups.mark_patched(&bundle.path, format!("{:x}", md5::compute(&data)))?;
    writer::write_bundle(&token, &data)?;
    info!("Patched {} ({} bytes)", bundle.rel_path.display(), data.len());

    Ok(BundleOutcome::Written(results))
}

/// Warnings for catalog entries that no object in any bundle matched.
pub fn unmatched_entries(catalog: &Catalog, matched: &BTreeSet<(AssetKind, String)>) -> Vec<MatchWarning> {
    catalog.entries()
        .filter(|entry| !matched.contains(&(entry.kind(), entry.name.clone())))
        .map(|entry| MatchWarning::UnmatchedEntry { kind: entry.kind(), name: entry.name.clone() })
        .collect()
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AssetKind;
use crate::error::ConfigError;

/// Replacement font data. Both halves are optional; whatever is missing keeps the
/// game's value. Field names serialize the way Unity names them, so a descriptor can
/// be laid over the font's own fields.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct FontDescriptor {
    #[serde(rename = "m_fontInfo", default, skip_serializing_if = "Option::is_none")]
    pub font_info: Option<FaceInfoPatch>,
    #[serde(rename = "m_glyphInfoList", default, skip_serializing_if = "Option::is_none")]
    pub glyphs: Option<Vec<GlyphDescriptor>>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FaceInfoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ascender: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descender: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center_line: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superscript_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscript_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline_thickness: Option<f32>,
    #[serde(rename = "strikethrough", alias = "Strikethrough", skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<f32>,
    #[serde(rename = "strikethroughThickness", alias = "StrikethroughThickness", skip_serializing_if = "Option::is_none")]
    pub strikethrough_thickness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas_height: Option<f32>,
}

fn one() -> f32 {
    1.0
}

/// One legacy `TMP_Glyph` entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GlyphDescriptor {
    #[serde(alias = "index", default)]
    pub id: i32,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(rename = "xOffset", default)]
    pub x_offset: f32,
    #[serde(rename = "yOffset", default)]
    pub y_offset: f32,
    #[serde(rename = "xAdvance", default)]
    pub x_advance: f32,
    #[serde(default = "one")]
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(Vec<u8>),
    Font(FontDescriptor),
    Image(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementEntry {
    pub name: String,
    pub payload: Payload,
}

impl ReplacementEntry {
    pub fn kind(&self) -> AssetKind {
        match self.payload {
            Payload::Text(_) => AssetKind::Text,
            Payload::Font(_) => AssetKind::Font,
            Payload::Image(_) => AssetKind::Image,
        }
    }
}

/// All replacement payloads, loaded once at startup, plus the table mapping game
/// object names to catalog names.
#[derive(Debug)]
pub struct Catalog {
    entries: BTreeMap<(AssetKind, String), ReplacementEntry>,
    aliases: BTreeMap<String, String>,
}

impl Catalog {
    pub fn load(root: &Path, aliases: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        if !root.is_dir() {
            return Err(ConfigError::CatalogNotFound(root.to_path_buf()));
        }

        let mut catalog = Catalog::empty(aliases);
        for kind in [AssetKind::Text, AssetKind::Font, AssetKind::Image] {
            let (dir_name, ext) = kind.catalog_source();
            let dir = root.join(dir_name);
            if !dir.is_dir() {
                warn!("Catalog has no {} directory, no {} replacements will be applied", dir_name, kind);
                continue;
            }

            for path in list_files(&dir, ext)? {
                let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                let data = std::fs::read(&path).map_err(|e| ConfigError::MalformedEntry {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                let payload = match kind {
                    AssetKind::Text => Payload::Text(data),
                    AssetKind::Image => Payload::Image(data),
                    AssetKind::Font => Payload::Font(serde_json::from_slice(&data).map_err(|e| {
                        ConfigError::MalformedEntry { path: path.clone(), reason: e.to_string() }
                    })?),
                };
                debug!("Loaded {} entry {}", kind, name);
                catalog.insert(ReplacementEntry { name, payload });
            }
        }

        Ok(catalog)
    }

    /// A catalog with no entries, filled through [`Catalog::insert`].
    pub fn empty(aliases: BTreeMap<String, String>) -> Self {
        Catalog { entries: BTreeMap::new(), aliases }
    }

    pub fn insert(&mut self, entry: ReplacementEntry) {
        self.entries.insert((entry.kind(), entry.name.clone()), entry);
    }

    pub fn get(&self, kind: AssetKind, name: &str) -> Option<&ReplacementEntry> {
        self.entries.get(&(kind, name.to_string()))
    }

    /// Finds the entry replacing the game object called `object_name`. Aliases are
    /// applied first, and image names are sanitized the way their files are named.
    pub fn lookup(&self, kind: AssetKind, object_name: &str) -> Option<&ReplacementEntry> {
        let name = self.aliases.get(object_name).map(String::as_str).unwrap_or(object_name);
        match kind {
            AssetKind::Image => self.get(kind, &sanitize_file_name(name)),
            _ => self.get(kind, name),
        }
    }

    pub fn text(&self, object_name: &str) -> Option<(&str, &[u8])> {
        let entry = self.lookup(AssetKind::Text, object_name)?;
        match &entry.payload {
            Payload::Text(data) => Some((entry.name.as_str(), data.as_slice())),
            _ => None,
        }
    }

    pub fn font(&self, object_name: &str) -> Option<(&str, &FontDescriptor)> {
        let entry = self.lookup(AssetKind::Font, object_name)?;
        match &entry.payload {
            Payload::Font(descriptor) => Some((entry.name.as_str(), descriptor)),
            _ => None,
        }
    }

    pub fn image(&self, object_name: &str) -> Option<(&str, &[u8])> {
        let entry = self.lookup(AssetKind::Image, object_name)?;
        match &entry.payload {
            Payload::Image(data) => Some((entry.name.as_str(), data.as_slice())),
            _ => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ReplacementEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self, kind: AssetKind) -> usize {
        self.entries.keys().filter(|(k, _)| *k == kind).count()
    }
}

fn list_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| ConfigError::MalformedEntry {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry
            .map_err(|e| ConfigError::MalformedEntry { path: dir.to_path_buf(), reason: e.to_string() })?
            .path();
        let matches = path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Catalog file name for a texture name: keeps alphanumerics and ` .-_()`, then
/// turns spaces into underscores.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || " .-_()".contains(*c))
        .collect::<String>()
        .replace(' ', "_")
}

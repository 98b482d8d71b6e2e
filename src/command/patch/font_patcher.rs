use anyhow::Context;
use tracing::{debug, info};

use crate::catalog::{Catalog, FontDescriptor};
use crate::command::patch::PatchResult;
use crate::unity::serialized::{AssetObject, SerializedType};
use crate::unity::type_tree::Value;
use crate::unity::util::Endian;
use crate::unity::{AssetContainer, CLASS_MATERIAL, CLASS_MONO_BEHAVIOUR};

/// Materials that sample the replacement font atlases.
const ATLAS_MATERIALS: [&str; 3] = [
    "simsun_tmpro Material",
    "chinese_body_bold Material",
    "do_not_use_chinese_body_bold Material",
];
const ATLAS_SIZE: f64 = 4096.0;
const ATLAS_SIZE_PROPERTIES: [&str; 2] = ["_TextureHeight", "_TextureWidth"];

/// Rewrites the face info and glyph table of TextMesh Pro font assets that have a
/// font entry, then points the atlas materials at the larger replacement atlas.
/// Fields are located through each file's type trees, so every other field of the
/// object is written back as it was read.
pub fn patch_fonts(container: &mut AssetContainer, catalog: &Catalog, result: &mut PatchResult) {
    for file in &mut container.files {
        let endian = file.endian();
        let version = file.header.version;
        for (ty, obj) in file.typed_objects_mut(CLASS_MONO_BEHAVIOUR) {
            let Some(name) = obj.peek_name(CLASS_MONO_BEHAVIOUR, endian) else {
                continue;
            };
            let Some((entry, descriptor)) = catalog.font(&name) else {
                continue;
            };
            result.record_match(entry);

            match replace_font(ty, obj, descriptor, version, endian) {
                Ok(glyphs) => {
                    info!("Replaced font '{}' ({} glyphs)", name, glyphs);
                    result.replaced += 1;
                }
                Err(e) => result.skip(&name, format!("{:#}", e)),
            }
        }

        for (ty, obj) in file.typed_objects_mut(CLASS_MATERIAL) {
            let Some(name) = obj.peek_name(CLASS_MATERIAL, endian) else {
                continue;
            };
            if !ATLAS_MATERIALS.contains(&name.as_str()) {
                continue;
            }
            match resize_material(ty, obj, version, endian) {
                Ok(true) => {
                    info!("Set atlas size of material '{}' to {}", name, ATLAS_SIZE);
                    result.replaced += 1;
                }
                Ok(false) => debug!("Material '{}' already uses a {} atlas", name, ATLAS_SIZE),
                Err(e) => result.skip(&name, format!("{:#}", e)),
            }
        }
    }
}

/// Lays the descriptor over the font. Returns the glyph count now in the font.
fn replace_font(
    ty: &SerializedType,
    obj: &mut AssetObject,
    descriptor: &FontDescriptor,
    version: u32,
    endian: Endian,
) -> anyhow::Result<usize> {
    let tree = ty.type_tree(version, endian)?;
    let mut font = tree.read(&obj.data, endian).context("not a readable font asset")?;

    if let Some(info) = &descriptor.font_info {
        let node = tree.root.child("m_fontInfo").context("font asset has no m_fontInfo")?;
        let slot = font.field_mut("m_fontInfo").context("font asset has no m_fontInfo")?;
        let merged = Value::from_json(node, &serde_json::to_value(info)?, Some(&*slot))?;
        *slot = merged;
    }
    if let Some(glyphs) = &descriptor.glyphs {
        let node = tree.root.child("m_glyphInfoList").context("font asset has no m_glyphInfoList")?;
        let slot = font.field_mut("m_glyphInfoList").context("font asset has no m_glyphInfoList")?;
        *slot = Value::from_json(node, &serde_json::to_value(glyphs)?, None)?;
    }

    let glyphs = match font.field("m_glyphInfoList") {
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    };
    obj.data = tree.write(&font, endian)?;
    Ok(glyphs)
}

fn property_name(key: &Value) -> Option<&str> {
    // older materials key properties by a FastPropertyName struct
    key.as_str().or_else(|| key.field("name").and_then(Value::as_str))
}

/// Sets the atlas size properties of a material, appending the ones it lacks.
/// Returns whether anything changed.
fn resize_material(ty: &SerializedType, obj: &mut AssetObject, version: u32, endian: Endian) -> anyhow::Result<bool> {
    let tree = ty.type_tree(version, endian)?;
    let element = tree.root.child("m_SavedProperties")
        .and_then(|props| props.child("m_Floats"))
        .and_then(|floats| floats.element())
        .context("material has no m_SavedProperties.m_Floats")?;
    let mut material = tree.read(&obj.data, endian).context("not a readable material")?;
    let Some(Value::Array(floats)) = material.field_mut("m_SavedProperties").and_then(|p| p.field_mut("m_Floats")) else {
        anyhow::bail!("material has no m_SavedProperties.m_Floats");
    };

    let mut changed = false;
    let mut found = [false; ATLAS_SIZE_PROPERTIES.len()];
    for pair in floats.iter_mut() {
        let Some(index) = pair.field("first")
            .and_then(property_name)
            .and_then(|key| ATLAS_SIZE_PROPERTIES.iter().position(|p| *p == key)) else {
            continue;
        };
        found[index] = true;
        let value = pair.field_mut("second").context("material float has no value")?;
        if value.as_f64() != Some(ATLAS_SIZE) {
            *value = Value::Float(ATLAS_SIZE);
            changed = true;
        }
    }
    for (property, _) in ATLAS_SIZE_PROPERTIES.iter().zip(found).filter(|(_, found)| !found) {
        let mut pair = Value::zero(element);
        match pair.field_mut("first") {
            Some(Value::String(key)) => *key = property.to_string(),
            Some(key) => match key.field_mut("name") {
                Some(Value::String(name)) => *name = property.to_string(),
                _ => anyhow::bail!("material float keys have an unknown layout"),
            },
            None => anyhow::bail!("material float keys have an unknown layout"),
        }
        *pair.field_mut("second").context("material float has no value")? = Value::Float(ATLAS_SIZE);
        debug!("Adding {} to material", property);
        floats.push(pair);
        changed = true;
    }

    if changed {
        obj.data = tree.write(&material, endian)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FaceInfoPatch, GlyphDescriptor, Payload, ReplacementEntry};
    use crate::command::patch::Patcher;
    use crate::config::default_aliases;
    use crate::unity::serialized::tests::{sample_file, with_type_tree};
    use crate::unity::serialized::SerializedFile;
    use crate::unity::type_tree::tests::{aligned_u8, blob, float, int, leaf, pptr, string, structure, tree, vector, Field};
    use crate::unity::type_tree::TypeTree;

    fn face_info() -> Field {
        let mut fields = vec![string("Name")];
        for name in [
            "PointSize", "Scale", "CharacterCount", "LineHeight", "Baseline", "Ascender",
            "CapHeight", "Descender", "CenterLine", "SuperscriptOffset", "SubscriptOffset",
            "SubSize", "Underline", "UnderlineThickness", "strikethrough",
            "strikethroughThickness", "TabWidth", "Padding", "AtlasWidth", "AtlasHeight",
        ] {
            fields.push(if name == "CharacterCount" { int(name) } else { float(name) });
        }
        structure("FaceInfo_Legacy", "m_fontInfo", fields)
    }

    fn glyph() -> Field {
        let mut fields = vec![int("id")];
        for name in ["x", "y", "width", "height", "xOffset", "yOffset", "xAdvance", "scale"] {
            fields.push(float(name));
        }
        structure("TMP_Glyph", "data", fields)
    }

    /// A TextMesh Pro 3.x font asset as Unity 6 serializes it.
    fn font_layout() -> Field {
        structure("MonoBehaviour", "Base", vec![
            pptr("PPtr<GameObject>", "m_GameObject"),
            aligned_u8("m_Enabled"),
            pptr("PPtr<MonoScript>", "m_Script"),
            string("m_Name"),
            int("hashCode"),
            pptr("PPtr<Material>", "material"),
            int("materialHashCode"),
            string("m_Version"),
            string("m_SourceFontFileGUID"),
            pptr("PPtr<Object>", "m_SourceFontFile"),
            int("m_AtlasPopulationMode"),
            face_info(),
            pptr("PPtr<Texture2D>", "atlas"),
            int("m_AtlasWidth"),
            int("m_AtlasHeight"),
            int("m_AtlasPadding"),
            int("m_AtlasRenderMode"),
            vector("m_glyphInfoList", glyph()),
            aligned_u8("m_IsMultiAtlasTexturesEnabled"),
            vector("m_FallbackFontAssetTable", pptr("PPtr<MonoBehaviour>", "data")),
            leaf("float", "normalStyle", 4),
        ])
    }

    fn font_value(tree: &TypeTree, name: &str) -> Value {
        let json = serde_json::json!({
            "m_GameObject": {"m_FileID": 0, "m_PathID": 0},
            "m_Enabled": 1,
            "m_Script": {"m_FileID": 1, "m_PathID": 11500000},
            "m_Name": name,
            "hashCode": 1234,
            "material": {"m_FileID": 0, "m_PathID": -42},
            "materialHashCode": 5678,
            "m_Version": "1.1.0",
            "m_SourceFontFileGUID": "0123456789abcdef0123456789abcdef",
            "m_SourceFontFile": {"m_FileID": 0, "m_PathID": 0},
            "m_AtlasPopulationMode": 0,
            "m_fontInfo": {"Name": "Original", "PointSize": 36, "LineHeight": 40, "Scale": 1},
            "atlas": {"m_FileID": 0, "m_PathID": 77},
            "m_AtlasWidth": 2048,
            "m_AtlasHeight": 2048,
            "m_AtlasPadding": 5,
            "m_AtlasRenderMode": 4165,
            "m_glyphInfoList": [{"id": 65, "scale": 1}],
            "m_IsMultiAtlasTexturesEnabled": 0,
            "m_FallbackFontAssetTable": [{"m_FileID": 0, "m_PathID": 91}],
            "normalStyle": 0.5,
        });
        Value::from_json(&tree.root, &json, None).unwrap()
    }

    fn font_file(name: &str) -> (TypeTree, Vec<u8>, SerializedFile) {
        let layout = font_layout();
        let tree = tree(&layout);
        let data = tree.write(&font_value(&tree, name), Endian::Little).unwrap();
        let file = sample_file(22, Endian::Little, vec![(CLASS_MONO_BEHAVIOUR, 100, data.clone())]);
        let file = with_type_tree(file, CLASS_MONO_BEHAVIOUR, blob(&layout, Endian::Little));
        (tree, data, file)
    }

    fn load(file: &SerializedFile) -> AssetContainer {
        AssetContainer::from_bytes(&file.to_bytes().unwrap()).unwrap()
    }

    fn catalog_with(descriptor: FontDescriptor) -> Catalog {
        let mut catalog = Catalog::empty(default_aliases());
        catalog.insert(ReplacementEntry { name: "chinese_body_bold".to_string(), payload: Payload::Font(descriptor) });
        catalog
    }

    #[test]
    fn merges_face_info_and_replaces_glyphs() {
        let (tree, original, file) = font_file("do_not_use_chinese_body_bold");
        let mut container = load(&file);
        let catalog = catalog_with(FontDescriptor {
            font_info: Some(FaceInfoPatch { line_height: Some(64.0), ..Default::default() }),
            glyphs: Some(vec![
                serde_json::from_str::<GlyphDescriptor>(r#"{"id": 20013, "width": 30}"#).unwrap(),
                serde_json::from_str::<GlyphDescriptor>(r#"{"index": 25991}"#).unwrap(),
            ]),
        });

        let result = Patcher::Font.patch(&mut container, &catalog);
        assert_eq!((result.matched, result.replaced, result.skipped), (1, 1, 0));

        let obj = &container.files[0].objects[0];
        assert_eq!(obj.path_id, 100);
        let before = tree.read(&original, Endian::Little).unwrap();
        let patched = tree.read(&obj.data, Endian::Little).unwrap();
        for untouched in ["m_Script", "material", "m_Version", "m_SourceFontFileGUID", "atlas", "m_FallbackFontAssetTable", "normalStyle"] {
            assert_eq!(patched.field(untouched), before.field(untouched), "{}", untouched);
        }
        let info = patched.field("m_fontInfo").unwrap();
        assert_eq!(info.field("Name").and_then(Value::as_str), Some("Original"));
        assert_eq!(info.field("PointSize").and_then(Value::as_f64), Some(36.0));
        assert_eq!(info.field("LineHeight").and_then(Value::as_f64), Some(64.0));

        let Some(Value::Array(glyphs)) = patched.field("m_glyphInfoList") else { panic!("glyph table") };
        let ids: Vec<_> = glyphs.iter().map(|g| g.field("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Int(20013)), Some(Value::Int(25991))]);
        assert_eq!(glyphs[0].field("width").and_then(Value::as_f64), Some(30.0));
        assert_eq!(glyphs[1].field("scale").and_then(Value::as_f64), Some(1.0));
    }

    #[test]
    fn other_mono_behaviours_are_untouched() {
        let (_, _, file) = font_file("SomeOtherFont");
        let mut container = load(&file);
        let before = container.clone();

        let result = Patcher::Font.patch(&mut container, &catalog_with(FontDescriptor::default()));
        assert_eq!(result.matched, 0);
        assert_eq!(container, before);
    }

    #[test]
    fn font_without_type_tree_is_skipped() {
        let (_, data, _) = font_file("chinese_body_bold");
        let file = sample_file(22, Endian::Little, vec![(CLASS_MONO_BEHAVIOUR, 100, data.clone())]);
        let mut container = load(&file);

        let result = Patcher::Font.patch(&mut container, &catalog_with(FontDescriptor::default()));
        assert_eq!((result.matched, result.replaced, result.skipped), (1, 0, 1));
        assert_eq!(container.files[0].objects[0].data, data);
    }

    #[test]
    fn truncated_font_is_skipped() {
        let (_, mut data, _) = font_file("chinese_body_bold");
        data.truncate(data.len() - 6);
        let file = sample_file(22, Endian::Little, vec![(CLASS_MONO_BEHAVIOUR, 100, data.clone())]);
        let file = with_type_tree(file, CLASS_MONO_BEHAVIOUR, blob(&font_layout(), Endian::Little));
        let mut container = load(&file);

        let result = Patcher::Font.patch(&mut container, &catalog_with(FontDescriptor::default()));
        assert_eq!((result.matched, result.replaced, result.skipped), (1, 0, 1));
        assert_eq!(container.files[0].objects[0].data, data);
        let crate::error::MatchWarning::Skipped { reason, .. } = &result.warnings[0] else { panic!("warning") };
        assert!(reason.starts_with("not a readable font asset"), "{}", reason);
    }

    fn material_layout(keyed_by_struct: bool) -> Field {
        let key = if keyed_by_struct {
            structure("FastPropertyName", "first", vec![string("name")])
        } else {
            string("first")
        };
        structure("Material", "Base", vec![
            string("m_Name"),
            pptr("PPtr<Shader>", "m_Shader"),
            structure("UnityPropertySheet", "m_SavedProperties", vec![
                vector("m_Ints", structure("pair", "data", vec![string("first"), int("second")])),
                vector("m_Floats", structure("pair", "data", vec![key, float("second")])),
                vector("m_Colors", structure("pair", "data", vec![
                    string("first"),
                    structure("ColorRGBA", "second", vec![float("r"), float("g"), float("b"), float("a")]),
                ])),
            ]),
        ])
    }

    fn material_file(name: &str, floats: serde_json::Value, keyed_by_struct: bool) -> (TypeTree, SerializedFile) {
        let layout = material_layout(keyed_by_struct);
        let tree = tree(&layout);
        let value = Value::from_json(&tree.root, &serde_json::json!({
            "m_Name": name,
            "m_Shader": {"m_FileID": 0, "m_PathID": 3},
            "m_SavedProperties": {
                "m_Ints": [],
                "m_Floats": floats,
                "m_Colors": [{"first": "_FaceColor", "second": {"r": 1, "g": 1, "b": 1, "a": 1}}],
            },
        }), None).unwrap();
        let data = tree.write(&value, Endian::Little).unwrap();
        let file = sample_file(22, Endian::Little, vec![(CLASS_MATERIAL, 7, data)]);
        (tree, with_type_tree(file, CLASS_MATERIAL, blob(&layout, Endian::Little)))
    }

    fn floats_of(tree: &TypeTree, container: &AssetContainer) -> Vec<(String, f64)> {
        let value = tree.read(&container.files[0].objects[0].data, Endian::Little).unwrap();
        let Some(Value::Array(floats)) = value.field("m_SavedProperties").and_then(|p| p.field("m_Floats")) else {
            panic!("floats");
        };
        floats.iter()
            .map(|pair| (
                property_name(pair.field("first").unwrap()).unwrap().to_string(),
                pair.field("second").and_then(Value::as_f64).unwrap(),
            ))
            .collect()
    }

    #[test]
    fn atlas_materials_get_the_new_atlas_size() {
        let floats = serde_json::json!([
            {"first": "_GradientScale", "second": 10},
            {"first": "_TextureWidth", "second": 2048},
        ]);
        let (tree, file) = material_file("chinese_body_bold Material", floats, false);
        let mut container = load(&file);

        let result = Patcher::Font.patch(&mut container, &Catalog::empty(default_aliases()));
        assert_eq!((result.matched, result.replaced, result.skipped), (0, 1, 0));
        assert_eq!(floats_of(&tree, &container), vec![
            ("_GradientScale".to_string(), 10.0),
            ("_TextureWidth".to_string(), 4096.0),
            ("_TextureHeight".to_string(), 4096.0),
        ]);

        // a second pass finds nothing left to change
        let again = Patcher::Font.patch(&mut container, &Catalog::empty(default_aliases()));
        assert_eq!(again.replaced, 0);
    }

    #[test]
    fn older_property_names_are_structs() {
        let floats = serde_json::json!([{"first": {"name": "_TextureHeight"}, "second": 512}]);
        let (tree, file) = material_file("simsun_tmpro Material", floats, true);
        let mut container = load(&file);

        let result = Patcher::Font.patch(&mut container, &Catalog::empty(default_aliases()));
        assert_eq!(result.replaced, 1);
        assert_eq!(floats_of(&tree, &container), vec![
            ("_TextureHeight".to_string(), 4096.0),
            ("_TextureWidth".to_string(), 4096.0),
        ]);
    }

    #[test]
    fn other_materials_are_left_alone() {
        let (_, file) = material_file("UI Default Material", serde_json::json!([]), false);
        let mut container = load(&file);
        let before = container.clone();

        let result = Patcher::Font.patch(&mut container, &Catalog::empty(default_aliases()));
        assert_eq!(result.replaced, 0);
        assert_eq!(container, before);
    }
}

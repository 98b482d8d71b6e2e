use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::command::patch::PatchResult;
use crate::unity::text_asset::TextAsset;
use crate::unity::util::AlignedBytes;
use crate::unity::{AssetContainer, CLASS_TEXT_ASSET};

/// Swaps the script of every TextAsset that has a text entry. Names must match
/// exactly.
pub fn patch_text(container: &mut AssetContainer, catalog: &Catalog, result: &mut PatchResult) {
    for file in &mut container.files {
        let endian = file.endian();
        for obj in file.objects_of_class_mut(CLASS_TEXT_ASSET) {
            let mut text: TextAsset = match obj.read(endian) {
                Ok(text) => text,
                Err(e) => {
                    debug!("Could not decode TextAsset {}: {}", obj.path_id, e);
                    continue;
                }
            };
            let Some((entry, replacement)) = catalog.text(&text.object_name) else {
                continue;
            };
            result.record_match(entry);

            text.script = AlignedBytes(replacement.to_vec());
            if let Err(e) = obj.write(&text, endian) {
                result.skip(&text.object_name, e);
                continue;
            }
            info!("Replaced text '{}'", text.object_name.as_str());
            result.replaced += 1;
        }
    }
}

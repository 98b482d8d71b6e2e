use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::info;

use crate::catalog::Catalog;
use crate::command::patch::PatchResult;
use crate::unity::texture::{target_format, Texture2D};
use crate::unity::util::AlignedBytes;
use crate::unity::{plain_error, AssetContainer, Resource, CLASS_TEXTURE_2D};

/// Offsets of texture data inside `.resS` nodes are kept 16 byte aligned.
const STREAM_ALIGNMENT: usize = 16;

/// Replaces the pixels of every Texture2D that has an image entry. Streamed
/// textures get their new data appended to the resource node they point at, so
/// textures sharing that node keep their data.
pub fn patch_images(container: &mut AssetContainer, catalog: &Catalog, result: &mut PatchResult) {
    let resources = &mut container.resources;
    for file in &mut container.files {
        let endian = file.endian();
        for obj in file.objects_of_class_mut(CLASS_TEXTURE_2D) {
            let Some(name) = obj.peek_name(CLASS_TEXTURE_2D, endian) else {
                continue;
            };
            let Some((entry, png)) = catalog.image(&name) else {
                continue;
            };
            result.record_match(entry);

            let image = match image::load_from_memory_with_format(png, ImageFormat::Png) {
                Ok(image) => image,
                Err(e) => {
                    result.skip(&name, format!("replacement image {}.png is not a valid PNG: {}", entry, e));
                    continue;
                }
            };
            let mut texture: Texture2D = match obj.read(endian) {
                Ok(texture) => texture,
                Err(e) => {
                    result.skip(&name, format!("not a readable texture: {}", plain_error(&e)));
                    continue;
                }
            };
            if let Err(reason) = replace_pixels(&mut texture, &image, resources) {
                result.skip(&name, reason);
                continue;
            }
            if let Err(e) = obj.write(&texture, endian) {
                result.skip(&name, format!("texture could not be written: {}", plain_error(&e)));
                continue;
            }
            info!("Replaced texture '{}'", name);
            result.replaced += 1;
        }
    }
}

fn replace_pixels(texture: &mut Texture2D, image: &DynamicImage, resources: &mut [Resource]) -> Result<(), String> {
    let format = target_format(texture.texture_format);
    if format.raw() != texture.texture_format {
        info!(
            "Texture '{}' is stored as format {}, writing it as {:?}",
            texture.object_name.as_str(), texture.texture_format, format
        );
    }

    let (width, height) = image.dimensions();
    let (width, height) = (width as i32, height as i32);
    if (width, height) != (texture.width, texture.height) {
        info!(
            "Texture '{}' changes size from {}x{} to {}x{}",
            texture.object_name.as_str(), texture.width, texture.height, width, height
        );
    }

    let data = format.encode(image);
    if texture.stream_data.is_streamed() {
        let node = texture.stream_data.resource_name().to_string();
        let resource = resources.iter_mut()
            .find(|r| r.name == node)
            .ok_or_else(|| format!("streamed data points at missing node {}", node))?;
        let padded = resource.data.len().next_multiple_of(STREAM_ALIGNMENT);
        resource.data.resize(padded, 0);
        texture.stream_data.offset = padded as u64;
        texture.stream_data.size = data.len() as u32;
        texture.image_data = AlignedBytes(Vec::new());
        resource.data.extend_from_slice(&data);
    } else {
        texture.image_data = AlignedBytes(data.clone());
    }

    texture.width = width;
    texture.height = height;
    texture.texture_format = format.raw();
    texture.complete_image_size = data.len() as u32;
    texture.mip_count = 1;
    texture.image_count = 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::catalog::{Payload, ReplacementEntry};
    use crate::command::patch::Patcher;
    use crate::config::default_aliases;
    use crate::unity::serialized::tests::sample_file;
    use crate::unity::serialized::AssetObject;
    use crate::unity::tests::bundle_bytes;
    use crate::unity::texture::{StreamingInfo, TextureFormat, TextureSettings};
    use crate::unity::util::{AlignedString, Endian, U8Bool};

    fn texture(name: &str, format: i32, stream: Option<(&str, u64, u32)>) -> Texture2D {
        Texture2D {
            object_name: AlignedString(name.to_string()),
            forced_fallback_format: 4,
            downscale_fallback: U8Bool(false),
            is_alpha_channel_optional: U8Bool(false),
            width: 4,
            height: 4,
            complete_image_size: 16,
            mips_stripped: 0,
            texture_format: format,
            mip_count: 1,
            is_readable: U8Bool(false),
            is_pre_processed: U8Bool(false),
            ignore_mipmap_limit: U8Bool(false),
            mipmap_limit_group_name: AlignedString::default(),
            streaming_mipmaps: U8Bool(false),
            streaming_mipmaps_priority: 0,
            image_count: 1,
            texture_dimension: 2,
            texture_settings: TextureSettings::default(),
            lightmap_format: 0,
            color_space: 1,
            platform_blob: AlignedBytes::default(),
            image_data: AlignedBytes(if stream.is_some() { Vec::new() } else { vec![0xAA; 16] }),
            stream_data: match stream {
                Some((path, offset, size)) => StreamingInfo { offset, size, path: AlignedString(path.to_string()) },
                None => StreamingInfo::default(),
            },
        }
    }

    fn encode(texture: &Texture2D) -> Vec<u8> {
        let mut obj = AssetObject { path_id: 0, type_id: 0, data: Vec::new() };
        obj.write(texture, Endian::Little).unwrap();
        obj.data
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn catalog(entries: &[(&str, Vec<u8>)]) -> Catalog {
        let mut catalog = Catalog::empty(default_aliases());
        for (name, data) in entries {
            catalog.insert(ReplacementEntry { name: name.to_string(), payload: Payload::Image(data.clone()) });
        }
        catalog
    }

    #[test]
    fn embedded_texture_is_reencoded() {
        let file = sample_file(22, Endian::Little, vec![(CLASS_TEXTURE_2D, 1, encode(&texture("chinese_body_bold Atlas", 1, None)))]);
        let mut container = AssetContainer::from_bytes(&file.to_bytes().unwrap()).unwrap();

        let result = Patcher::Image.patch(&mut container, &catalog(&[("chinese_body_bold_Atlas", png(2, 3))]));
        assert_eq!(result.replaced, 1);

        let patched: Texture2D = container.files[0].objects[0].read(Endian::Little).unwrap();
        assert_eq!((patched.width, patched.height), (2, 3));
        assert_eq!(patched.texture_format, TextureFormat::Alpha8.raw());
        assert_eq!(patched.image_data.0, vec![255; 6]);
        assert_eq!(patched.complete_image_size, 6);
    }

    #[test]
    fn streamed_texture_is_appended_to_its_resource() {
        let path = "archive:/CAB-title/CAB-title.resS";
        let logo = texture("sactx-0-1024x1024-BC7-Title-228dda81", 25, Some((path, 0, 16)));
        let other = texture("sactx-1-other", 25, Some((path, 16, 16)));
        let file = sample_file(22, Endian::Little, vec![
            (CLASS_TEXTURE_2D, 1, encode(&logo)),
            (CLASS_TEXTURE_2D, 2, encode(&other)),
        ]);
        let original_res: Vec<u8> = (0..40).collect();
        let bytes = bundle_bytes(vec![("CAB-title", file)], vec![("CAB-title.resS", original_res.clone())]);
        let mut container = AssetContainer::from_bytes(&bytes).unwrap();

        let result = Patcher::Image.patch(&mut container, &catalog(&[("logo", png(2, 2))]));
        assert_eq!((result.matched, result.replaced), (1, 1));

        let patched: Texture2D = container.files[0].objects[0].read(Endian::Little).unwrap();
        let untouched: Texture2D = container.files[0].objects[1].read(Endian::Little).unwrap();
        assert_eq!(patched.texture_format, TextureFormat::Bc7.raw());
        // a 2x2 image still takes one whole 16 byte block
        assert_eq!(patched.stream_data.offset, 48);
        assert_eq!(patched.stream_data.size, 16);
        assert!(patched.image_data.is_empty());
        assert_eq!(untouched, other);

        let res = &container.resources[0].data;
        assert_eq!(&res[..40], &original_res[..]);
        assert_eq!(res.len(), 64);
        let mut pixels = [0u8; 64];
        bcdec_rs::bc7(&res[48..64], &mut pixels, 16);
        assert!(pixels[..4].iter().zip([1u8, 2, 3, 255]).all(|(a, b)| a.abs_diff(b) <= 4), "{:?}", &pixels[..4]);
    }

    #[test]
    fn malformed_png_skips_only_that_texture() {
        let file = sample_file(22, Endian::Little, vec![
            (CLASS_TEXTURE_2D, 1, encode(&texture("broken", 4, None))),
            (CLASS_TEXTURE_2D, 2, encode(&texture("fine", 4, None))),
        ]);
        let mut container = AssetContainer::from_bytes(&file.to_bytes().unwrap()).unwrap();
        let broken_before = container.files[0].objects[0].data.clone();

        let result = Patcher::Image.patch(&mut container, &catalog(&[
            ("broken", b"\x89PNG not really".to_vec()),
            ("fine", png(1, 1)),
        ]));

        assert_eq!((result.matched, result.replaced, result.skipped), (2, 1, 1));
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(container.files[0].objects[0].data, broken_before);
        let fine: Texture2D = container.files[0].objects[1].read(Endian::Little).unwrap();
        assert_eq!(fine.image_data.0, vec![1, 2, 3, 255]);
    }

    #[test]
    fn unreadable_texture_reason_is_one_plain_line() {
        let mut data = encode(&texture("broken", 4, None));
        data.truncate(30);
        let file = sample_file(22, Endian::Little, vec![(CLASS_TEXTURE_2D, 1, data)]);
        let mut container = AssetContainer::from_bytes(&file.to_bytes().unwrap()).unwrap();

        let result = Patcher::Image.patch(&mut container, &catalog(&[("broken", png(1, 1))]));
        assert_eq!((result.matched, result.skipped), (1, 1));
        let crate::error::MatchWarning::Skipped { reason, .. } = &result.warnings[0] else { panic!("warning") };
        assert!(reason.starts_with("not a readable texture: "), "{}", reason);
        assert!(!reason.contains('\u{1b}') && !reason.contains('\n'), "{:?}", reason);
    }
}

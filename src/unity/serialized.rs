use std::io::{Cursor, Seek, SeekFrom, Write};
use std::ops::Range;

use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::io_ext::WriteExt;
use crate::read_ext::ReadExt;
use crate::unity::type_tree::TypeTree;
use crate::unity::util::Endian;

/// Oldest serialized file format this module understands (Unity 5.5).
pub const MIN_VERSION: u32 = 17;
/// Format 22 widened the header and object offsets to 64 bits.
const LARGE_FILES_VERSION: u32 = 22;

const SMALL_HEADER_LEN: u64 = 20;
const LARGE_HEADER_LEN: u64 = 48;
/// Upper bound on capacity reserved from counts stored in the file.
const PREALLOC_LIMIT: usize = 4096;

#[derive(Debug, PartialEq, Clone)]
pub struct SerializedHeader {
    pub version: u32,
    pub endianness: Endian,
    pub reserved: [u8; 3],
    pub data_offset: u64,
    pub unknown: i64,
}

impl SerializedHeader {
    fn len(&self) -> u64 {
        if self.version >= LARGE_FILES_VERSION { LARGE_HEADER_LEN } else { SMALL_HEADER_LEN }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum TypeExtra {
    None,
    Dependencies(Vec<i32>),
    RefType {
        class_name: String,
        name_space: String,
        assembly_name: String,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct SerializedType {
    pub class_id: i32,
    pub is_stripped_type: bool,
    pub script_type_index: i16,
    pub script_id: Option<[u8; 16]>,
    pub old_type_hash: [u8; 16],
    /// Raw type tree blob, kept verbatim. Only present when the file enables type trees.
    pub type_tree: Option<Vec<u8>>,
    pub extra: TypeExtra,
}

impl SerializedType {
    /// Parses this type's field layout. Files built without type trees have none.
    pub fn type_tree(&self, version: u32, endian: Endian) -> anyhow::Result<TypeTree> {
        let blob = self.type_tree.as_deref()
            .with_context(|| format!("Class {} has no type tree in this file", self.class_id))?;
        TypeTree::parse(blob, version, endian)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ScriptType {
    pub local_serialized_file_index: i32,
    pub local_identifier_in_file: i64,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileIdentifier {
    pub temp_empty: String,
    pub guid: [u8; 16],
    pub r#type: i32,
    pub path: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Metadata {
    pub unity_version: String,
    pub target_platform: i32,
    pub enable_type_tree: bool,
    pub types: Vec<SerializedType>,
    pub script_types: Vec<ScriptType>,
    pub externals: Vec<FileIdentifier>,
    pub ref_types: Vec<SerializedType>,
    pub user_information: String,
}

/// One object's raw serialized bytes. `type_id` indexes [`Metadata::types`].
#[derive(Debug, PartialEq, Clone)]
pub struct AssetObject {
    pub path_id: i64,
    pub type_id: i32,
    pub data: Vec<u8>,
}

/// A Unity serialized file (`.assets`, or a `CAB-*` node inside a bundle) held in memory.
#[derive(Debug, PartialEq, Clone)]
pub struct SerializedFile {
    pub header: SerializedHeader,
    pub metadata: Metadata,
    pub objects: Vec<AssetObject>,
}

impl SerializedFile {
    pub fn endian(&self) -> Endian {
        self.header.endianness
    }

    /// Objects of one Unity class, mutable so patchers can swap their payload.
    pub fn objects_of_class_mut(&mut self, class_id: i32) -> impl Iterator<Item = &mut AssetObject> + '_ {
        let Self { metadata, objects, .. } = self;
        let types = &metadata.types;
        objects.iter_mut()
            .filter(move |obj| types.get(obj.type_id as usize).map(|t| t.class_id) == Some(class_id))
    }

    /// Like [`Self::objects_of_class_mut`], paired with each object's type entry.
    pub fn typed_objects_mut(&mut self, class_id: i32) -> impl Iterator<Item = (&SerializedType, &mut AssetObject)> + '_ {
        let Self { metadata, objects, .. } = self;
        let types = &metadata.types;
        objects.iter_mut().filter_map(move |obj| {
            let ty = types.get(obj.type_id as usize).filter(|t| t.class_id == class_id)?;
            Some((ty, obj))
        })
    }

    /// Cheap check used to tell serialized files apart from other bundle nodes.
    pub fn looks_like(data: &[u8]) -> bool {
        if data.len() < SMALL_HEADER_LEN as usize {
            return false;
        }
        let version = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        (MIN_VERSION..=40).contains(&version)
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Cursor::new(data);

        let metadata_size_small = reader.read_u32::<BigEndian>()?;
        let file_size_small = reader.read_u32::<BigEndian>()?;
        let version = reader.read_u32::<BigEndian>()?;
        let data_offset_small = reader.read_u32::<BigEndian>()?;
        if version < MIN_VERSION {
            anyhow::bail!("Serialized file version {} is not supported (minimum {})", version, MIN_VERSION);
        }
        let endianness = Endian::from_flag(reader.read_u8()?);
        let reserved = reader.read_array::<3>()?;

        let (metadata_size, file_size, data_offset, unknown) = if version >= LARGE_FILES_VERSION {
            let metadata_size = reader.read_u32::<BigEndian>()? as u64;
            let file_size = reader.read_i64::<BigEndian>()? as u64;
            let data_offset = reader.read_i64::<BigEndian>()? as u64;
            let unknown = reader.read_i64::<BigEndian>()?;
            (metadata_size, file_size, data_offset, unknown)
        } else {
            (metadata_size_small as u64, file_size_small as u64, data_offset_small as u64, 0)
        };

        if file_size > data.len() as u64 {
            anyhow::bail!("Serialized file is truncated ({} of {} bytes)", data.len(), file_size);
        }

        let header = SerializedHeader { version, endianness, reserved, data_offset, unknown };
        let (metadata, infos) = read_metadata(&mut reader, version, endianness)
            .context("Failed to read serialized file metadata")?;
        let parsed_len = reader.position() - header.len();
        if parsed_len != metadata_size {
            tracing::debug!("Metadata size mismatch: header says {}, parsed {}", metadata_size, parsed_len);
        }

        let mut objects = Vec::with_capacity(infos.len());
        for info in infos {
            let bytes = object_range(data_offset, &info)
                .and_then(|range| data.get(range))
                .with_context(|| format!("Object {} lies outside the file", info.path_id))?;
            objects.push(AssetObject {
                path_id: info.path_id,
                type_id: info.type_id,
                data: bytes.to_vec(),
            });
        }

        Ok(SerializedFile { header, metadata, objects })
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let version = self.header.version;
        let endian = self.header.endianness;

        // object data starts 8 byte aligned, relative to the data offset
        let mut infos = Vec::with_capacity(self.objects.len());
        let mut offset = 0u64;
        for obj in &self.objects {
            offset = align_up(offset, 8);
            infos.push(ObjectInfo {
                path_id: obj.path_id,
                byte_start: offset,
                byte_size: obj.data.len() as u32,
                type_id: obj.type_id,
            });
            offset += obj.data.len() as u64;
        }
        let data_len = offset;

        let mut writer = Cursor::new(Vec::new());
        writer.write_all(&vec![0u8; self.header.len() as usize])?;
        write_metadata(&mut writer, version, endian, &self.metadata, &infos)
            .context("Failed to write serialized file metadata")?;
        let metadata_end = writer.stream_position()?;
        let metadata_size = metadata_end - self.header.len();

        // keep the original data offset when the metadata still fits in front of it
        let data_offset = if self.header.data_offset >= metadata_end {
            self.header.data_offset
        } else {
            align_up(metadata_end, 16)
        };
        writer.write_all(&vec![0u8; (data_offset - metadata_end) as usize])?;

        for (obj, info) in self.objects.iter().zip(&infos) {
            let pos = writer.stream_position()?;
            let target = data_offset + info.byte_start;
            if pos < target {
                writer.write_all(&vec![0u8; (target - pos) as usize])?;
            }
            writer.write_all(&obj.data)?;
        }
        let file_size = data_offset + data_len;

        writer.seek(SeekFrom::Start(0))?;
        if version >= LARGE_FILES_VERSION {
            writer.write_u32::<BigEndian>(0)?;
            writer.write_u32::<BigEndian>(0)?;
            writer.write_u32::<BigEndian>(version)?;
            writer.write_u32::<BigEndian>(0)?;
            writer.write_u8(endian.flag())?;
            writer.write_all(&self.header.reserved)?;
            writer.write_u32::<BigEndian>(metadata_size as u32)?;
            writer.write_i64::<BigEndian>(file_size as i64)?;
            writer.write_i64::<BigEndian>(data_offset as i64)?;
            writer.write_i64::<BigEndian>(self.header.unknown)?;
        } else {
            writer.write_u32::<BigEndian>(metadata_size as u32)?;
            writer.write_u32::<BigEndian>(file_size as u32)?;
            writer.write_u32::<BigEndian>(version)?;
            writer.write_u32::<BigEndian>(data_offset as u32)?;
            writer.write_u8(endian.flag())?;
            writer.write_all(&self.header.reserved)?;
        }

        Ok(writer.into_inner())
    }
}

#[derive(Debug, PartialEq)]
struct ObjectInfo {
    path_id: i64,
    byte_start: u64,
    byte_size: u32,
    type_id: i32,
}

fn object_range(data_offset: u64, info: &ObjectInfo) -> Option<Range<usize>> {
    let start = data_offset.checked_add(info.byte_start)?;
    let end = start.checked_add(info.byte_size as u64)?;
    Some(usize::try_from(start).ok()?..usize::try_from(end).ok()?)
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn read_metadata(reader: &mut Cursor<&[u8]>, version: u32, endian: Endian) -> anyhow::Result<(Metadata, Vec<ObjectInfo>)> {
    let unity_version = reader.read_null_string()?;
    let target_platform = reader.read_i32_order(endian)?;
    let enable_type_tree = reader.read_u8()? != 0;

    let type_count = read_count(reader, endian)?;
    let mut types = Vec::with_capacity(type_count.min(PREALLOC_LIMIT));
    for _ in 0..type_count {
        types.push(read_type(reader, version, endian, enable_type_tree, false)?);
    }

    let object_count = read_count(reader, endian)?;
    let mut infos = Vec::with_capacity(object_count.min(PREALLOC_LIMIT));
    for _ in 0..object_count {
        reader.skip_to_alignment(4)?;
        let path_id = reader.read_i64_order(endian)?;
        let byte_start = if version >= LARGE_FILES_VERSION {
            reader.read_i64_order(endian)? as u64
        } else {
            reader.read_u32_order(endian)? as u64
        };
        let byte_size = reader.read_u32_order(endian)?;
        let type_id = reader.read_i32_order(endian)?;
        infos.push(ObjectInfo { path_id, byte_start, byte_size, type_id });
    }

    let script_count = read_count(reader, endian)?;
    let mut script_types = Vec::with_capacity(script_count.min(PREALLOC_LIMIT));
    for _ in 0..script_count {
        let local_serialized_file_index = reader.read_i32_order(endian)?;
        reader.skip_to_alignment(4)?;
        let local_identifier_in_file = reader.read_i64_order(endian)?;
        script_types.push(ScriptType { local_serialized_file_index, local_identifier_in_file });
    }

    let externals_count = read_count(reader, endian)?;
    let mut externals = Vec::with_capacity(externals_count.min(PREALLOC_LIMIT));
    for _ in 0..externals_count {
        let temp_empty = reader.read_null_string()?;
        let guid = reader.read_array::<16>()?;
        let r#type = reader.read_i32_order(endian)?;
        let path = reader.read_null_string()?;
        externals.push(FileIdentifier { temp_empty, guid, r#type, path });
    }

    let mut ref_types = Vec::new();
    if version >= 20 {
        let ref_type_count = read_count(reader, endian)?;
        for _ in 0..ref_type_count {
            ref_types.push(read_type(reader, version, endian, enable_type_tree, true)?);
        }
    }

    let user_information = reader.read_null_string()?;

    let metadata = Metadata {
        unity_version,
        target_platform,
        enable_type_tree,
        types,
        script_types,
        externals,
        ref_types,
        user_information,
    };
    Ok((metadata, infos))
}

fn read_count(reader: &mut Cursor<&[u8]>, endian: Endian) -> anyhow::Result<usize> {
    let count = reader.read_i32_order(endian)?;
    usize::try_from(count).with_context(|| format!("Invalid element count {}", count))
}

fn read_type(
    reader: &mut Cursor<&[u8]>,
    version: u32,
    endian: Endian,
    enable_type_tree: bool,
    is_ref_type: bool,
) -> anyhow::Result<SerializedType> {
    let class_id = reader.read_i32_order(endian)?;
    let is_stripped_type = reader.read_u8()? != 0;
    let script_type_index = reader.read_i16_order(endian)?;
    let script_id = if (is_ref_type && script_type_index >= 0) || class_id == 114 {
        Some(reader.read_array::<16>()?)
    } else {
        None
    };
    let old_type_hash = reader.read_array::<16>()?;

    let mut type_tree = None;
    let mut extra = TypeExtra::None;
    if enable_type_tree {
        let start = reader.position();
        let node_count = read_count(reader, endian)?;
        let string_buffer_size = read_count(reader, endian)?;
        let node_size = if version >= 19 { 32 } else { 24 };
        let blob_len = node_count.checked_mul(node_size)
            .and_then(|len| len.checked_add(8 + string_buffer_size))
            .context("Type tree size overflows")?;
        reader.seek(SeekFrom::Start(start))?;
        type_tree = Some(reader.read_vec(blob_len)?);

        if version >= 21 {
            if is_ref_type {
                extra = TypeExtra::RefType {
                    class_name: reader.read_null_string()?,
                    name_space: reader.read_null_string()?,
                    assembly_name: reader.read_null_string()?,
                };
            } else {
                let dependency_count = read_count(reader, endian)?;
                let mut dependencies = Vec::with_capacity(dependency_count.min(PREALLOC_LIMIT));
                for _ in 0..dependency_count {
                    dependencies.push(reader.read_i32_order(endian)?);
                }
                extra = TypeExtra::Dependencies(dependencies);
            }
        }
    }

    Ok(SerializedType {
        class_id,
        is_stripped_type,
        script_type_index,
        script_id,
        old_type_hash,
        type_tree,
        extra,
    })
}

fn write_metadata(
    writer: &mut Cursor<Vec<u8>>,
    version: u32,
    endian: Endian,
    metadata: &Metadata,
    infos: &[ObjectInfo],
) -> anyhow::Result<()> {
    writer.write_null_string(&metadata.unity_version)?;
    writer.write_i32_order(endian, metadata.target_platform)?;
    writer.write_u8(metadata.enable_type_tree as u8)?;

    writer.write_i32_order(endian, metadata.types.len() as i32)?;
    for ty in &metadata.types {
        write_type(writer, endian, ty)?;
    }

    writer.write_i32_order(endian, infos.len() as i32)?;
    for info in infos {
        writer.align(4)?;
        writer.write_i64_order(endian, info.path_id)?;
        if version >= LARGE_FILES_VERSION {
            writer.write_i64_order(endian, info.byte_start as i64)?;
        } else {
            writer.write_u32_order(endian, info.byte_start as u32)?;
        }
        writer.write_u32_order(endian, info.byte_size)?;
        writer.write_i32_order(endian, info.type_id)?;
    }

    writer.write_i32_order(endian, metadata.script_types.len() as i32)?;
    for script in &metadata.script_types {
        writer.write_i32_order(endian, script.local_serialized_file_index)?;
        writer.align(4)?;
        writer.write_i64_order(endian, script.local_identifier_in_file)?;
    }

    writer.write_i32_order(endian, metadata.externals.len() as i32)?;
    for external in &metadata.externals {
        writer.write_null_string(&external.temp_empty)?;
        writer.write_all(&external.guid)?;
        writer.write_i32_order(endian, external.r#type)?;
        writer.write_null_string(&external.path)?;
    }

    if version >= 20 {
        writer.write_i32_order(endian, metadata.ref_types.len() as i32)?;
        for ty in &metadata.ref_types {
            write_type(writer, endian, ty)?;
        }
    }

    writer.write_null_string(&metadata.user_information)?;
    Ok(())
}

fn write_type(writer: &mut Cursor<Vec<u8>>, endian: Endian, ty: &SerializedType) -> anyhow::Result<()> {
    writer.write_i32_order(endian, ty.class_id)?;
    writer.write_u8(ty.is_stripped_type as u8)?;
    writer.write_i16_order(endian, ty.script_type_index)?;
    if let Some(script_id) = &ty.script_id {
        writer.write_all(script_id)?;
    }
    writer.write_all(&ty.old_type_hash)?;
    if let Some(tree) = &ty.type_tree {
        writer.write_all(tree)?;
    }
    match &ty.extra {
        TypeExtra::None => {}
        TypeExtra::Dependencies(dependencies) => {
            writer.write_i32_order(endian, dependencies.len() as i32)?;
            for dependency in dependencies {
                writer.write_i32_order(endian, *dependency)?;
            }
        }
        TypeExtra::RefType { class_name, name_space, assembly_name } => {
            writer.write_null_string(class_name)?;
            writer.write_null_string(name_space)?;
            writer.write_null_string(assembly_name)?;
        }
    }
    Ok(())
}

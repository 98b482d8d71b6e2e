use std::io::{Cursor, Write};
use std::ops::Range;

use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::io_ext::WriteExt;
use crate::read_ext::ReadExt;

pub const SIGNATURE: &str = "UnityFS";

const COMPRESSION_MASK: u32 = 0x3F;
const BLOCKS_AND_DIRECTORY_COMBINED: u32 = 0x40;
const BLOCKS_INFO_AT_END: u32 = 0x80;
const BLOCK_INFO_NEEDS_PADDING: u32 = 0x200;

/// Size of the chunks written back; matches what Unity uses for chunk-based LZ4.
const BLOCK_SIZE: usize = 0x20000;

/// Directory node flag marking a serialized file.
pub const NODE_SERIALIZED_FILE: u32 = 0x4;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Compression {
    None,
    Lzma,
    Lz4,
    Lz4Hc,
    Lzham,
}

impl Compression {
    fn from_flags(flags: u32) -> anyhow::Result<Self> {
        Ok(match flags & COMPRESSION_MASK {
            0 => Compression::None,
            1 => Compression::Lzma,
            2 => Compression::Lz4,
            3 => Compression::Lz4Hc,
            4 => Compression::Lzham,
            other => anyhow::bail!("Unknown bundle compression type {}", other),
        })
    }

    fn decompress(self, data: &[u8], uncompressed_size: usize) -> anyhow::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 | Compression::Lz4Hc => lz4_flex::block::decompress(data, uncompressed_size)
                .map_err(|e| anyhow::anyhow!("LZ4: {}", e)),
            Compression::Lzma | Compression::Lzham => {
                anyhow::bail!("{:?} compressed bundles are not supported", self)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BundleHeader {
    pub version: u32,
    pub unity_version: String,
    pub unity_revision: String,
    pub flags: u32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BundleNode {
    pub path: String,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// A decompressed `UnityFS` archive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnityFsBundle {
    pub header: BundleHeader,
    pub nodes: Vec<BundleNode>,
}

struct BlockInfo {
    uncompressed_size: u32,
    compressed_size: u32,
    flags: u16,
}

impl UnityFsBundle {
    pub fn is_bundle(data: &[u8]) -> bool {
        data.len() > SIGNATURE.len() && &data[..SIGNATURE.len()] == SIGNATURE.as_bytes()
            && data[SIGNATURE.len()] == 0
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Cursor::new(data);
        let signature = reader.read_null_string()?;
        if signature != SIGNATURE {
            anyhow::bail!("Unsupported bundle signature {:?}", signature);
        }
        let version = reader.read_u32::<BigEndian>()?;
        let unity_version = reader.read_null_string()?;
        let unity_revision = reader.read_null_string()?;
        let _size = reader.read_i64::<BigEndian>()?;
        let compressed_info_size = reader.read_u32::<BigEndian>()? as usize;
        let uncompressed_info_size = reader.read_u32::<BigEndian>()? as usize;
        let flags = reader.read_u32::<BigEndian>()?;
        if version >= 7 {
            reader.skip_to_alignment(16)?;
        }

        let info_start = if flags & BLOCKS_INFO_AT_END != 0 {
            data.len().checked_sub(compressed_info_size)
                .context("Bundle block info lies outside the file")?
        } else {
            reader.position() as usize
        };
        let compressed_info = info_start.checked_add(compressed_info_size)
            .and_then(|end| data.get(info_start..end))
            .context("Bundle block info is truncated")?;
        let info = Compression::from_flags(flags)?
            .decompress(compressed_info, uncompressed_info_size)
            .context("Failed to decompress bundle block info")?;
        if flags & BLOCKS_INFO_AT_END == 0 {
            reader.set_position((info_start + compressed_info_size) as u64);
        }
        if flags & BLOCK_INFO_NEEDS_PADDING != 0 {
            reader.skip_to_alignment(16)?;
        }

        let mut info_reader = Cursor::new(info.as_slice());
        let _hash = info_reader.read_array::<16>()?;
        let block_count = info_reader.read_i32::<BigEndian>()?;
        let mut blocks = Vec::new();
        for _ in 0..block_count {
            blocks.push(BlockInfo {
                uncompressed_size: info_reader.read_u32::<BigEndian>()?,
                compressed_size: info_reader.read_u32::<BigEndian>()?,
                flags: info_reader.read_u16::<BigEndian>()?,
            });
        }

        let mut storage = Vec::new();
        let mut pos = reader.position() as usize;
        for (index, block) in blocks.iter().enumerate() {
            let end = pos.checked_add(block.compressed_size as usize)
                .with_context(|| format!("Bundle block {} lies outside the file", index))?;
            let compressed = data.get(pos..end)
                .with_context(|| format!("Bundle block {} is truncated", index))?;
            let decompressed = Compression::from_flags(block.flags as u32)?
                .decompress(compressed, block.uncompressed_size as usize)
                .with_context(|| format!("Failed to decompress bundle block {}", index))?;
            storage.extend_from_slice(&decompressed);
            pos = end;
        }

        let node_count = info_reader.read_i32::<BigEndian>()?;
        let mut nodes = Vec::new();
        for _ in 0..node_count {
            let offset = info_reader.read_i64::<BigEndian>()?;
            let size = info_reader.read_i64::<BigEndian>()?;
            let flags = info_reader.read_u32::<BigEndian>()?;
            let path = info_reader.read_null_string()?;
            let data = node_range(offset, size)
                .and_then(|range| storage.get(range))
                .with_context(|| format!("Bundle node {} lies outside the data blocks", path))?
                .to_vec();
            nodes.push(BundleNode { path, flags, data });
        }

        Ok(UnityFsBundle {
            header: BundleHeader { version, unity_version, unity_revision, flags },
            nodes,
        })
    }

    /// Writes the bundle with LZ4 data blocks and an uncompressed directory placed
    /// right after the header.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut storage = Vec::new();
        let mut directory = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            directory.push((storage.len() as i64, node.data.len() as i64, node.flags, node.path.as_str()));
            storage.extend_from_slice(&node.data);
        }

        let mut blocks = Vec::new();
        let mut block_data = Vec::new();
        for chunk in storage.chunks(BLOCK_SIZE) {
            let compressed = lz4_flex::block::compress(chunk);
            if compressed.len() < chunk.len() {
                blocks.push((chunk.len() as u32, compressed.len() as u32, 2u16));
                block_data.extend_from_slice(&compressed);
            } else {
                blocks.push((chunk.len() as u32, chunk.len() as u32, 0u16));
                block_data.extend_from_slice(chunk);
            }
        }

        let mut info = Cursor::new(Vec::new());
        info.write_all(&[0u8; 16])?;
        info.write_i32::<BigEndian>(blocks.len() as i32)?;
        for (uncompressed, compressed, flags) in &blocks {
            info.write_u32::<BigEndian>(*uncompressed)?;
            info.write_u32::<BigEndian>(*compressed)?;
            info.write_u16::<BigEndian>(*flags)?;
        }
        info.write_i32::<BigEndian>(directory.len() as i32)?;
        for (offset, size, flags, path) in &directory {
            info.write_i64::<BigEndian>(*offset)?;
            info.write_i64::<BigEndian>(*size)?;
            info.write_u32::<BigEndian>(*flags)?;
            info.write_null_string(path)?;
        }
        let info = info.into_inner();

        let flags = (self.header.flags & !(COMPRESSION_MASK | BLOCKS_INFO_AT_END)) | BLOCKS_AND_DIRECTORY_COMBINED;
        let header_len = self.header_bytes(0, info.len() as u32, flags)?.len();
        let mut total = header_len + info.len();
        if flags & BLOCK_INFO_NEEDS_PADDING != 0 {
            total = total.div_ceil(16) * 16;
        }
        total += block_data.len();

        let mut writer = Cursor::new(self.header_bytes(total as i64, info.len() as u32, flags)?);
        writer.set_position(header_len as u64);
        writer.write_all(&info)?;
        if flags & BLOCK_INFO_NEEDS_PADDING != 0 {
            writer.align(16)?;
        }
        writer.write_all(&block_data)?;
        Ok(writer.into_inner())
    }

    fn header_bytes(&self, size: i64, info_size: u32, flags: u32) -> anyhow::Result<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        writer.write_null_string(SIGNATURE)?;
        writer.write_u32::<BigEndian>(self.header.version)?;
        writer.write_null_string(&self.header.unity_version)?;
        writer.write_null_string(&self.header.unity_revision)?;
        writer.write_i64::<BigEndian>(size)?;
        writer.write_u32::<BigEndian>(info_size)?;
        writer.write_u32::<BigEndian>(info_size)?;
        writer.write_u32::<BigEndian>(flags)?;
        if self.header.version >= 7 {
            writer.align(16)?;
        }
        Ok(writer.into_inner())
    }
}

fn node_range(offset: i64, size: i64) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    Some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle() -> UnityFsBundle {
        UnityFsBundle {
            header: BundleHeader {
                version: 8,
                unity_version: "5.x.x".to_string(),
                unity_revision: "6000.0.50f1".to_string(),
                flags: 0x43 | BLOCK_INFO_NEEDS_PADDING,
            },
            nodes: vec![
                BundleNode { path: "CAB-0123".to_string(), flags: NODE_SERIALIZED_FILE, data: vec![7; 300_000] },
                BundleNode { path: "CAB-0123.resS".to_string(), flags: 0, data: (0..=255u8).cycle().take(1000).collect() },
            ],
        }
    }

    #[test]
    fn rewritten_bundle_reads_back_identically() {
        let bundle = sample_bundle();
        let bytes = bundle.to_bytes().unwrap();
        assert!(UnityFsBundle::is_bundle(&bytes));

        let parsed = UnityFsBundle::parse(&bytes).unwrap();
        assert_eq!(parsed.nodes, bundle.nodes);
        assert_eq!(parsed.header.flags & COMPRESSION_MASK, 0);
        assert_ne!(parsed.header.flags & BLOCKS_AND_DIRECTORY_COMBINED, 0);
        assert_eq!(parsed.header.unity_revision, "6000.0.50f1");
    }

    /// A version 6 bundle with uncompressed data and LZ4 block info at the end of the file.
    fn bundle_with_info_at_end(storage: &[u8], nodes: &[(i64, i64, u32, &str)]) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&[0u8; 16]);
        info.extend_from_slice(&1i32.to_be_bytes());
        info.extend_from_slice(&(storage.len() as u32).to_be_bytes());
        info.extend_from_slice(&(storage.len() as u32).to_be_bytes());
        info.extend_from_slice(&0u16.to_be_bytes());
        info.extend_from_slice(&(nodes.len() as i32).to_be_bytes());
        for (offset, size, flags, path) in nodes {
            info.extend_from_slice(&offset.to_be_bytes());
            info.extend_from_slice(&size.to_be_bytes());
            info.extend_from_slice(&flags.to_be_bytes());
            info.extend_from_slice(path.as_bytes());
            info.push(0);
        }
        let compressed_info = lz4_flex::block::compress(&info);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"UnityFS\0");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(b"5.x.x\0");
        bytes.extend_from_slice(b"2020.3.1f1\0");
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&(compressed_info.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(info.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(3 | BLOCKS_INFO_AT_END).to_be_bytes());
        bytes.extend_from_slice(storage);
        bytes.extend_from_slice(&compressed_info);
        bytes
    }

    #[test]
    fn reads_lz4_block_info_stored_at_the_end() {
        let bundle = sample_bundle();
        let storage: Vec<u8> = bundle.nodes.iter().flat_map(|n| n.data.clone()).collect();
        let mut offset = 0i64;
        let mut nodes = Vec::new();
        for node in &bundle.nodes {
            nodes.push((offset, node.data.len() as i64, node.flags, node.path.as_str()));
            offset += node.data.len() as i64;
        }

        let parsed = UnityFsBundle::parse(&bundle_with_info_at_end(&storage, &nodes)).unwrap();
        assert_eq!(parsed.nodes, bundle.nodes);
    }

    #[test]
    fn node_ranges_that_overflow_are_rejected() {
        let storage = vec![1u8; 64];
        for (offset, size) in [(i64::MAX - 8, 100), (-1, 4), (8, -1), (32, 64)] {
            let bytes = bundle_with_info_at_end(&storage, &[(offset, size, 0, "CAB-bad")]);
            let err = UnityFsBundle::parse(&bytes).unwrap_err();
            assert!(format!("{:#}", err).contains("lies outside"), "{}", err);
        }
    }

    #[test]
    fn lzma_bundles_are_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"UnityFS\0");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(b"5.x.x\0x\0");
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);
        let err = UnityFsBundle::parse(&bytes).unwrap_err();
        assert!(format!("{:#}", err).contains("not supported"));
    }
}

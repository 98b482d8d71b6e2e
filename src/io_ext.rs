use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use rand::random;

use crate::unity::util::Endian;

pub trait WriteExt {
    fn align(&mut self, alignment: u64) -> anyhow::Result<()>;

    fn write_i16_order(&mut self, endian: Endian, val: i16) -> anyhow::Result<()>;

    fn write_i32_order(&mut self, endian: Endian, val: i32) -> anyhow::Result<()>;

    fn write_u32_order(&mut self, endian: Endian, val: u32) -> anyhow::Result<()>;

    fn write_i64_order(&mut self, endian: Endian, val: i64) -> anyhow::Result<()>;

    fn write_null_string(&mut self, s: &str) -> anyhow::Result<()>;
}

impl<W: Write + Seek> WriteExt for W {
    fn align(&mut self, alignment: u64) -> anyhow::Result<()> {
        let pos = self.stream_position()?;
        let rem = pos % alignment;
        if rem != 0 {
            let pad = alignment - rem;
            self.write_all(&vec![0u8; pad as usize]).context("Failed to align")?;
        }
        Ok(())
    }

    fn write_i16_order(&mut self, endian: Endian, val: i16) -> anyhow::Result<()> {
        match endian {
            Endian::Little => self.write_i16::<LittleEndian>(val),
            Endian::Big => self.write_i16::<BigEndian>(val),
        }.context("Failed to write i16")
    }

    fn write_i32_order(&mut self, endian: Endian, val: i32) -> anyhow::Result<()> {
        match endian {
            Endian::Little => self.write_i32::<LittleEndian>(val),
            Endian::Big => self.write_i32::<BigEndian>(val),
        }.context("Failed to write i32")
    }

    fn write_u32_order(&mut self, endian: Endian, val: u32) -> anyhow::Result<()> {
        match endian {
            Endian::Little => self.write_u32::<LittleEndian>(val),
            Endian::Big => self.write_u32::<BigEndian>(val),
        }.context("Failed to write u32")
    }

    fn write_i64_order(&mut self, endian: Endian, val: i64) -> anyhow::Result<()> {
        match endian {
            Endian::Little => self.write_i64::<LittleEndian>(val),
            Endian::Big => self.write_i64::<BigEndian>(val),
        }.context("Failed to write i64")
    }

    fn write_null_string(&mut self, s: &str) -> anyhow::Result<()> {
        self.write_all(s.as_bytes()).context("Failed to write string")?;
        self.write_u8(0).context("Failed to write string terminator")
    }
}

/// Path of a fresh temporary file next to `target`, so the final rename never
/// crosses a filesystem boundary.
fn temp_sibling(target: &Path) -> anyhow::Result<PathBuf> {
    let name = target.file_name()
        .with_context(|| format!("{} has no file name", target.display()))?
        .to_string_lossy();
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(dir.join(format!(".{}.{:016x}.tmp", name, random::<u64>())))
}

fn commit_temp(temp: &Path, target: &Path) -> anyhow::Result<()> {
    if let Err(e) = fs::rename(temp, target) {
        let _ = fs::remove_file(temp);
        return Err(e).with_context(|| format!("Failed to move {} into place", target.display()));
    }
    Ok(())
}

/// Writes `data` to `target` through a temporary file and a rename. Readers see
/// either the previous content or all of `data`, never a truncated file.
pub fn write_atomic(target: &Path, data: &[u8]) -> anyhow::Result<()> {
    let temp = temp_sibling(target)?;
    let written = File::create(&temp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e).with_context(|| format!("Failed to write temporary file {}", temp.display()));
    }
    commit_temp(&temp, target)
}

/// Copies `source` over `target` with the same all-or-nothing guarantee as [`write_atomic`].
pub fn copy_atomic(source: &Path, target: &Path) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let temp = temp_sibling(target)?;
    let copied = fs::copy(source, &temp)
        .and_then(|_| File::open(&temp)?.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(&temp);
        return Err(e).with_context(|| format!("Failed to copy {} to {}", source.display(), temp.display()));
    }
    commit_temp(&temp, target)
}

use std::io::{Read, Seek, SeekFrom};

use anyhow::Context;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::unity::util::Endian;

pub trait ReadExt {
    fn read_i16_order(&mut self, endian: Endian) -> anyhow::Result<i16>;

    fn read_i32_order(&mut self, endian: Endian) -> anyhow::Result<i32>;

    fn read_u32_order(&mut self, endian: Endian) -> anyhow::Result<u32>;

    fn read_i64_order(&mut self, endian: Endian) -> anyhow::Result<i64>;

    fn read_null_string(&mut self) -> anyhow::Result<String>;

    fn read_vec(&mut self, len: usize) -> anyhow::Result<Vec<u8>>;

    fn read_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]>;

    fn skip_to_alignment(&mut self, alignment: u64) -> anyhow::Result<()>;
}

impl<R: Read + Seek> ReadExt for R {
    fn read_i16_order(&mut self, endian: Endian) -> anyhow::Result<i16> {
        match endian {
            Endian::Little => self.read_i16::<LittleEndian>(),
            Endian::Big => self.read_i16::<BigEndian>(),
        }.context("Failed to read i16")
    }

    fn read_i32_order(&mut self, endian: Endian) -> anyhow::Result<i32> {
        match endian {
            Endian::Little => self.read_i32::<LittleEndian>(),
            Endian::Big => self.read_i32::<BigEndian>(),
        }.context("Failed to read i32")
    }

    fn read_u32_order(&mut self, endian: Endian) -> anyhow::Result<u32> {
        match endian {
            Endian::Little => self.read_u32::<LittleEndian>(),
            Endian::Big => self.read_u32::<BigEndian>(),
        }.context("Failed to read u32")
    }

    fn read_i64_order(&mut self, endian: Endian) -> anyhow::Result<i64> {
        match endian {
            Endian::Little => self.read_i64::<LittleEndian>(),
            Endian::Big => self.read_i64::<BigEndian>(),
        }.context("Failed to read i64")
    }

    fn read_null_string(&mut self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        loop {
            let byte = self.read_u8().context("Unterminated string")?;
            if byte == 0 {
                break;
            }
            buf.push(byte);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn read_vec(&mut self, len: usize) -> anyhow::Result<Vec<u8>> {
        // grows with what is actually there instead of trusting `len` up front
        let mut buf = Vec::new();
        self.by_ref().take(len as u64).read_to_end(&mut buf)
            .with_context(|| format!("Failed to read {} bytes", len))?;
        if buf.len() != len {
            anyhow::bail!("Failed to read {} bytes, only {} left", len, buf.len());
        }
        Ok(buf)
    }

    fn read_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        let mut buf = [0; N];
        self.read_exact(&mut buf)
            .with_context(|| format!("Failed to read {} bytes", N))?;
        Ok(buf)
    }

    fn skip_to_alignment(&mut self, alignment: u64) -> anyhow::Result<()> {
        let pos = self.stream_position()?;
        let rem = pos % alignment;
        if rem != 0 {
            self.seek(SeekFrom::Current((alignment - rem) as i64))
                .context("Failed to align")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn read_vec_stops_at_the_end_of_the_stream() {
        let mut reader = Cursor::new(vec![1u8, 2, 3]);
        assert_eq!(reader.read_vec(2).unwrap(), vec![1, 2]);
        let err = reader.read_vec(usize::MAX / 2).unwrap_err();
        assert!(err.to_string().contains("only 1 left"), "{}", err);
    }
}

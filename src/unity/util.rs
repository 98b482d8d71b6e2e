use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian as BinrwEndian};

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct U8Bool(pub bool);

impl Deref for U8Bool {
    type Target = bool;

    fn deref(&self) -> &bool {
        &self.0
    }
}

impl BinRead for U8Bool {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(reader: &mut R, endian: BinrwEndian, _: Self::Args<'_>) -> BinResult<Self> {
        let val = <u8>::read_options(reader, endian, ())?;
        Ok(U8Bool(val != 0))
    }
}

impl BinWrite for U8Bool {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(&self, writer: &mut W, _endian: BinrwEndian, _args: Self::Args<'_>) -> BinResult<()> {
        let buf = if **self { [1u8; 1] } else { [0u8; 1] };
        writer.write_all(&buf)?;

        Ok(())
    }
}

/// Byte order of a serialized file's metadata and objects. Stored as a single byte
/// in the file header: 0 for little endian, anything else for big endian.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn from_flag(flag: u8) -> Self {
        if flag == 0 { Endian::Little } else { Endian::Big }
    }

    pub fn flag(self) -> u8 {
        match self {
            Endian::Little => 0,
            Endian::Big => 1,
        }
    }
}

impl From<Endian> for BinrwEndian {
    fn from(value: Endian) -> Self {
        match value {
            Endian::Little => BinrwEndian::Little,
            Endian::Big => BinrwEndian::Big,
        }
    }
}

/// Length-prefixed byte array padded to a 4 byte boundary, the way Unity stores
/// `string` and `vector<UInt8>` fields.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct AlignedBytes(pub Vec<u8>);

impl Deref for AlignedBytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.0
    }
}

impl BinRead for AlignedBytes {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(reader: &mut R, endian: BinrwEndian, _: Self::Args<'_>) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let len = <i32>::read_options(reader, endian, ())?;
        if len < 0 {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("Negative array length {}", len),
            });
        }
        let here = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(here))?;
        let left = end.saturating_sub(here);
        if len as u64 > left {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("Array length {} exceeds the {} bytes left", len, left),
            });
        }
        let mut buf = vec![0; len as usize];
        reader.read_exact(&mut buf)?;
        let rem = reader.stream_position()? % 4;
        if rem != 0 {
            reader.seek(SeekFrom::Current((4 - rem) as i64))?;
        }
        Ok(AlignedBytes(buf))
    }
}

impl BinWrite for AlignedBytes {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(&self, writer: &mut W, endian: BinrwEndian, _args: Self::Args<'_>) -> BinResult<()> {
        (self.0.len() as i32).write_options(writer, endian, ())?;
        writer.write_all(&self.0)?;
        let rem = writer.stream_position()? % 4;
        if rem != 0 {
            writer.write_all(&[0u8; 3][..(4 - rem) as usize])?;
        }
        Ok(())
    }
}

/// An [`AlignedBytes`] holding UTF-8 text. Invalid sequences are replaced on read.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct AlignedString(pub String);

impl Deref for AlignedString {
    type Target = String;

    fn deref(&self) -> &String {
        &self.0
    }
}

impl BinRead for AlignedString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(reader: &mut R, endian: BinrwEndian, _: Self::Args<'_>) -> BinResult<Self> {
        let bytes = AlignedBytes::read_options(reader, endian, ())?;
        Ok(AlignedString(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl BinWrite for AlignedString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(&self, writer: &mut W, endian: BinrwEndian, _args: Self::Args<'_>) -> BinResult<()> {
        AlignedBytes(self.0.as_bytes().to_vec()).write_options(writer, endian, ())
    }
}

/// Reference to another object, either in the same file (`file_id == 0`) or in
/// one of the file's externals.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct PPtr {
    pub file_id: i32,
    pub path_id: i64,
}

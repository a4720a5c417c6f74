use deku::prelude::*;

use crate::error::{ArchiveError, FormatError};
use crate::mode::{FileType, PERM_MASK};

pub const NEWC_MAGIC: [u8; 6] = [b'0', b'7', b'0', b'7', b'0', b'1'];
const MAGIC_SIZE_BYTES: usize = NEWC_MAGIC.len();
/// Every numeric field is eight ASCII hex digits
const FIELD_WIDTH: usize = 8;
const FIELD_COUNT: usize = 13;

/// Size in bytes of the fixed part of a newc header
pub const HEADER_SIZE: usize = MAGIC_SIZE_BYTES + FIELD_COUNT * FIELD_WIDTH;

/// Decoded fields of a newc ("SVR4", "New ASCII") header
///
/// Fields are in wire order. `namesize` includes the trailing NUL of the name.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub filesize: u32,
    /// Major number of the device holding the file
    pub devmajor: u32,
    /// Minor number of the device holding the file
    pub devminor: u32,
    /// Major number of a device special file
    pub rdevmajor: u32,
    /// Minor number of a device special file
    pub rdevminor: u32,
    pub namesize: u32,
    /// Always zero for newc, only used by the crc variant
    pub check: u32,
}

impl Header {
    /// Decode exactly [`HEADER_SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() != HEADER_SIZE {
            return Err(FormatError::HeaderLength(bytes.len()).into());
        }
        let (_, raw) = NewcHeader::from_bytes((bytes, 0))?;
        let header = Self::try_from(&raw)?;
        log::trace!("decoded header: {header:x?}");
        Ok(header)
    }

    /// Encode into [`HEADER_SIZE`] bytes, digits are lowercase
    pub fn encode(&self) -> Result<Vec<u8>, ArchiveError> {
        let bytes = NewcHeader::from(self).to_bytes()?;
        Ok(bytes)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    /// Permission bits of `mode`
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Bytes between the end of the name and the payload
    pub fn name_pad(&self) -> u64 {
        pad_to_4(HEADER_SIZE as u64 + u64::from(self.namesize))
    }

    /// Bytes between the end of the payload and the next header
    pub fn data_pad(&self) -> u64 {
        pad_to_4(u64::from(self.filesize))
    }
}

/// Wire layout of a newc header, the name follows it in the stream
#[derive(DekuWrite, DekuRead, Debug)]
pub struct NewcHeader {
    magic: [u8; 6],
    ino: Hex,
    mode: Hex,
    uid: Hex,
    gid: Hex,
    nlink: Hex,
    mtime: Hex,
    filesize: Hex,
    devmajor: Hex,
    devminor: Hex,
    rdevmajor: Hex,
    rdevminor: Hex,
    namesize: Hex,
    check: Hex,
}

impl TryFrom<&NewcHeader> for Header {
    type Error = FormatError;

    fn try_from(raw: &NewcHeader) -> Result<Self, Self::Error> {
        if raw.magic != NEWC_MAGIC {
            return Err(FormatError::BadMagic { found: raw.magic });
        }
        Ok(Self {
            ino: raw.ino.value("ino")?,
            mode: raw.mode.value("mode")?,
            uid: raw.uid.value("uid")?,
            gid: raw.gid.value("gid")?,
            nlink: raw.nlink.value("nlink")?,
            mtime: raw.mtime.value("mtime")?,
            filesize: raw.filesize.value("filesize")?,
            devmajor: raw.devmajor.value("devmajor")?,
            devminor: raw.devminor.value("devminor")?,
            rdevmajor: raw.rdevmajor.value("rdevmajor")?,
            rdevminor: raw.rdevminor.value("rdevminor")?,
            namesize: raw.namesize.value("namesize")?,
            check: raw.check.value("check")?,
        })
    }
}

impl From<&Header> for NewcHeader {
    fn from(header: &Header) -> Self {
        Self {
            magic: NEWC_MAGIC,
            ino: Hex::new(header.ino),
            mode: Hex::new(header.mode),
            uid: Hex::new(header.uid),
            gid: Hex::new(header.gid),
            nlink: Hex::new(header.nlink),
            mtime: Hex::new(header.mtime),
            filesize: Hex::new(header.filesize),
            devmajor: Hex::new(header.devmajor),
            devminor: Hex::new(header.devminor),
            rdevmajor: Hex::new(header.rdevmajor),
            rdevminor: Hex::new(header.rdevminor),
            namesize: Hex::new(header.namesize),
            check: Hex::new(header.check),
        }
    }
}

/// pad out to a multiple of 4 bytes
pub fn pad_to_4(len: u64) -> u64 {
    match len % 4 {
        0 => 0,
        x => 4 - x,
    }
}

/// round `len` up to the next multiple of 4
pub fn align_to_4(len: u64) -> u64 {
    len + pad_to_4(len)
}

/// One raw header field, kept as text until the header is validated
#[derive(DekuWrite, DekuRead, Debug, Copy, Clone, PartialEq, Eq)]
struct Hex([u8; FIELD_WIDTH]);

impl Hex {
    const DIGITS: &'static [u8; 16] = b"0123456789abcdef";

    // 0x008b2874 -> "008b2874"
    fn new(value: u32) -> Self {
        let mut text = [b'0'; FIELD_WIDTH];
        for (i, digit) in text.iter_mut().enumerate() {
            let shift = (FIELD_WIDTH - 1 - i) * 4;
            *digit = Self::DIGITS[((value >> shift) & 0xf) as usize];
        }
        Self(text)
    }

    // from_str_radix alone would also take a leading '+'
    fn value(&self, field: &'static str) -> Result<u32, FormatError> {
        let invalid =
            || FormatError::InvalidField { field, text: String::from_utf8_lossy(&self.0).into() };
        if !self.0.iter().all(u8::is_ascii_hexdigit) {
            return Err(invalid());
        }
        let s = core::str::from_utf8(&self.0).map_err(|_| invalid())?;
        u32::from_str_radix(s, 16).map_err(|_| invalid())
    }
}

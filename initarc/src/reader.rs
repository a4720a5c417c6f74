use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{ArchiveError, FormatError};
use crate::mode::{FileType, ModeString};
use crate::newc::{HEADER_SIZE, Header, align_to_4, pad_to_4};
use crate::read_seek::{ReadSeek, ReaderWithOffset};
use crate::{TRAILER, normalize};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Active,
    /// `TRAILER!!!` was read
    Finished,
    /// A read failed, no resynchronization is attempted
    Failed,
}

/// Sequential reader of newc records
///
/// Each [`Record`] borrows the reader, and its payload is only read when the caller
/// reads from [`Record::data`]. The next call to [`RecordReader::read_record`] seeks
/// past the payload and its padding whether or not it was read.
///
/// ```rust, no_run
/// # use std::fs::File;
/// # use std::io::BufReader;
/// # use initarc::RecordReader;
/// let file = BufReader::new(File::open("initramfs.cpio").unwrap());
/// let mut reader = RecordReader::new(file);
/// while let Some(record) = reader.read_record().unwrap() {
///     println!("{} {}", record.name(), record.header.filesize);
/// }
/// ```
#[derive(Debug)]
pub struct RecordReader<R: ReadSeek> {
    io: R,
    /// Offset of the next header
    next: u64,
    state: State,
}

impl<R: ReadSeek> RecordReader<R> {
    /// Read an archive starting at offset 0 of `io`
    pub fn new(io: R) -> Self {
        Self { io, next: 0, state: State::Active }
    }

    /// Read an archive starting at `offset` of `io`, record offsets are relative to it
    pub fn with_offset(
        io: R,
        offset: u64,
    ) -> Result<RecordReader<ReaderWithOffset<R>>, ArchiveError> {
        let io = ReaderWithOffset::new(io, offset)?;
        Ok(RecordReader::new(io))
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` once the `TRAILER!!!` record is read, and on every call after.
    /// End of input before the trailer is [`ArchiveError::Truncated`]. After any
    /// error the reader only returns [`ArchiveError::Unusable`].
    pub fn read_record(&mut self) -> Result<Option<Record<'_, R>>, ArchiveError> {
        match self.state {
            State::Finished => return Ok(None),
            State::Failed => return Err(ArchiveError::Unusable),
            State::Active => (),
        }

        let (offset, header, name) = match self.read_header_and_name() {
            Ok(parsed) => parsed,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };

        if name == TRAILER {
            log::debug!("trailer at {offset:#x}");
            self.state = State::Finished;
            return Ok(None);
        }

        let data_offset = offset + align_to_4(HEADER_SIZE as u64 + u64::from(header.namesize));
        let filesize = u64::from(header.filesize);
        self.next = data_offset + align_to_4(filesize);
        log::trace!("{name:?}: data at {data_offset:#x}, next header at {:#x}", self.next);

        Ok(Some(Record {
            header,
            name,
            offset,
            data_offset,
            data: Data { inner: (&mut self.io).take(filesize), len: filesize },
        }))
    }

    /// Header and name of the record at `self.next`, leaves `io` at the payload
    fn read_header_and_name(&mut self) -> Result<(u64, Header, String), ArchiveError> {
        let offset = self.next;
        self.seek_to(offset)?;

        let mut buf = [0; HEADER_SIZE];
        if let Err(e) = self.io.read_exact(&mut buf) {
            return Err(self.short_read(e));
        }
        let header = Header::decode(&buf)?;

        if header.namesize == 0 {
            return Err(FormatError::EmptyName.into());
        }
        let namesize = u64::from(header.namesize);
        let name_offset = offset + HEADER_SIZE as u64;

        // take() so a corrupt namesize can't allocate past the end of the input
        let mut name = Vec::new();
        (&mut self.io).take(namesize).read_to_end(&mut name)?;
        if name.len() as u64 != namesize {
            return Err(ArchiveError::Truncated { offset: name_offset + name.len() as u64 });
        }
        let name = decode_name(name)?;

        // stream is at the end of the name
        self.io.seek_relative(pad_to_4(HEADER_SIZE as u64 + namesize) as i64)?;
        Ok((offset, header, name))
    }

    /// Seek forward with `seek_relative`, which a `BufReader` serves from its buffer
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        let pos = self.io.stream_position()?;
        match offset.checked_sub(pos).map(i64::try_from) {
            Some(Ok(0)) => Ok(()),
            Some(Ok(delta)) => self.io.seek_relative(delta),
            _ => self.io.seek(SeekFrom::Start(offset)).map(|_| ()),
        }
    }

    /// Short read of a header, which may begin past the end of the input when
    /// the last payload was cut off
    fn short_read(&mut self, err: io::Error) -> ArchiveError {
        if err.kind() != io::ErrorKind::UnexpectedEof {
            return ArchiveError::StdIo(err);
        }
        match self.io.seek(SeekFrom::End(0)) {
            Ok(end) => ArchiveError::Truncated { offset: end },
            Err(e) => ArchiveError::StdIo(e),
        }
    }

    /// Call `f` with every record before the trailer
    pub fn for_each_record<F>(&mut self, mut f: F) -> Result<(), ArchiveError>
    where
        F: FnMut(Record<'_, R>) -> Result<(), ArchiveError>,
    {
        while let Some(record) = self.read_record()? {
            f(record)?;
        }
        Ok(())
    }

    /// Read every remaining record, payloads included
    pub fn read_all(&mut self) -> Result<Vec<StaticRecord>, ArchiveError> {
        let mut records = vec![];
        self.for_each_record(|record| {
            records.push(record.into_static()?);
            Ok(())
        })?;
        Ok(records)
    }

    /// First remaining record with the same normalized name as `name`
    pub fn find(&mut self, name: &str) -> Result<Option<StaticRecord>, ArchiveError> {
        let name = normalize(name);
        while let Some(record) = self.read_record()? {
            if normalize(record.name()) == name {
                return record.into_static().map(Some);
            }
        }
        Ok(None)
    }
}

fn decode_name(mut bytes: Vec<u8>) -> Result<String, FormatError> {
    if bytes.pop() != Some(0) {
        return Err(FormatError::UnterminatedName);
    }
    if bytes.contains(&0) {
        return Err(FormatError::InvalidName(bytes));
    }
    String::from_utf8(bytes).map_err(|e| FormatError::InvalidName(e.into_bytes()))
}

/// One record of a newc archive
///
/// Only valid until the next record is read from the same [`RecordReader`].
#[derive(Debug)]
pub struct Record<'a, R: ReadSeek> {
    pub header: Header,
    name: String,
    offset: u64,
    data_offset: u64,
    data: Data<'a, R>,
}

impl<'a, R: ReadSeek> Record<'a, R> {
    /// Name without the trailing NUL
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the header from the start of the archive
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset of the payload from the start of the archive
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.header.file_type()
    }

    /// Payload, bounded to `filesize` bytes
    pub fn data(&mut self) -> &mut Data<'a, R> {
        &mut self.data
    }

    /// Copy the unread part of the payload into `writer`
    pub fn copy_data<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64, ArchiveError> {
        let copied = io::copy(&mut self.data, writer)?;
        self.data.check_complete(self.data_offset)?;
        Ok(copied)
    }

    /// Read the unread part of the payload into memory
    pub fn read_data(&mut self) -> Result<Vec<u8>, ArchiveError> {
        let mut buf = vec![];
        self.copy_data(&mut buf)?;
        Ok(buf)
    }

    pub fn into_static(mut self) -> Result<StaticRecord, ArchiveError> {
        let data = self.read_data()?;
        Ok(StaticRecord { header: self.header, name: self.name, data })
    }
}

/// Lazy reader over the payload of a [`Record`]
#[derive(Debug)]
pub struct Data<'a, R: ReadSeek> {
    inner: io::Take<&'a mut R>,
    len: u64,
}

impl<R: ReadSeek> Data<'_, R> {
    /// Length of the whole payload
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }

    fn check_complete(&self, data_offset: u64) -> Result<(), ArchiveError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => {
                Err(ArchiveError::Truncated { offset: data_offset + self.len - remaining })
            }
        }
    }
}

impl<R: ReadSeek> Read for Data<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// A record with its payload read into memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRecord {
    pub header: Header,
    pub name: String,
    pub data: Vec<u8>,
}

impl StaticRecord {
    pub fn file_type(&self) -> Option<FileType> {
        self.header.file_type()
    }

    /// Target of a symlink record, which is stored as its payload
    pub fn link_target(&self) -> Option<&str> {
        match self.file_type() {
            Some(FileType::Symlink) => core::str::from_utf8(&self.data).ok(),
            _ => None,
        }
    }

    pub fn listing(&self) -> Listing<'_> {
        Listing { header: &self.header, name: &self.name, target: self.link_target() }
    }
}

impl fmt::Display for StaticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.listing().fmt(f)
    }
}

/// `ls -l` style line for a record
#[derive(Debug, Copy, Clone)]
pub struct Listing<'a> {
    pub header: &'a Header,
    pub name: &'a str,
    pub target: Option<&'a str>,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.header;
        write!(f, "{} {:>3} {:>5} {:>5} ", ModeString(h.mode), h.nlink, h.uid, h.gid)?;
        match h.file_type() {
            Some(FileType::Block | FileType::Char) => {
                write!(f, "{:>3}, {:>3}", h.rdevmajor, h.rdevminor)?
            }
            _ => write!(f, "{:>8}", h.filesize)?,
        }
        write!(f, " {:>10} {}", h.mtime, self.name)?;
        if let Some(target) = self.target {
            write!(f, " -> {target}")?;
        }
        Ok(())
    }
}

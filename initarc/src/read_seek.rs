use std::io::{self, Read, Seek, SeekFrom};

/// `Read` + `Seek`
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Archive embedded at `offset` of a larger file, such as an initramfs
/// appended to a kernel image
///
/// All positions are reported relative to `offset`.
#[derive(Debug)]
pub struct ReaderWithOffset<R: ReadSeek> {
    io: R,
    /// Offset from start of file to archive
    offset: u64,
}

impl<R: ReadSeek> ReaderWithOffset<R> {
    pub fn new(mut io: R, offset: u64) -> io::Result<Self> {
        io.seek(SeekFrom::Start(offset))?;
        Ok(Self { io, offset })
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    fn relative(&self, absolute: u64) -> io::Result<u64> {
        absolute.checked_sub(self.offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of archive")
        })
    }
}

impl<R: ReadSeek> Read for ReaderWithOffset<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }
}

impl<R: ReadSeek> Seek for ReaderWithOffset<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let seek = match pos {
            SeekFrom::Start(start) => SeekFrom::Start(self.offset + start),
            seek => seek,
        };
        let absolute = self.io.seek(seek)?;
        self.relative(absolute)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        let absolute = self.io.stream_position()?;
        self.relative(absolute)
    }

    fn seek_relative(&mut self, offset: i64) -> io::Result<()> {
        self.io.seek_relative(offset)
    }
}

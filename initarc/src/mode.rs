//! POSIX `st_mode` bits as stored in newc headers and VTOC entries

use std::fmt;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

pub const S_ISUID: u32 = 0o4000;
pub const S_ISGID: u32 = 0o2000;
pub const S_ISVTX: u32 = 0o1000;

/// Permission bits, including setuid, setgid and sticky
pub const PERM_MASK: u32 = 0o7777;

/// Type of an archive member, taken from the `S_IFMT` bits of its mode
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Socket,
    Symlink,
    Regular,
    Block,
    Directory,
    Char,
    Fifo,
}

impl FileType {
    /// `None` if the type bits match no known file type
    pub fn from_mode(mode: u32) -> Option<Self> {
        let file_type = match mode & S_IFMT {
            S_IFSOCK => Self::Socket,
            S_IFLNK => Self::Symlink,
            S_IFREG => Self::Regular,
            S_IFBLK => Self::Block,
            S_IFDIR => Self::Directory,
            S_IFCHR => Self::Char,
            S_IFIFO => Self::Fifo,
            _ => return None,
        };
        Some(file_type)
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Socket => S_IFSOCK,
            Self::Symlink => S_IFLNK,
            Self::Regular => S_IFREG,
            Self::Block => S_IFBLK,
            Self::Directory => S_IFDIR,
            Self::Char => S_IFCHR,
            Self::Fifo => S_IFIFO,
        }
    }

    /// Leading character used by `ls -l`
    pub fn as_char(self) -> char {
        match self {
            Self::Socket => 's',
            Self::Symlink => 'l',
            Self::Regular => '-',
            Self::Block => 'b',
            Self::Directory => 'd',
            Self::Char => 'c',
            Self::Fifo => 'p',
        }
    }
}

/// Display a mode the way `ls -l` does, `drwxr-xr-x`
pub struct ModeString(pub u32);

impl fmt::Display for ModeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = self.0;
        let kind = FileType::from_mode(mode).map_or('?', FileType::as_char);
        write!(f, "{kind}")?;

        // (shift, special bit, special char when executable, when not)
        let triads = [(6, S_ISUID, 's', 'S'), (3, S_ISGID, 's', 'S'), (0, S_ISVTX, 't', 'T')];
        for (shift, special, set_x, set_no_x) in triads {
            let bits = (mode >> shift) & 0o7;
            let r = if bits & 0o4 != 0 { 'r' } else { '-' };
            let w = if bits & 0o2 != 0 { 'w' } else { '-' };
            let x = match (bits & 0o1 != 0, mode & special != 0) {
                (true, true) => set_x,
                (false, true) => set_no_x,
                (true, false) => 'x',
                (false, false) => '-',
            };
            write!(f, "{r}{w}{x}")?;
        }
        Ok(())
    }
}

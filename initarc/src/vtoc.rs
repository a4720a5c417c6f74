//! Archive with a JSON table of contents ("VTOC") in front of the file contents
//!
//! ```text
//! 0000004a\n          7 hex digits of JSON length, then a newline
//! [{"Name":...},...]  the entries
//! ....                contents of every regular file, in table order
//! ```

use std::fmt;
use std::fs::{self, File, Permissions};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{ArchiveError, FormatError};
use crate::extract::{self, ErrorPolicy, ExtractReport, Outcome};
use crate::mode::{FileType, ModeString, PERM_MASK};

/// Length prefix including the newline
pub const PREFIX_SIZE: usize = 8;
/// Largest JSON length 7 hex digits can hold
const MAX_VTOC_LEN: usize = 0x0fff_ffff;

/// Metadata of one path in the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    /// Path without the leading `/`
    pub name: String,
    /// POSIX mode, type and permission bits
    pub mode: u32,
    /// Seconds since the epoch
    pub mod_time: i64,
    pub is_dir: bool,
    pub uid: u32,
    pub gid: u32,
    /// Regular files only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Symlinks only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Block and char devices only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<u64>,
}

impl Entry {
    /// Entry for `path`, which is not followed if it is a symlink
    pub fn from_path(path: &Path) -> Result<Self, ArchiveError> {
        let metadata = fs::symlink_metadata(path)?;
        let name = path
            .to_str()
            .ok_or_else(|| FormatError::InvalidName(path.as_os_str().as_encoded_bytes().to_vec()))?;

        let mut entry = Self {
            name: name.trim_start_matches('/').to_string(),
            mode: metadata.mode(),
            mod_time: metadata.mtime(),
            is_dir: metadata.is_dir(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: None,
            link: None,
            dev: None,
        };
        match entry.file_type() {
            Some(FileType::Regular) => entry.size = Some(metadata.len()),
            Some(FileType::Symlink) => {
                let target = fs::read_link(path)?;
                let target = target.into_os_string().into_string().map_err(|target| {
                    FormatError::InvalidName(target.as_encoded_bytes().to_vec())
                })?;
                entry.link = Some(target);
            }
            Some(FileType::Block | FileType::Char) => entry.dev = Some(metadata.rdev()),
            _ => (),
        }
        Ok(entry)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    /// Permission bits of `mode`, including setuid, setgid and sticky
    pub fn permissions(&self) -> Permissions {
        Permissions::from_mode(self.mode & PERM_MASK)
    }

    /// Bytes this entry owns in the data section
    pub fn data_len(&self) -> u64 {
        match self.file_type() {
            Some(FileType::Regular) => self.size.unwrap_or(0),
            _ => 0,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} {:>5} {:>8} {:>10} {}",
            ModeString(self.mode),
            self.uid,
            self.gid,
            self.data_len(),
            self.mod_time,
            self.name
        )?;
        if let Some(link) = &self.link {
            write!(f, " -> {link}")?;
        }
        Ok(())
    }
}

/// One entry for every path below each of `dirs`, the directories included
///
/// Symlinks are not followed. Entries of a directory are sorted by file name.
pub fn build_vtoc<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<Entry>, ArchiveError> {
    let mut entries = vec![];
    for dir in dirs {
        for dent in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let dent = dent.map_err(io::Error::from)?;
            let entry = Entry::from_path(dent.path())?;
            log::trace!("{entry}");
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Write the length prefix and the JSON of `entries`, returns bytes written
pub fn write_vtoc<W: Write + ?Sized>(
    writer: &mut W,
    entries: &[Entry],
) -> Result<usize, ArchiveError> {
    let json = serde_json::to_vec(entries)?;
    if json.len() > MAX_VTOC_LEN {
        return Err(FormatError::VtocTooLarge(json.len()).into());
    }
    let prefix = format!("{:07x}\n", json.len());
    writer.write_all(prefix.as_bytes())?;
    writer.write_all(&json)?;
    log::debug!("wrote vtoc of {} entries, {} bytes", entries.len(), json.len());

    Ok(prefix.len() + json.len())
}

fn parse_prefix(prefix: &[u8; PREFIX_SIZE]) -> Result<usize, FormatError> {
    let invalid = || FormatError::InvalidVtocLength(String::from_utf8_lossy(prefix).into());
    let (digits, newline) = prefix.split_at(PREFIX_SIZE - 1);
    if newline != b"\n" || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let digits = core::str::from_utf8(digits).map_err(|_| invalid())?;
    usize::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// Read the length prefix and the entries, leaves `reader` at the first file contents
pub fn read_vtoc<Rd: Read + ?Sized>(reader: &mut Rd) -> Result<Vec<Entry>, ArchiveError> {
    let mut prefix = [0; PREFIX_SIZE];
    reader.read_exact(&mut prefix).map_err(|e| ArchiveError::from_read(e, 0))?;
    let len = parse_prefix(&prefix)?;

    let mut json = vec![];
    reader.take(len as u64).read_to_end(&mut json)?;
    if json.len() != len {
        return Err(ArchiveError::Truncated { offset: (PREFIX_SIZE + json.len()) as u64 });
    }
    let entries = serde_json::from_slice(&json)?;
    Ok(entries)
}

/// Open `path` and read its VTOC, the file is left at the first file contents
pub fn load_vtoc<P: AsRef<Path>>(path: P) -> Result<(File, Vec<Entry>), ArchiveError> {
    let mut file = File::open(path)?;
    let entries = read_vtoc(&mut file)?;
    Ok((file, entries))
}

/// Write the VTOC followed by the contents of every regular file, read from
/// `root.join(entry.name)`
pub fn write_archive<W: Write + ?Sized>(
    writer: &mut W,
    root: &Path,
    entries: &[Entry],
) -> Result<u64, ArchiveError> {
    let mut written = write_vtoc(writer, entries)? as u64;
    for entry in entries.iter().filter(|e| e.file_type() == Some(FileType::Regular)) {
        let size = entry.data_len();
        let mut file = File::open(root.join(&entry.name))?;
        extract::copy_exact(&entry.name, &mut file, size, writer)?;
        written += size;
    }
    Ok(written)
}

fn skip<Rd: Read + ?Sized>(reader: &mut Rd, len: u64) -> io::Result<()> {
    io::copy(&mut reader.take(len), &mut io::sink())?;
    Ok(())
}

/// Create `entry` below `dest`, reading regular file contents from `reader`
///
/// `reader` is always advanced past the contents of `entry`, even when it can't be
/// created, so following entries can still be read. A directory keeps owner write
/// access, [`extract_archive`] sets its final mode after the last entry.
pub fn materialize_entry<Rd: Read + ?Sized>(
    entry: &Entry,
    reader: &mut Rd,
    dest: &Path,
) -> Result<Outcome, ArchiveError> {
    let len = entry.data_len();
    let path = match extract::safe_join(dest, &entry.name) {
        Ok(path) => path,
        Err(e) => {
            skip(reader, len)?;
            if let ArchiveError::UnsafePath(_) = e {
                log::warn!("skipping {:?}: {e}", entry.name);
                return Ok(Outcome::Skipped);
            }
            return Err(e);
        }
    };
    let perm = entry.permissions();

    match entry.file_type() {
        Some(FileType::Directory) => {
            extract::remove_symlink(&path)?;
            fs::create_dir_all(&path)?;
            fs::set_permissions(&path, Permissions::from_mode(perm.mode() | 0o700))?;
        }
        Some(FileType::Regular) => {
            let created = extract::create_parent(&path)
                .and_then(|()| extract::remove_symlink(&path))
                .and_then(|()| extract::create_file(&path));
            let mut file = match created {
                Ok(file) => file,
                Err(e) => {
                    skip(reader, len)?;
                    return Err(e.into());
                }
            };
            extract::copy_exact(&entry.name, reader, len, &mut file)?;
            fs::set_permissions(&path, perm)?;
        }
        Some(FileType::Symlink) => {
            let target = entry
                .link
                .as_deref()
                .ok_or_else(|| FormatError::MissingLinkTarget(entry.name.clone()))?;
            extract::create_parent(&path)?;
            extract::remove_symlink(&path)?;
            std::os::unix::fs::symlink(target, &path)?;
        }
        _ => {
            return Err(ArchiveError::UnsupportedEntryType {
                name: entry.name.clone(),
                mode: entry.mode,
            });
        }
    }
    Ok(Outcome::Created)
}

/// Create every entry of the archive at `path` below `dest`
///
/// Directory modes are applied once every entry is extracted, so a read-only
/// directory can still be filled.
pub fn extract_archive<P: AsRef<Path>>(
    path: P,
    dest: &Path,
    policy: ErrorPolicy,
) -> Result<ExtractReport, ArchiveError> {
    let (file, entries) = load_vtoc(path)?;
    let mut reader = BufReader::new(file);
    fs::create_dir_all(dest)?;

    let mut report = ExtractReport::default();
    let mut dirs = vec![];
    for entry in &entries {
        log::info!("extracting: {:?}", entry.name);
        let result = materialize_entry(entry, &mut reader, dest);
        if matches!(result, Ok(Outcome::Created)) && entry.file_type() == Some(FileType::Directory) {
            dirs.push(entry);
        }
        report.add(policy, &entry.name, result)?;
    }

    for entry in dirs.iter().rev() {
        let Ok(path) = extract::safe_join(dest, &entry.name) else { continue };
        fs::set_permissions(&path, entry.permissions())?;
    }
    Ok(report)
}

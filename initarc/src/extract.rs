//! Create archive members on the local filesystem

use std::ffi::OsStr;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use crate::error::ArchiveError;
use crate::mode::{FileType, PERM_MASK};
use crate::newc::Header;
use crate::normalize;
use crate::read_seek::ReadSeek;
use crate::reader::{Record, RecordReader};

/// What to do when one member can't be created
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop and return the first error
    #[default]
    Abort,
    /// Log the error, remember it in [`ExtractReport::failures`] and keep going
    Continue,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    /// Not created, the name escapes the extraction root or the device node
    /// needs privileges
    Skipped,
}

/// Summary of an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub created: usize,
    pub skipped: usize,
    pub failures: Vec<(String, ArchiveError)>,
}

impl ExtractReport {
    pub(crate) fn add(
        &mut self,
        policy: ErrorPolicy,
        name: &str,
        result: Result<Outcome, ArchiveError>,
    ) -> Result<(), ArchiveError> {
        match result {
            Ok(Outcome::Created) => self.created += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Err(e) if policy == ErrorPolicy::Continue => {
                log::error!("{name}: {e}");
                self.failures.push((name.to_string(), e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Join `name` onto `root`, refusing names that climb out of it
///
/// Besides `..`, a name is refused when one of its existing parent directories
/// below `root` is a symlink, since creating through it could land anywhere. The
/// last component is not checked, a symlink there is replaced by the member.
pub fn safe_join(root: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    let name = normalize(name);
    if name == ".." || name.starts_with("../") {
        return Err(ArchiveError::UnsafePath(name));
    }
    if name == "." {
        return Ok(root.to_path_buf());
    }

    let path = root.join(&name);
    let mut parent = root.to_path_buf();
    let components: Vec<_> = Path::new(&name).components().collect();
    for component in &components[..components.len().saturating_sub(1)] {
        let Component::Normal(part) = component else {
            return Err(ArchiveError::UnsafePath(name));
        };
        parent.push(part);
        match fs::symlink_metadata(&parent) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(ArchiveError::UnsafePath(name));
            }
            Ok(_) => (),
            // nothing below a missing directory exists yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(path)
}

/// Remove `path` if it is a symlink, so the new member replaces the link instead
/// of being created at its target
pub(crate) fn remove_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}

/// Create or truncate the regular file `path`, never through a symlink
pub(crate) fn create_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
}

/// Create the parent directories of `path` that don't exist yet
///
/// Archives often only list the files, so missing directories get `0o755`.
pub(crate) fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            DirBuilder::new().recursive(true).mode(0o755).create(dir)
        }
        _ => Ok(()),
    }
}

/// Copy exactly `size` bytes from `reader` to `writer`
pub(crate) fn copy_exact<Rd: Read + ?Sized, W: Write + ?Sized>(
    name: &str,
    reader: &mut Rd,
    size: u64,
    writer: &mut W,
) -> Result<(), ArchiveError> {
    let copied = io::copy(&mut reader.take(size), writer)?;
    if copied != size {
        return Err(ArchiveError::SizeMismatch { name: name.to_string(), expected: size, actual: copied });
    }
    Ok(())
}

/// Set permissions, then owner, then the full mode
///
/// chown clears setuid and setgid, so the special bits are set last.
pub(crate) fn set_modes(path: &Path, mode: u32, uid: u32, gid: u32) -> io::Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode & 0o777))?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
    fs::set_permissions(path, Permissions::from_mode(mode & PERM_MASK))
}

#[cfg(target_os = "linux")]
fn mknod(path: &Path, mode: u32, major: u32, minor: u32) -> io::Result<()> {
    use std::ffi::CString;

    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `path` is NUL terminated and outlives the call
    let ret = unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, libc::makedev(major, minor)) };
    if ret == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(target_os = "linux"))]
fn mknod(_path: &Path, _mode: u32, _major: u32, _minor: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "device nodes are only created on linux"))
}

/// Create `record` below `root`
///
/// Ownership, permissions and device nodes usually need privileges, failing to set
/// them is only an error if `force_priv` is set. Names escaping `root`, directly or
/// through a symlink, are logged and skipped. Directories keep owner write access,
/// [`unpack`] sets their final mode.
pub fn create_in_root<R: ReadSeek>(
    record: &mut Record<'_, R>,
    root: &Path,
    force_priv: bool,
) -> Result<Outcome, ArchiveError> {
    let header = record.header;
    let name = record.name().to_string();
    let unsupported = || ArchiveError::UnsupportedEntryType { name: name.clone(), mode: header.mode };
    let Some(file_type) = header.file_type() else {
        return Err(unsupported());
    };

    let path = match safe_join(root, &name) {
        Ok(path) => path,
        Err(e @ ArchiveError::UnsafePath(_)) => {
            log::warn!("skipping {name:?}: {e}");
            return Ok(Outcome::Skipped);
        }
        Err(e) => return Err(e),
    };
    create_parent(&path)?;
    remove_symlink(&path)?;

    match file_type {
        FileType::Socket | FileType::Fifo => return Err(unsupported()),
        FileType::Symlink => {
            let target = record.read_data()?;
            std::os::unix::fs::symlink(OsStr::from_bytes(&target), &path)?;
            if let Err(e) = std::os::unix::fs::lchown(&path, Some(header.uid), Some(header.gid)) {
                if force_priv {
                    return Err(e.into());
                }
                log::debug!("{}: {e}", path.display());
            }
            return Ok(Outcome::Created);
        }
        FileType::Regular => {
            let mut file = create_file(&path)?;
            record.copy_data(&mut file)?;
        }
        FileType::Directory => {
            fs::create_dir_all(&path)?;
            // owner keeps write access until unpack applies the final mode
            let mode = header.mode | 0o700;
            return apply_modes(&path, mode, header.uid, header.gid, force_priv);
        }
        FileType::Block | FileType::Char => {
            let mode = header.perm() | file_type.bits();
            if let Err(e) = mknod(&path, mode, header.rdevmajor, header.rdevminor) {
                if force_priv {
                    return Err(e.into());
                }
                log::warn!("{}: could not create device: {e}", path.display());
                return Ok(Outcome::Skipped);
            }
        }
    }

    apply_modes(&path, header.mode, header.uid, header.gid, force_priv)
}

fn apply_modes(
    path: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
    force_priv: bool,
) -> Result<Outcome, ArchiveError> {
    if let Err(e) = set_modes(path, mode, uid, gid) {
        if force_priv {
            return Err(e.into());
        }
        log::debug!("{}: {e}", path.display());
    }
    Ok(Outcome::Created)
}

/// Create every record of `reader` below `root`
///
/// Directory modes are applied once every record is extracted, so a read-only
/// directory can still be filled.
pub fn unpack<R: ReadSeek>(
    reader: &mut RecordReader<R>,
    root: &Path,
    force_priv: bool,
    policy: ErrorPolicy,
) -> Result<ExtractReport, ArchiveError> {
    let mut report = ExtractReport::default();
    let mut dirs: Vec<(String, Header)> = vec![];
    reader.for_each_record(|mut record| {
        log::info!("extracting: {:?}", record.name());
        let result = create_in_root(&mut record, root, force_priv);
        if matches!(result, Ok(Outcome::Created)) && record.file_type() == Some(FileType::Directory)
        {
            dirs.push((record.name().to_string(), record.header));
        }
        report.add(policy, record.name(), result)
    })?;

    for (name, header) in dirs.iter().rev() {
        let Ok(path) = safe_join(root, name) else { continue };
        apply_modes(&path, header.mode, header.uid, header.gid, force_priv)?;
    }
    Ok(report)
}

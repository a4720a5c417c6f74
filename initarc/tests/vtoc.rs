use std::fs::{self, File};
use std::io::{Read, Seek};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;

use initarc::extract::{ErrorPolicy, Outcome};
use initarc::mode::{S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG};
use initarc::vtoc::{self, Entry, PREFIX_SIZE};
use initarc::{ArchiveError, FileType};

fn populate(root: &Path) {
    fs::create_dir_all(root.join("tree/etc")).unwrap();
    fs::write(root.join("tree/etc/hostname"), "box\n").unwrap();
    fs::write(root.join("tree/etc/motd"), "welcome\n").unwrap();
    fs::set_permissions(root.join("tree/etc/motd"), fs::Permissions::from_mode(0o600)).unwrap();
    fs::create_dir_all(root.join("tree/bin")).unwrap();
    fs::write(root.join("tree/bin/busybox"), vec![0x7f; 1000]).unwrap();
    symlink("busybox", root.join("tree/bin/sh")).unwrap();
}

fn entry(name: &str, mode: u32, size: Option<u64>) -> Entry {
    Entry {
        name: name.to_string(),
        mode,
        mod_time: 0,
        is_dir: mode & S_IFDIR == S_IFDIR,
        uid: 0,
        gid: 0,
        size,
        link: None,
        dev: None,
    }
}

#[test_log::test]
fn test_build_vtoc() {
    let tmpdir = tempfile::tempdir().unwrap();
    populate(tmpdir.path());
    let tree = tmpdir.path().join("tree");

    let entries = vtoc::build_vtoc(&[&tree]).unwrap();
    let prefix = tree.to_str().unwrap().trim_start_matches('/');
    let names: Vec<_> = entries.iter().map(|e| e.name.strip_prefix(prefix).unwrap()).collect();
    assert_eq!(names, ["", "/bin", "/bin/busybox", "/bin/sh", "/etc", "/etc/hostname", "/etc/motd"]);

    assert!(entries.iter().all(|e| !e.name.starts_with('/')));
    assert!(entries[0].is_dir);
    assert_eq!(entries[0].file_type(), Some(FileType::Directory));
    assert_eq!(entries[2].size, Some(1000));
    assert_eq!(entries[3].file_type(), Some(FileType::Symlink));
    assert_eq!(entries[3].link.as_deref(), Some("busybox"));
    assert_eq!(entries[3].size, None);
    assert_eq!(entries[6].mode & 0o777, 0o600);
}

#[test_log::test]
fn test_write_then_load() {
    let tmpdir = tempfile::tempdir().unwrap();
    populate(tmpdir.path());
    let entries = vtoc::build_vtoc(&[tmpdir.path().join("tree")]).unwrap();

    let path = tmpdir.path().join("out.vtoc");
    let mut out = File::create(&path).unwrap();
    let written = vtoc::write_archive(&mut out, Path::new("/"), &entries).unwrap();
    drop(out);
    assert_eq!(written, fs::metadata(&path).unwrap().len());

    let mut raw = vec![];
    File::open(&path).unwrap().read_to_end(&mut raw).unwrap();
    let len = usize::from_str_radix(std::str::from_utf8(&raw[..PREFIX_SIZE - 1]).unwrap(), 16)
        .unwrap();
    let json_end = PREFIX_SIZE + len;
    assert_eq!(raw[json_end - 1], b']');

    let (mut file, loaded) = vtoc::load_vtoc(&path).unwrap();
    assert_eq!(loaded, entries);
    assert_eq!(file.stream_position().unwrap(), json_end as u64);

    // contents follow in table order: busybox, hostname, motd
    let mut data = vec![];
    file.read_to_end(&mut data).unwrap();
    assert_eq!(data.len(), 1000 + 4 + 8);
    assert_eq!(&data[1000..], b"box\nwelcome\n");
}

#[test_log::test]
fn test_extract_archive() {
    let tmpdir = tempfile::tempdir().unwrap();
    populate(tmpdir.path());
    let entries = vtoc::build_vtoc(&[tmpdir.path().join("tree")]).unwrap();
    let path = tmpdir.path().join("out.vtoc");
    vtoc::write_archive(&mut File::create(&path).unwrap(), Path::new("/"), &entries).unwrap();

    let dest = tmpdir.path().join("dest");
    let report = vtoc::extract_archive(&path, &dest, ErrorPolicy::Abort).unwrap();
    assert_eq!(report.created, entries.len());
    assert!(report.is_success());

    let tree = dest.join(tmpdir.path().join("tree").strip_prefix("/").unwrap());
    assert_eq!(fs::read(tree.join("etc/hostname")).unwrap(), b"box\n");
    assert_eq!(fs::read(tree.join("bin/busybox")).unwrap(), vec![0x7f; 1000]);
    assert_eq!(fs::read_link(tree.join("bin/sh")).unwrap().to_str(), Some("busybox"));
    let mode = fs::metadata(tree.join("etc/motd")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test_log::test]
fn test_unsupported_entry_keeps_stream_in_sync() {
    let tmpdir = tempfile::tempdir().unwrap();
    fs::write(tmpdir.path().join("a"), "aaaa").unwrap();
    fs::write(tmpdir.path().join("b"), "bb").unwrap();

    let entries = vec![
        entry("a", S_IFREG | 0o644, Some(4)),
        entry("fifo", S_IFIFO | 0o644, None),
        entry("b", S_IFREG | 0o644, Some(2)),
    ];
    let path = tmpdir.path().join("out.vtoc");
    vtoc::write_archive(&mut File::create(&path).unwrap(), tmpdir.path(), &entries).unwrap();

    let dest = tmpdir.path().join("abort");
    let err = vtoc::extract_archive(&path, &dest, ErrorPolicy::Abort).unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedEntryType { ref name, .. } if name == "fifo"));
    assert!(dest.join("a").exists());
    assert!(!dest.join("b").exists());

    let dest = tmpdir.path().join("continue");
    let report = vtoc::extract_archive(&path, &dest, ErrorPolicy::Continue).unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(fs::read(dest.join("b")).unwrap(), b"bb");
}

#[test_log::test]
fn test_escaping_entry_is_skipped() {
    let tmpdir = tempfile::tempdir().unwrap();

    let mut archive = vec![];
    let entries =
        vec![entry("../evil", S_IFREG | 0o644, Some(4)), entry("good", S_IFREG | 0o644, Some(4))];
    vtoc::write_vtoc(&mut archive, &entries).unwrap();
    archive.extend(b"evilgood");

    let dest = tmpdir.path().join("dest");
    fs::create_dir(&dest).unwrap();
    let mut reader = &archive[..];
    let loaded = vtoc::read_vtoc(&mut reader).unwrap();
    let outcome = vtoc::materialize_entry(&loaded[0], &mut reader, &dest).unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    let outcome = vtoc::materialize_entry(&loaded[1], &mut reader, &dest).unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(fs::read(dest.join("good")).unwrap(), b"good");
}

#[test_log::test]
fn test_short_contents() {
    let tmpdir = tempfile::tempdir().unwrap();
    let mut archive = vec![];
    let entries = vec![entry("a", S_IFREG | 0o644, Some(10))];
    vtoc::write_vtoc(&mut archive, &entries).unwrap();
    archive.extend(b"short");
    let path = tmpdir.path().join("short.vtoc");
    fs::write(&path, &archive).unwrap();

    let err = vtoc::extract_archive(&path, &tmpdir.path().join("dest"), ErrorPolicy::Abort)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::SizeMismatch { expected: 10, actual: 5, .. }));

    // the file on disk changed size since the vtoc was built
    let mut out = File::create(tmpdir.path().join("other.vtoc")).unwrap();
    fs::write(tmpdir.path().join("a"), "abc").unwrap();
    let err = vtoc::write_archive(&mut out, tmpdir.path(), &entries).unwrap_err();
    assert!(matches!(err, ArchiveError::SizeMismatch { expected: 10, actual: 3, .. }));
}

#[test_log::test]
fn test_extract_does_not_follow_archive_symlinks() {
    let tmpdir = tempfile::tempdir().unwrap();
    let outside = tmpdir.path().join("outside");
    fs::create_dir(&outside).unwrap();

    let link = Entry {
        link: Some(outside.to_str().unwrap().to_string()),
        ..entry("x", S_IFLNK | 0o777, None)
    };
    let entries = vec![
        link,
        entry("x/evil", S_IFREG | 0o644, Some(5)),
        entry("after", S_IFREG | 0o644, Some(2)),
    ];
    let mut archive = vec![];
    vtoc::write_vtoc(&mut archive, &entries).unwrap();
    archive.extend(b"pwnedok");
    let path = tmpdir.path().join("link.vtoc");
    fs::write(&path, &archive).unwrap();

    let dest = tmpdir.path().join("dest");
    let report = vtoc::extract_archive(&path, &dest, ErrorPolicy::Abort).unwrap();
    assert_eq!((report.created, report.skipped), (2, 1));
    assert_eq!(fs::read_dir(&outside).unwrap().count(), 0);
    // skipped contents were consumed
    assert_eq!(fs::read(dest.join("after")).unwrap(), b"ok");
}

#[test_log::test]
fn test_extract_read_only_directory() {
    let tmpdir = tempfile::tempdir().unwrap();
    let entries =
        vec![entry("ro", S_IFDIR | 0o555, None), entry("ro/file", S_IFREG | 0o644, Some(4))];
    let mut archive = vec![];
    vtoc::write_vtoc(&mut archive, &entries).unwrap();
    archive.extend(b"data");
    let path = tmpdir.path().join("ro.vtoc");
    fs::write(&path, &archive).unwrap();

    let dest = tmpdir.path().join("dest");
    let report = vtoc::extract_archive(&path, &dest, ErrorPolicy::Abort).unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(fs::read(dest.join("ro/file")).unwrap(), b"data");
    let mode = fs::metadata(dest.join("ro")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o555);

    fs::set_permissions(dest.join("ro"), fs::Permissions::from_mode(0o755)).unwrap();
}

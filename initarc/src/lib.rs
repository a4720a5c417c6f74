/*!
Reader library for cpio "newc" record streams and VTOC archives, the formats used
to build and unpack initramfs images

### Read a newc archive
```rust, no_run
# use std::fs::File;
# use std::io::BufReader;
# use initarc::RecordReader;
let file = BufReader::new(File::open("initramfs.cpio").unwrap());
let mut reader = RecordReader::new(file);

// payloads are only read when asked for
while let Some(mut record) = reader.read_record().unwrap() {
    if record.name() == "init" {
        let init = record.read_data().unwrap();
        println!("init is {} bytes", init.len());
    }
}
```

### Create a VTOC archive
```rust, no_run
# use std::fs::File;
# use std::path::Path;
# use initarc::vtoc;
let entries = vtoc::build_vtoc(&["/etc"]).unwrap();
let mut out = File::create("etc.vtoc").unwrap();
vtoc::write_archive(&mut out, Path::new("/"), &entries).unwrap();
```
*/

#[cfg(doctest)]
#[doc = include_str!("../../README.md")]
type _ReadmeTest = ();

/// Name of the record marking the end of a newc archive
pub const TRAILER: &str = "TRAILER!!!";

pub mod error;
pub use error::{ArchiveError, FormatError};
pub mod extract;
pub mod mode;
pub use mode::FileType;
pub mod newc;
pub use newc::{HEADER_SIZE, Header, NewcHeader};
mod read_seek;
pub use read_seek::{ReadSeek, ReaderWithOffset};
pub mod reader;
pub use reader::{Data, Listing, Record, RecordReader, StaticRecord};
pub mod vtoc;

/// Make `name` relative to `/` and lexically clean it
///
/// Leading `/`, empty and `.` components are dropped and `..` removes the component
/// before it. `..` that can't be resolved is kept, an empty result is `.`.
pub fn normalize(name: &str) -> String {
    let mut parts: Vec<&str> = vec![];
    for part in name.trim_start_matches('/').split('/') {
        match part {
            "" | "." => (),
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            part => parts.push(part),
        }
    }

    if parts.is_empty() { ".".to_string() } else { parts.join("/") }
}

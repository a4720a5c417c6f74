#![no_main]

use std::io::{self, Cursor};

use initarc::RecordReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: Vec<u8>| {
    let mut reader = RecordReader::new(Cursor::new(data));

    // doesn't crash, and always ends
    while let Ok(Some(mut record)) = reader.read_record() {
        let _ = io::copy(record.data(), &mut io::sink());
    }
});

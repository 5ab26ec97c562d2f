#![no_main]
use libfuzzer_sys::fuzz_target;
use voxreg::RegionHeader;

// Malformed headers must fail with an error, never a panic
fuzz_target!(|data: &[u8]| {
    let mut header = RegionHeader::new();
    let _ = header.load(&mut std::io::Cursor::new(data));
});

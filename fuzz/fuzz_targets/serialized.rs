#![no_main]
use engine::serialize::parse_serialized;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_serialized(s);
    }
});

#![no_main]
use engine::{analyze, AnalysisOptions, SourceUnit};
use libfuzzer_sys::fuzz_target;
use parsers::parse_php;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(ast) = parse_php(s, "fuzz.php") {
            let _ = analyze(&[SourceUnit::new("fuzz.php", ast)], &AnalysisOptions::default());
        }
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;

use h1serv::parse::RequestParser;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // first byte picks the fragmentation, the rest is wire input
    let step = (data[0] as usize % 64) + 1;
    let bytes = &data[1..];

    let mut parser = RequestParser::new();
    let mut out = Vec::new();

    for chunk in bytes.chunks(step) {
        if parser.advance(chunk, &mut out).is_err() {
            return;
        }
    }
});

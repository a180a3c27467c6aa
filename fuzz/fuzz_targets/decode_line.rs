#![no_main]

use libfuzzer_sys::fuzz_target;
use ratewarden_nginx_source::{Decoded, RatelimitLineDecoder};

fuzz_target!(|data: &[u8]| {
    let Ok(decoder) = RatelimitLineDecoder::new() else {
        return;
    };
    let line = String::from_utf8_lossy(data);
    let first = decoder.decode(&line);
    // 같은 입력은 같은 결과
    assert_eq!(first, decoder.decode(&line));
    if let Decoded::Event(event) = first {
        assert!(!event.zone.is_empty());
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratewarden_ipset_sink::ipset::parse_list_output;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(info) = parse_list_output(text) {
            let _ = info.ip_version();
        }
    }
});

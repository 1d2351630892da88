#![no_main]

use std::path::Path;

use gpio_sequencer::config::parse_mapping;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        if let Ok(mapping) = parse_mapping(Path::new("fuzz.json"), raw) {
            assert!(!mapping.is_empty());
            for (channel, pin) in mapping.iter() {
                assert_eq!(mapping.pin(channel), Some(pin));
            }
        }
    }
});

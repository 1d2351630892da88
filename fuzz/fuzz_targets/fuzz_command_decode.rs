#![no_main]

use gpio_sequencer::protocol::Command;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        match Command::decode(text) {
            Ok(command) => {
                let _ = command.kind();
            }
            // only unparseable JSON may end a session
            Err(e) => assert_eq!(
                e.is_fatal(),
                serde_json::from_str::<serde_json::Value>(text).is_err()
            ),
        }
    }
});

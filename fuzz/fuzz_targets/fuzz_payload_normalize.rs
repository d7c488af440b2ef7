#![no_main]

use libfuzzer_sys::fuzz_target;
use switchboard::fuzz_api::normalize_payload;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = normalize_payload(data, "55") {
        assert!(!message.sender.is_empty());
        assert!(message.sender.chars().all(|c| c.is_ascii_digit()));
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use switchboard::security::PromptGuard;

fuzz_target!(|data: &str| {
    let guard = PromptGuard::new();
    let _ = guard.detect(data);
    let _ = guard.check(data);
});

//! Fuzz target for settings.json parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pms_config::{validate_settings, Settings};

fuzz_target!(|data: &[u8]| {
    if let Ok(settings) = serde_json::from_slice::<Settings>(data) {
        let _ = validate_settings(&settings);
    }
});

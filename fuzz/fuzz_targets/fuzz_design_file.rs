//! Fuzz target for design files.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pms_core::scenario::DesignFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(file) = serde_json::from_slice::<DesignFile>(data) {
        let _ = file.into_design();
    }
});

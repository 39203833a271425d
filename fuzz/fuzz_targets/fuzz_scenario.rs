//! Fuzz target for scenario file parsing and validation.
//!
//! Arbitrary bytes must produce a validated scenario or an error, never a
//! panic. Accepted scenarios must also survive a write/read cycle.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pms_core::scenario::Scenario;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(scenario) = Scenario::from_json(text) {
        let json = scenario.to_json_pretty().expect("accepted scenario serializes");
        let reread = Scenario::from_json(&json).expect("written scenario reloads");
        assert_eq!(reread.observations.n(), scenario.observations.n());
    }
});

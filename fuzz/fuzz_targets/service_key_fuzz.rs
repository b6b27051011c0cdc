//! Fuzz target for session service key parsing.
//!
//! Run with: cargo +nightly fuzz run service_key_fuzz -- -max_total_time=60

#![no_main]

use concord_session::ServiceKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(key) = input.parse::<ServiceKey>() {
        let formatted = key.to_string();
        let reparsed: ServiceKey = formatted.parse().expect("formatted key parses");
        assert_eq!(reparsed, key);
    }
});

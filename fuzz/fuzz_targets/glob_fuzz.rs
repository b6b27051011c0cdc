//! Fuzz target for SCAN-style glob matching.
//!
//! Run with: cargo +nightly fuzz run glob_fuzz -- -max_total_time=60

#![no_main]

use concord_store::glob_match;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    // First line is the pattern, the rest is the text.
    let (pattern, text) = input.split_once('\n').unwrap_or((input, ""));

    let _ = glob_match(pattern, text);

    assert!(glob_match("*", text));
    if !text.contains(['*', '?', '[', ']', '\\']) {
        assert!(glob_match(text, text), "literal pattern must match itself");
    }
    if !pattern.contains(['*', '?', '[', ']', '\\']) {
        assert_eq!(glob_match(pattern, text), pattern == text);
    }
});

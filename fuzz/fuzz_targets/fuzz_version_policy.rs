//! Fuzz target: version eligibility rules
//!
//! Splits the input into a running label and a candidate and checks:
//! - No panics for any policy
//! - An empty candidate is never eligible
//! - Under `Differs`, the running label is never eligible against itself
//!
//! cargo fuzz run fuzz_version_policy

#![no_main]

use libfuzzer_sys::fuzz_target;
use otaflow::version::{RunningVersion, VersionPolicy};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let (label, candidate) = text.split_once('\n').unwrap_or((text, ""));
    let running = RunningVersion::new(label);

    for policy in [
        VersionPolicy::Differs,
        VersionPolicy::Lexicographic,
        VersionPolicy::Semantic,
    ] {
        let _ = policy.is_eligible(candidate, &running);
        assert!(!policy.is_eligible("", &running));
    }
    assert!(!VersionPolicy::Differs.is_eligible(running.label(), &running));
});

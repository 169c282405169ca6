use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::provider::{DeliveryError, DeliveryProvider, DeliveryReceipt, OutboundMessage};

/// Reschedule delays in seconds for the outer queue backoff, indexed by a
/// job's attempt count. Attempts past the end of the table clamp to the
/// last entry.
pub const RESCHEDULE_SECS: [i64; 5] = [0, 60, 300, 900, 3600];

/// Delay before a job's next eligible run after `attempt` failures.
pub fn reschedule_delay_secs(attempt: i32) -> i64 {
    let idx = attempt.max(0) as usize;
    RESCHEDULE_SECS[idx.min(RESCHEDULE_SECS.len() - 1)]
}

/// Inner retry budget applied around a single provider invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total tries, including the first. Default: 3.
    #[serde(default = "default_max_tries")]
    pub max_tries: u8,
    /// Base delay between tries. Default: 1000ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential delay, before jitter. Default: 10000ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_tries() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A fail-fast budget: one try, no inner retries.
    pub fn single_try() -> Self {
        Self {
            max_tries: 1,
            ..Self::default()
        }
    }
}

/// Calculate the delay before retry number `attempt` (1-based).
///
/// Formula: `min(base_ms * 2^(attempt-1), max_ms)` plus up to 30% jitter
/// added on top.
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor).min(max_ms);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms * 3 / 10)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Invoke a provider with bounded retries.
///
/// Transient errors consume the retry budget with exponential backoff
/// between tries; a permanent error short-circuits immediately.
pub async fn send_with_retry(
    provider: &dyn DeliveryProvider,
    message: &OutboundMessage,
    policy: &RetryPolicy,
) -> Result<DeliveryReceipt, DeliveryError> {
    let max_tries = policy.max_tries.max(1);
    let mut attempt: u8 = 0;

    loop {
        attempt += 1;
        let err = match provider.send(message).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) => e,
        };

        if err.is_permanent() || attempt >= max_tries {
            return Err(err);
        }

        let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
        warn!(
            provider = provider.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Delivery try failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

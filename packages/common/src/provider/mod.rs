#[cfg(feature = "http-provider")]
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::retry::{RetryPolicy, send_with_retry};

/// A rendered message ready to hand to a delivery provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    /// Provider-assigned message id, when the provider reports one.
    pub provider_id: Option<String>,
}

/// Delivery failures, split by whether retrying can help.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Provider rejected the message as invalid. Retrying is pointless.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    /// Timeout, rate limit, 5xx, network failure. Worth retrying.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Capability to send one message through one channel.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Short name used in logs ("email-api", "webhook", ...).
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Which provider path handled a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    Primary,
    Secondary,
}

impl ProviderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            _ => Err(format!(
                "Invalid provider role '{}'. Must be 'primary' or 'secondary'",
                s
            )),
        }
    }
}

/// Outcome of a primary-then-failover delivery attempt.
#[derive(Debug)]
pub struct FailoverOutcome {
    /// The last provider path tried.
    pub provider: ProviderRole,
    pub result: Result<DeliveryReceipt, DeliveryError>,
}

impl FailoverOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// A primary provider plus an optional independent failover channel.
#[derive(Clone)]
pub struct Providers {
    pub primary: Arc<dyn DeliveryProvider>,
    pub fallback: Option<Arc<dyn DeliveryProvider>>,
}

impl Providers {
    /// Send through the primary provider (with the given inner retry budget),
    /// falling back to the secondary channel on failure.
    pub async fn send_with_failover(
        &self,
        message: &OutboundMessage,
        policy: &RetryPolicy,
    ) -> FailoverOutcome {
        let primary_err = match send_with_retry(self.primary.as_ref(), message, policy).await {
            Ok(receipt) => {
                return FailoverOutcome {
                    provider: ProviderRole::Primary,
                    result: Ok(receipt),
                };
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return FailoverOutcome {
                provider: ProviderRole::Primary,
                result: Err(DeliveryError::Transient(format!(
                    "no failover configured: {primary_err}"
                ))),
            };
        };

        warn!(
            provider = fallback.name(),
            error = %primary_err,
            "Primary delivery failed, trying failover channel"
        );

        match fallback.send(message).await {
            Ok(receipt) => FailoverOutcome {
                provider: ProviderRole::Secondary,
                result: Ok(receipt),
            },
            Err(fallback_err) => FailoverOutcome {
                provider: ProviderRole::Secondary,
                result: Err(DeliveryError::Transient(format!(
                    "primary: {primary_err}; failover: {fallback_err}"
                ))),
            },
        }
    }
}

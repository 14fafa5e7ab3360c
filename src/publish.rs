// =============================================================================
// Publishers — hand finalized signals to delivery collaborators
// =============================================================================
//
// The orchestrator emits one `PublishedSignal` per candidate that reaches
// PUBLISH.  Each configured publisher receives it independently; a failing
// publisher is logged and never affects the cycle or the other publishers.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Direction, RiskDecision, TradeProposal};

/// Structured record handed to delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedSignal {
    pub candidate: String,
    pub direction: Direction,
    pub conviction_score: f64,
    pub proposal: Option<TradeProposal>,
    pub risk_decision: RiskDecision,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn publish(&self, signal: &PublishedSignal) -> Result<()>;
}

/// Writes each signal to the structured log.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, signal: &PublishedSignal) -> Result<()> {
        info!(
            candidate = %signal.candidate,
            direction = %signal.direction,
            conviction = signal.conviction_score,
            outcome = %signal.risk_decision.outcome,
            strategy = signal.proposal.as_ref().map(|p| p.strategy.to_string()).unwrap_or_default(),
            quantity = signal.proposal.as_ref().map(|p| p.quantity).unwrap_or(0),
            "signal published"
        );
        Ok(())
    }
}

/// POSTs each signal as JSON to a webhook.
pub struct WebhookPublisher {
    url: String,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook HTTP client")?;
        let url = url.into();
        debug!(%url, "WebhookPublisher initialised");
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, signal: &PublishedSignal) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(signal)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("webhook returned {status}: {body}");
        }
        Ok(())
    }
}

/// Deliver to every publisher; failures are logged per publisher.
pub async fn publish_all(publishers: &[std::sync::Arc<dyn Publisher>], signal: &PublishedSignal) {
    for p in publishers {
        if let Err(e) = p.publish(signal).await {
            warn!(publisher = p.name(), candidate = %signal.candidate, error = %e, "publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExposureSnapshot, RiskOutcome};

    fn signal() -> PublishedSignal {
        PublishedSignal {
            candidate: "AAPL".into(),
            direction: Direction::Bullish,
            conviction_score: 0.7,
            proposal: None,
            risk_decision: RiskDecision {
                outcome: RiskOutcome::Rejected,
                triggered: Vec::new(),
                proposal: None,
                exposure: ExposureSnapshot::default(),
                decided_at: Utc::now(),
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let json = serde_json::to_value(signal()).unwrap();
        assert_eq!(json["candidate"], "AAPL");
        assert_eq!(json["convictionScore"], 0.7);
        assert!(json["proposal"].is_null());
        assert_eq!(json["riskDecision"]["outcome"], "rejected");
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error_not_a_panic() {
        let p = WebhookPublisher::new("http://127.0.0.1:9/hook").unwrap();
        assert!(p.publish(&signal()).await.is_err());
        // publish_all swallows it
        let publishers: Vec<std::sync::Arc<dyn Publisher>> =
            vec![std::sync::Arc::new(p), std::sync::Arc::new(LogPublisher)];
        publish_all(&publishers, &signal()).await;
    }
}

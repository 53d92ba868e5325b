//! Status-endpoint polling for the interim gateway.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// State the gateway must report before the orchestrator moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTarget {
    /// Interim instance waiting for the commissioning wizard.
    Commissioning,
    /// Commissioned instance serving its main context.
    Running,
}

impl HealthTarget {
    pub fn token(self) -> &'static str {
        match self {
            Self::Commissioning => "COMMISSIONING",
            Self::Running => "RUNNING",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Commissioning => "/StatusPing",
            Self::Running => "/main/StatusPing",
        }
    }
}

impl fmt::Display for HealthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { attempts: u32 },
    Timeout { attempts: u32 },
}

impl HealthOutcome {
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

#[derive(Deserialize)]
struct StatusBody {
    state: String,
}

/// Whether a status body reports `target`. JSON bodies are compared on their
/// `state` field; anything else must contain the state as a whole word.
pub fn reports_state(body: &str, target: HealthTarget) -> bool {
    match serde_json::from_str::<StatusBody>(body) {
        Ok(status) => status.state.trim() == target.token(),
        Err(_) => body
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word == target.token()),
    }
}

#[derive(Debug, Clone)]
pub struct HealthGate {
    client: Client,
    base_url: String,
    interval: Duration,
}

impl HealthGate {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval: POLL_INTERVAL,
        })
    }

    /// Gate for a gateway listening on the loopback interface.
    pub fn local(http_port: u16) -> Result<Self> {
        Self::new(format!("http://127.0.0.1:{http_port}"))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll at a fixed interval until `target` is reported or `deadline`
    /// elapses. At most `deadline / interval + 1` requests are made, and no
    /// request outlives the deadline by more than one interval.
    pub async fn poll(&self, target: HealthTarget, deadline: Duration) -> HealthOutcome {
        let url = format!("{}{}", self.base_url, target.endpoint());
        let until = Instant::now() + deadline;
        let interval_ms = self.interval.as_millis().max(1);
        let max_attempts = u32::try_from(deadline.as_millis() / interval_ms)
            .unwrap_or(u32::MAX - 1)
            + 1;

        tracing::info!(%url, %target, deadline_secs = deadline.as_secs(), "Waiting for gateway");
        let mut attempts = 0;
        while attempts < max_attempts {
            attempts += 1;
            let budget = until
                .saturating_duration_since(Instant::now())
                .max(self.interval)
                .min(REQUEST_TIMEOUT);
            let healthy = tokio::time::timeout(budget, self.check(&url, target))
                .await
                .unwrap_or_else(|_| {
                    tracing::debug!(?budget, "Status request timed out");
                    false
                });
            if healthy {
                tracing::info!(%target, attempts, "Gateway reported target state");
                return HealthOutcome::Healthy { attempts };
            }

            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() || attempts == max_attempts {
                break;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
        tracing::warn!(%target, attempts, "Gateway did not reach target state");
        HealthOutcome::Timeout { attempts }
    }

    async fn check(&self, url: &str, target: HealthTarget) -> bool {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Status request failed");
                return false;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(status = response.status().as_u16(), "Gateway not ready");
            return false;
        }
        match response.text().await {
            Ok(body) => {
                let healthy = reports_state(&body, target);
                if !healthy {
                    tracing::debug!(body = %body.trim(), "Gateway not ready");
                }
                healthy
            }
            Err(e) => {
                tracing::debug!(error = %e, "Status body unreadable");
                false
            }
        }
    }
}

//! Commissioning wizard requests sent to the interim gateway.
//!
//! Steps are posted in a fixed order to `/post-step`. A failed step is
//! logged and the sequence continues; whether the gateway accepted the
//! wizard is decided later by the health gate.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::credentials::AdminPassword;
use crate::error::Result;

const POST_STEP_PATH: &str = "/post-step";
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardStep {
    pub id: u32,
    pub step: &'static str,
    pub data: Value,
}

/// What came back for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Accepted { step: &'static str, status: u16 },
    Rejected { step: &'static str, status: u16 },
    Failed { step: &'static str, error: String },
}

impl StepOutcome {
    pub fn step(&self) -> &'static str {
        match self {
            Self::Accepted { step, .. } | Self::Rejected { step, .. } | Self::Failed { step, .. } => {
                step
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Values the wizard needs; the password has already been resolved.
#[derive(Debug, Clone)]
pub struct CommissioningPlan {
    pub edition: Option<String>,
    pub username: String,
    pub password: AdminPassword,
    pub http_port: u16,
    pub https_port: u16,
    pub use_ssl: bool,
    pub start_gateway: bool,
}

/// `[salt]hash` where salt is the first eight hex characters of SHA-256 over
/// `unix_secs` and hash is hex SHA-256 of `password + salt`.
pub fn hash_password(password: &str, unix_secs: i64) -> String {
    let salt_digest = hex::encode(Sha256::digest(unix_secs.to_string().as_bytes()));
    let salt = &salt_digest[..8];
    let hash = hex::encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    format!("[{salt}]{hash}")
}

impl CommissioningPlan {
    pub fn steps(&self, unix_secs: i64) -> Vec<WizardStep> {
        let mut steps = Vec::with_capacity(5);
        let mut push = |step: &'static str, data: Value| {
            let id = u32::try_from(steps.len()).unwrap_or(u32::MAX);
            steps.push(WizardStep { id, step, data });
        };
        if let Some(edition) = &self.edition {
            push("edition", json!({ "edition": edition }));
        }
        push("eula", json!({ "accept": true }));
        push(
            "authSetup",
            json!({
                "username": self.username,
                "password": hash_password(self.password.expose(), unix_secs),
            }),
        );
        push(
            "connections",
            json!({
                "http": self.http_port,
                "https": self.https_port,
                "useSSL": self.use_ssl,
            }),
        );
        push("finalize", json!({ "startGateway": self.start_gateway }));
        steps
    }
}

#[derive(Debug, Clone)]
pub struct CommissioningClient {
    client: reqwest::Client,
    url: String,
}

impl CommissioningClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, STEP_TIMEOUT)
    }

    /// A step that gets no response within `timeout` is reported as failed.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: format!("{}{POST_STEP_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub async fn commission(&self, plan: &CommissioningPlan) -> Vec<StepOutcome> {
        let now = chrono::Utc::now().timestamp();
        let mut outcomes = Vec::new();
        for step in plan.steps(now) {
            let outcome = self.post(&step).await;
            match &outcome {
                StepOutcome::Accepted { step, status } => {
                    tracing::info!(step, status, "Commissioning step accepted")
                }
                StepOutcome::Rejected { step, status } => {
                    tracing::warn!(step, status, "Commissioning step rejected")
                }
                StepOutcome::Failed { step, error } => {
                    tracing::warn!(step, %error, "Commissioning step failed")
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn post(&self, step: &WizardStep) -> StepOutcome {
        match self.client.post(&self.url).json(step).send().await {
            Ok(response) if response.status().is_success() => StepOutcome::Accepted {
                step: step.step,
                status: response.status().as_u16(),
            },
            Ok(response) => StepOutcome::Rejected {
                step: step.step,
                status: response.status().as_u16(),
            },
            Err(e) => StepOutcome::Failed {
                step: step.step,
                error: e.to_string(),
            },
        }
    }
}

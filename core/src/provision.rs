//! Fresh-install choreography around the interim gateway.

use std::time::Duration;

use crate::commissioning::{CommissioningClient, CommissioningPlan};
use crate::config::Config;
use crate::credentials::AdminPassword;
use crate::error::Result;
use crate::health::{HealthGate, HealthTarget};
use crate::init_properties::InitProperties;
use crate::launch::ServiceCommand;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone)]
pub struct Provisioner<'a> {
    config: &'a Config,
    base_url: String,
    poll_interval: Duration,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config, base_url: String, poll_interval: Duration) -> Self {
        Self {
            config,
            base_url,
            poll_interval,
        }
    }

    /// Seed init properties, commission an interim gateway, restore a
    /// backup when one is configured, and stop the interim gateway again.
    pub async fn provision(&self, password: AdminPassword) -> Result<()> {
        let config = self.config;
        let settings = &config.provisioning;

        InitProperties::from_settings(settings).write(&config.paths.init_properties())?;

        let supervisor =
            ProcessSupervisor::new(config.paths.provisioning_log(), settings.terminate_on_timeout);
        let gate = HealthGate::new(self.base_url.clone())?.with_interval(self.poll_interval);
        let wizard = CommissioningClient::new(&self.base_url)?;
        let command = ServiceCommand::new(&config.service, &config.paths);

        let process = supervisor.spawn(&command)?;
        let process = supervisor
            .await_health(
                process,
                &gate,
                HealthTarget::Commissioning,
                settings.startup_timeout,
            )
            .await?;

        let restore = settings.restore_archive.as_deref();
        let plan = CommissioningPlan {
            edition: config.gateway.edition.clone(),
            username: config.gateway.admin_username.clone(),
            password,
            http_port: config.gateway.http_port,
            https_port: config.gateway.https_port,
            use_ssl: config.gateway.use_ssl,
            start_gateway: restore.is_none(),
        };
        let outcomes = wizard.commission(&plan).await;
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        tracing::info!(accepted, total = outcomes.len(), "Commissioning finished");

        let process = if plan.start_gateway {
            supervisor
                .await_health(process, &gate, HealthTarget::Running, settings.startup_timeout)
                .await?
        } else {
            process
        };

        let restored = match restore {
            Some(archive) => {
                supervisor
                    .restore(&config.service.restore_tool, archive)
                    .await
            }
            None => Ok(()),
        };
        supervisor.terminate(process).await?;
        restored
    }
}

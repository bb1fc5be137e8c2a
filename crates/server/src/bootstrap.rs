use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use slotline_agent::{PipelineEngine, PipelinePorts, PipelineSettings, RunDispatcher};
use slotline_core::config::{AppConfig, ConfigError};
use slotline_core::scheduling::{Clock, SystemClock};
use slotline_core::trace::TracingTraceSink;
use slotline_gateway::{GatewayError, Gateways};
use slotline_store::{spawn_eviction, InMemorySessionStore, SessionStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub dispatcher: Arc<RunDispatcher>,
    pub eviction: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl Application {
    pub fn router(&self) -> Router {
        health::router(health::HealthState::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.dispatcher),
        ))
        .merge(webhook::router(Arc::clone(&self.dispatcher)))
    }
}

pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let gateways = Gateways::from_config(&config)?;
    assemble(config, gateways)
}

/// Wires the session store, eviction task, engine and dispatcher around the
/// given collaborators. Must be called from within a Tokio runtime.
pub fn assemble(config: AppConfig, gateways: Gateways) -> Result<Application, BootstrapError> {
    let rules = config.scheduling.business_rules()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(Arc::clone(&clock)));

    let eviction = spawn_eviction(
        Arc::clone(&sessions),
        Duration::from_secs(config.sessions.ttl_secs),
        Duration::from_secs(config.sessions.eviction_interval_secs),
    );

    let engine = PipelineEngine::new(
        PipelinePorts {
            phones: gateways.phones,
            model: gateways.model,
            calendar: gateways.calendar,
            notifier: gateways.notifier,
            sessions: Arc::clone(&sessions),
            trace: Arc::new(TracingTraceSink),
            clock,
        },
        rules,
        PipelineSettings::from_config(&config),
    );
    let dispatcher = Arc::new(RunDispatcher::spawn(
        Arc::new(engine),
        config.pipeline.workers,
        config.pipeline.queue_capacity,
    ));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        workers = config.pipeline.workers,
        queue_capacity = config.pipeline.queue_capacity,
        session_ttl_secs = config.sessions.ttl_secs,
        "pipeline wired"
    );

    Ok(Application { config, sessions, dispatcher, eviction })
}

#[cfg(test)]
mod tests {
    use slotline_core::config::{AppConfig, ConfigError};

    use crate::bootstrap::{assemble, bootstrap, BootstrapError};
    use crate::testing::simulated_gateways;

    #[tokio::test]
    async fn live_gateways_build_without_touching_the_network() {
        let app = bootstrap(AppConfig::default()).await.expect("bootstrap");

        assert!(app.dispatcher.is_accepting());
        assert_eq!(app.dispatcher.stats().submitted, 0);

        app.dispatcher.shutdown().await;
        app.eviction.abort();
    }

    #[tokio::test]
    async fn unknown_timezone_fails_fast() {
        let mut config = AppConfig::default();
        config.scheduling.timezone = "Mars/Olympus_Mons".to_string();
        let (gateways, _, _) = simulated_gateways();

        let error = assemble(config, gateways).err().expect("invalid timezone");

        assert!(matches!(error, BootstrapError::Config(ConfigError::Validation(_))));
        assert!(error.to_string().contains("scheduling.timezone"));
    }
}

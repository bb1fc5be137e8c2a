use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use slotline_agent::RunDispatcher;
use slotline_core::flows::ConversationState;
use slotline_store::SessionStore;
use tracing::error;

#[derive(Clone)]
pub struct HealthState {
    sessions: Arc<dyn SessionStore>,
    dispatcher: Arc<RunDispatcher>,
}

impl HealthState {
    pub fn new(sessions: Arc<dyn SessionStore>, dispatcher: Arc<RunDispatcher>) -> Self {
        Self { sessions, dispatcher }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: HealthCheck,
    pub dispatcher: HealthCheck,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunMetrics {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub in_flight: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsResponse {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub active_sessions: usize,
    pub success_rate: f64,
    pub runs: RunMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsError {
    pub error: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).route("/metrics", get(metrics)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let accepting = state.dispatcher.is_accepting();
    let dispatcher = if accepting {
        HealthCheck { status: "ready", detail: "accepting inbound messages".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "dispatcher is draining".to_string() }
    };

    let payload = HealthResponse {
        status: if accepting { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        service: HealthCheck {
            status: "ready",
            detail: "slotline-server runtime initialized".to_string(),
        },
        dispatcher,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if accepting { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

pub async fn metrics(
    State(state): State<HealthState>,
) -> Result<Json<MetricsResponse>, (StatusCode, Json<MetricsError>)> {
    let sessions = state.sessions.list().await.map_err(|error| {
        error!(event_name = "system.metrics.error", error = %error, "session listing failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(MetricsError { error: error.to_string() }))
    })?;

    let total_sessions = sessions.len();
    let completed_sessions =
        sessions.iter().filter(|session| *session.state() == ConversationState::Completed).count();
    let success_rate = if total_sessions == 0 {
        0.0
    } else {
        completed_sessions as f64 / total_sessions as f64
    };

    let stats = state.dispatcher.stats();
    Ok(Json(MetricsResponse {
        total_sessions,
        completed_sessions,
        active_sessions: total_sessions - completed_sessions,
        success_rate,
        runs: RunMetrics {
            submitted: stats.submitted,
            rejected: stats.rejected,
            completed: stats.completed,
            in_flight: stats.submitted.saturating_sub(stats.completed),
        },
    }))
}

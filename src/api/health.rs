//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::notification::DispatcherStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub gateway: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub gateway: String,
    pub max_in_flight: usize,
    pub dispatcher: DispatcherStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        gateway: state.dispatcher.gateway_name().to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        gateway: state.dispatcher.gateway_name().to_string(),
        max_in_flight: state.dispatcher.max_in_flight(),
        dispatcher: state.dispatcher.stats(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Settings;
    use crate::gateway::MemoryGateway;
    use crate::notification::NotificationDispatcher;

    #[tokio::test]
    async fn test_health_reports_gateway() {
        let state = AppState::new(
            Settings::default(),
            NotificationDispatcher::new(Arc::new(MemoryGateway::new())),
        );

        let Json(response) = health(State(state)).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.gateway, "memory");
    }

    #[tokio::test]
    async fn test_stats_start_at_zero() {
        let state = AppState::new(
            Settings::default(),
            NotificationDispatcher::new(Arc::new(MemoryGateway::new())).with_max_in_flight(4),
        );

        let Json(response) = stats(State(state)).await;
        assert_eq!(response.max_in_flight, 4);
        assert_eq!(response.dispatcher.total_dispatches, 0);
        assert_eq!(response.dispatcher.gateway_calls, 0);
    }
}

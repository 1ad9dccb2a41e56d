// HTTP request handlers
use crate::application::historical_service::{ComparisonView, HistoricalView};
use crate::application::historical_source::{ComparisonQuery, HistoricalQuery};
use crate::application::live_view::LiveSnapshot;
use crate::application::stream_manager::{ManagerStatus, StreamEvent};
use crate::domain::error::StreamError;
use crate::domain::params::{AddressingParams, ControlParams};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Replace the addressing params; the reconnect happens after the quiet period
pub async fn update_params(
    State(state): State<Arc<AppState>>,
    Json(params): Json<AddressingParams>,
) -> StatusCode {
    state.manager.update_params(params);
    StatusCode::ACCEPTED
}

/// Merge control params into the current ones
pub async fn update_controls(
    State(state): State<Arc<AppState>>,
    Json(controls): Json<ControlParams>,
) -> StatusCode {
    state.manager.update_controls(controls);
    StatusCode::ACCEPTED
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ManagerStatus>, StatusCode> {
    state.manager.pause().await.map_err(closed)?;
    Ok(Json(state.manager.status().await))
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ManagerStatus>, StatusCode> {
    state.manager.resume().await.map_err(closed)?;
    Ok(Json(state.manager.status().await))
}

pub async fn live_state(State(state): State<Arc<AppState>>) -> Json<ManagerStatus> {
    Json(state.manager.status().await)
}

pub async fn live_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LiveSnapshot>, StatusCode> {
    state.manager.snapshot().await.map(Json).map_err(closed)
}

fn closed(e: StreamError) -> StatusCode {
    tracing::warn!("Live request rejected: {}", e);
    StatusCode::SERVICE_UNAVAILABLE
}

/// Re-broadcast the manager's data and error channels as server-sent events
pub async fn live_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut data = state.manager.subscribe();
    let mut errors = state.manager.subscribe_errors();

    let stream = async_stream::stream! {
        loop {
            let event = tokio::select! {
                // a lagging client gets a reset in place of what it missed
                event = data.recv() => match event {
                    Some(event) => data_event(event),
                    None => break,
                },
                error = errors.recv() => match error {
                    Ok(error) => Some(Event::default().event("error").data(error.to_string())),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };

            if let Some(event) = event {
                yield Ok::<_, Infallible>(event);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn data_event(event: StreamEvent) -> Option<Event> {
    match event {
        StreamEvent::Reset => Some(Event::default().event("reset").data("")),
        StreamEvent::Reading(reading) => {
            match Event::default().event("update").json_data(&reading) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Failed to encode reading: {}", e);
                    None
                }
            }
        }
    }
}

/// Fetch and aggregate a historical range
pub async fn historical(
    State(state): State<Arc<AppState>>,
    Json(query): Json<HistoricalQuery>,
) -> Result<Json<HistoricalView>, (StatusCode, String)> {
    match state.historical.load(query).await {
        Ok(view) => Ok(Json(view)),
        Err(e) => {
            tracing::error!("Error fetching history: {:#}", e);
            Err((StatusCode::BAD_GATEWAY, format!("{:#}", e)))
        }
    }
}

/// Fetch several series over one range for a comparison chart
pub async fn compare_historical(
    State(state): State<Arc<AppState>>,
    Json(query): Json<ComparisonQuery>,
) -> Result<Json<ComparisonView>, (StatusCode, String)> {
    match state.historical.load_multiple(query).await {
        Ok(view) => Ok(Json(view)),
        Err(e) => {
            tracing::error!("Error fetching comparison: {:#}", e);
            Err((StatusCode::BAD_GATEWAY, format!("{:#}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::historical_service::HistoricalService;
    use crate::application::historical_source::{GroupedResponse, HistoricalSource};
    use crate::application::live_transport::{LiveTransport, TransportSession};
    use crate::application::stream_manager::{ManagerState, StreamConnectionManager};
    use crate::domain::granularity::GranularityLevel;
    use crate::infrastructure::config::StreamSettings;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct RefusingTransport;

    impl LiveTransport for RefusingTransport {
        fn open(&self, _url: &str) -> anyhow::Result<TransportSession> {
            anyhow::bail!("refused")
        }
    }

    struct FailingSource;

    #[async_trait]
    impl HistoricalSource for FailingSource {
        async fn fetch(&self, _query: &HistoricalQuery) -> anyhow::Result<GroupedResponse> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            manager: StreamConnectionManager::spawn(
                Arc::new(RefusingTransport),
                &StreamSettings::default(),
            ),
            historical: HistoricalService::new(Arc::new(FailingSource)),
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_reports_paused_state() {
        let state = state();
        let Json(status) = pause(State(state.clone())).await.unwrap();
        assert_eq!(status.state, ManagerState::Paused);

        let Json(status) = live_state(State(state)).await;
        assert_eq!(status.state, ManagerState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_unavailable_after_teardown() {
        let state = state();
        assert!(live_snapshot(State(state.clone())).await.is_ok());

        state.manager.teardown().await;
        assert_eq!(
            live_snapshot(State(state.clone())).await.err(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert_eq!(
            resume(State(state)).await.err(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_historical_failure_is_bad_gateway() {
        let query = HistoricalQuery {
            facility: "uoa".to_string(),
            sensor_type: "temperature".to_string(),
            granularity: GranularityLevel::Day,
            agent_serials: Vec::new(),
            metric: "average".to_string(),
            start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        };

        let (status, body) = historical(State(state()), Json(query)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_comparison_failure_is_bad_gateway() {
        let query: ComparisonQuery = serde_json::from_str(
            r#"{
                "facility": "uoa",
                "granularity": "day",
                "metric": "average",
                "start": "2024-03-01T00:00:00Z",
                "end": "2024-03-08T00:00:00Z",
                "series": [{"name": "north", "sensorType": "temperature", "agentSerials": ["box-1"]}]
            }"#,
        )
        .unwrap();

        let (status, body) = compare_historical(State(state()), Json(query))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("north"));
    }

    #[tokio::test]
    async fn test_status_serializes_connected_since() {
        let status = ManagerStatus {
            state: ManagerState::Connected,
            key: Some("F1/B1/temperature".to_string()),
            connected_since: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
            open_connections: 1,
            reconnect_pending: false,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["connectedSince"], "2024-03-01T10:00:00Z");
        assert_eq!(json["openConnections"], 1);
        assert_eq!(json["reconnectPending"], false);
    }
}

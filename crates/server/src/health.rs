use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use cleanq_db::QueueStore;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    queue: Arc<dyn QueueStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(queue: Arc<dyn QueueStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { queue })
}

pub async fn spawn(bind_address: &str, port: u16, queue: Arc<dyn QueueStore>) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(queue)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                thread_id = "unknown",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let queue = queue_check(state.queue.as_ref()).await;
    let ready = queue.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "cleanq-server runtime initialized".to_string(),
        },
        queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn queue_check(queue: &dyn QueueStore) -> HealthCheck {
    match queue.all().await {
        Ok(entries) => HealthCheck {
            status: "ready",
            detail: format!("queue readable with {} request(s)", entries.len()),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("queue read failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use cleanq_db::{CsvQueueStore, QueueStore};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_queue_is_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CsvQueueStore::new(dir.path().join("clean_queue.csv"));
        store.ensure_initialized().await.expect("init");

        let (status, Json(payload)) = health(State(HealthState { queue: Arc::new(store) })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.queue.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_queue_schema_is_wrong() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clean_queue.csv");
        std::fs::write(&path, "id,name\n1,Depot\n").expect("write foreign csv");

        let (status, Json(payload)) =
            health(State(HealthState { queue: Arc::new(CsvQueueStore::new(path)) })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(payload.queue.detail.contains("schema"));
        assert_eq!(payload.service.status, "ready");
    }
}

use crate::collectors::{
    count_online_cores, outbound_ip_or_loopback, read_all_core_counters, read_core_counters,
    read_memory_counters, scan_partitions, CpuCounters, MemoryCounters, PartitionSnapshot,
};
use crate::config::Config;
use crate::error::TelemetryError;
use crate::snapshot::{collect_snapshot, TelemetrySnapshot};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub config: Arc<Config>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiCores {
    pub online: usize,
    pub cores: Vec<CpuCounters>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }
}

impl From<TelemetryError> for ApiError {
    fn from(err: TelemetryError) -> Self {
        let status = match &err {
            TelemetryError::Parse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn build_router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ip", get(ip_handler))
        .route("/api/cores", get(cores_handler))
        .route("/api/cores/:index", get(core_handler))
        .route("/api/memory", get(memory_handler))
        .route("/api/partitions", get(partitions_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .with_state(HttpAppState { config })
}

async fn blocking<T, F>(collect: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, TelemetryError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(collect).await {
        Ok(result) => result.map_err(|err| {
            warn!(error = %err, "сбор телеметрии не удался");
            ApiError::from(err)
        }),
        Err(err) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("задача сбора прервана: {err}"),
        }),
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ip_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cfg = state.config.clone();
    let ip = blocking(move || Ok(outbound_ip_or_loopback(&cfg.network_probe))).await?;
    Ok(Json(json!({ "ip": ip.to_string() })))
}

async fn cores_handler(State(state): State<HttpAppState>) -> Result<Json<ApiCores>, ApiError> {
    let stat = state.config.sources.proc_stat.clone();
    let cores = blocking(move || {
        Ok(ApiCores {
            online: count_online_cores()?,
            cores: read_all_core_counters(&stat)?,
        })
    })
    .await?;
    Ok(Json(cores))
}

async fn core_handler(
    State(state): State<HttpAppState>,
    Path(index): Path<usize>,
) -> Result<Json<CpuCounters>, ApiError> {
    let online = blocking(count_online_cores).await?;
    if index >= online {
        return Err(ApiError::not_found(format!(
            "ядро {index} не найдено, онлайн ядер: {online}"
        )));
    }
    let stat = state.config.sources.proc_stat.clone();
    let counters = blocking(move || read_core_counters(&stat, index)).await?;
    Ok(Json(counters))
}

async fn memory_handler() -> Result<Json<MemoryCounters>, ApiError> {
    Ok(Json(blocking(read_memory_counters).await?))
}

async fn partitions_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<PartitionSnapshot>, ApiError> {
    let cfg = state.config.clone();
    let snapshot = blocking(move || scan_partitions(&cfg.sources, &cfg.storage)).await?;
    Ok(Json(snapshot))
}

async fn snapshot_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<TelemetrySnapshot>, ApiError> {
    let cfg = state.config.clone();
    Ok(Json(blocking(move || collect_snapshot(&cfg)).await?))
}

use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aggregate::StatsResult;
use crate::error::MonitorError;
use crate::highlight::HighlightSpan;
use crate::rules::StatBucket;
use crate::service::{AllMessages, FilteredMessages, MonitorService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MonitorService>,
}

impl AppState {
    pub fn new(service: MonitorService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/messages", get(filtered_messages))
        .route("/messages/all", get(all_messages))
        .route("/stats", get(stats))
        .route("/stats/buckets", get(stat_buckets))
        .route("/highlight", post(highlight))
        .route("/admin/rules/invalidate", post(invalidate_rules))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
        let body = serde_json::json!({ "error": self.code(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(serde::Deserialize)]
struct HoursQuery {
    #[serde(default)]
    hours: Option<i64>, // chybí -> 1 h
}

impl HoursQuery {
    fn hours(&self) -> i64 {
        self.hours.unwrap_or(1)
    }
}

async fn filtered_messages(
    State(state): State<AppState>,
    Query(q): Query<HoursQuery>,
) -> Result<Json<FilteredMessages>, MonitorError> {
    state.service.get_filtered_messages(q.hours()).await.map(Json)
}

async fn all_messages(
    State(state): State<AppState>,
    Query(q): Query<HoursQuery>,
) -> Result<Json<AllMessages>, MonitorError> {
    state.service.get_all_messages(q.hours()).await.map(Json)
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResult>, MonitorError> {
    state.service.get_stats().await.map(Json)
}

async fn stat_buckets(State(state): State<AppState>) -> Json<Vec<StatBucket>> {
    Json(state.service.stat_buckets())
}

#[derive(serde::Deserialize)]
struct HighlightReq {
    text: String,
}

async fn highlight(State(state): State<AppState>, Json(body): Json<HighlightReq>) -> Json<Vec<HighlightSpan>> {
    Json(state.service.highlight_message(&body.text))
}

async fn invalidate_rules(State(state): State<AppState>) -> &'static str {
    state.service.invalidate_rules();
    "invalidated"
}

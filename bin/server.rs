// Data Matrix - Web Server
// REST API with Axum over the DataMatrix facade

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use data_matrix::{is_data_file, DataMatrix, MatrixError, Settings};

/// Shared application state
#[derive(Clone)]
struct AppState {
    matrix: Arc<DataMatrix>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Error response with the status it maps to
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<MatrixError> for ApiError {
    fn from(e: MatrixError) -> Self {
        let status = match &e {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            MatrixError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, "request failed");
        }
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::err(self.message))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

/// Run a store call off the async workers; every call touches the filesystem.
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&DataMatrix) -> data_matrix::Result<T> + Send + 'static,
{
    let matrix = state.matrix.clone();
    let outcome = tokio::task::spawn_blocking(move || f(&matrix))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("worker failed: {e}"),
        })?;
    Ok(Json(ApiResponse::ok(outcome?)))
}

#[derive(Serialize)]
struct ColumnsResponse {
    columns: Vec<String>,
    count: usize,
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    data: Vec<data_matrix::Document>,
    /// Number of rows returned after pagination
    count: usize,
}

#[derive(Deserialize)]
struct AssetParams {
    /// Comma-separated column list
    columns: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/columns - Every known column
async fn get_columns(State(state): State<AppState>) -> ApiResult<ColumnsResponse> {
    blocking(&state, |matrix| {
        let columns = matrix.get_columns();
        Ok(ColumnsResponse {
            count: columns.len(),
            columns,
        })
    })
    .await
}

/// GET /api/assets/:id - One asset, optionally restricted with ?columns=a,b
async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<AssetParams>,
) -> ApiResult<data_matrix::Document> {
    blocking(&state, move |matrix| match params.columns {
        Some(columns) => {
            let columns: Vec<String> = columns.split(',').map(|c| c.trim().to_string()).collect();
            matrix.get_asset_columns(&id, &columns)
        }
        None => matrix.get_asset(&id),
    })
    .await
}

/// GET /api/assets/:id/metadata - Effective date and source per column
async fn get_asset_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<std::collections::BTreeMap<String, data_matrix::ColumnProvenance>> {
    blocking(&state, move |matrix| matrix.get_asset_column_metadata(&id)).await
}

/// POST /api/query - Run a SELECT query
async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    blocking(&state, move |matrix| {
        let rows = matrix.execute_query(&request.query)?;
        let offset = request.offset.unwrap_or(0);
        let data: Vec<_> = match request.limit.filter(|&l| l > 0) {
            Some(limit) => rows.into_iter().skip(offset).take(limit).collect(),
            None => rows.into_iter().skip(offset).collect(),
        };
        Ok(QueryResponse {
            count: data.len(),
            data,
        })
    })
    .await
}

/// GET /api/stats - Entity and column counts
async fn get_stats(State(state): State<AppState>) -> ApiResult<data_matrix::StoreStats> {
    blocking(&state, |matrix| Ok(matrix.stats())).await
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/columns", get(get_columns))
        .route("/assets/:id", get(get_asset))
        .route("/assets/:id/metadata", get(get_asset_metadata))
        .route("/query", post(run_query))
        .route("/stats", get(get_stats))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

/// Data files directly inside `dir`, sorted by name
fn input_files(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_data_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load().context("Failed to load settings")?;
    let bind = settings.server_bind.clone();
    let input_dir = settings.input_dir.clone();

    let matrix = tokio::task::spawn_blocking(move || DataMatrix::open(settings))
        .await
        .context("Startup task failed")?
        .context("Failed to open data matrix")?;
    let state = AppState {
        matrix: Arc::new(matrix),
    };

    // Startup ingest runs in the background; queries see it as it lands.
    if let Some(dir) = input_dir {
        let matrix = state.matrix.clone();
        tokio::task::spawn_blocking(move || match input_files(&dir) {
            Ok(files) => {
                let batch = matrix.load_files(&files);
                info!(
                    files = batch.files.len(),
                    failed = batch.failed.len(),
                    rows_updated = batch.rows_updated(),
                    "startup ingest finished"
                );
            }
            Err(e) => warn!(error = %e, "startup ingest skipped"),
        });
    }

    let table = state.matrix.settings().table_name.clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!(addr = %bind, table = %table, "server running");
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn app_with_assets() -> (TempDir, Router) {
        let tmp = tempdir().unwrap();
        let matrix = DataMatrix::open(Settings::default().with_data_dir(tmp.path().join("data"))).unwrap();

        let csv = tmp.path().join("companies_20240101.csv");
        fs::write(
            &csv,
            "ID_BB_GLOBAL,Company,Revenue\nAAPL,Apple Inc.,365.8\nMSFT,Microsoft,168.1\n",
        )
        .unwrap();
        matrix.load_files(&[csv]);

        let state = AppState {
            matrix: Arc::new(matrix),
        };
        (tmp, build_router(state))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_query(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, app) = app_with_assets();
        let (status, body) = send(app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_columns_and_stats() {
        let (_tmp, app) = app_with_assets();

        let (status, body) = send(app.clone(), get("/api/columns")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 3);
        assert_eq!(body["data"]["columns"][0], "Company");

        let (_, body) = send(app, get("/api/stats")).await;
        assert_eq!(body["data"]["entity_count"], 2);
        assert_eq!(body["data"]["column_count"], 3);
    }

    #[tokio::test]
    async fn test_asset_routes() {
        let (_tmp, app) = app_with_assets();

        let (status, body) = send(app.clone(), get("/api/assets/AAPL")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["Company"], "Apple Inc.");

        let (_, body) = send(app.clone(), get("/api/assets/aapl?columns=revenue")).await;
        assert_eq!(body["data"], serde_json::json!({"Revenue": "365.8"}));

        let (status, body) = send(app.clone(), get("/api/assets/AAPL/metadata")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["Revenue"]["effective_date"], "20240101");

        let (status, body) = send(app, get("/api/assets/NOPE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_query_route() {
        let (_tmp, app) = app_with_assets();

        let (status, body) = send(
            app.clone(),
            post_query(serde_json::json!({"query": "SELECT Company FROM BB_ASSETS WHERE Revenue > 300"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 1);
        assert_eq!(body["data"]["data"][0]["Company"], "Apple Inc.");

        let (_, body) = send(
            app.clone(),
            post_query(serde_json::json!({"query": "SELECT * FROM BB_ASSETS", "limit": 1, "offset": 1})),
        )
        .await;
        assert_eq!(body["data"]["count"], 1);

        let (status, body) = send(app.clone(), post_query(serde_json::json!({"query": "SELECT * FROM OTHER"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("OTHER"));

        let (status, _) = send(app, post_query(serde_json::json!({"query": "DROP TABLE x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

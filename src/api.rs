//! REST API server for SentinelChain
//!
//! Exposes threat ingestion, chain inspection, integrity verification and
//! reset over HTTP. All handlers share one [`Node`], whose chain sits behind
//! a single `RwLock`: the duplicate check and the append of a submission run
//! under the same write guard.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{self, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::blockchain::{verify_report, BlockRecord, Blockchain};
use crate::config::ServerConfig;
use crate::error::ChainError;
use crate::persistence::Persistence;
use crate::threat::ThreatSubmission;

/// Shared server state.
#[derive(Clone)]
pub struct Node {
    pub blockchain: Arc<RwLock<Blockchain>>,
    persistence: Arc<dyn Persistence>,
    api_stats: Arc<RwLock<ApiStats>>,
}

/// API statistics and monitoring
#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    threats_added: u64,
    duplicates_rejected: u64,
    resets: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl Node {
    /// Wrap `blockchain`; resets rebuild it on the same storage backend.
    pub fn new(blockchain: Blockchain) -> Self {
        let persistence = blockchain.persistence();
        Self {
            blockchain: Arc::new(RwLock::new(blockchain)),
            persistence,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    /// Normalize and append a submission. `Ok(None)` means it was a duplicate.
    pub async fn add_threat(
        &self,
        submission: ThreatSubmission,
    ) -> Result<Option<BlockRecord>, ChainError> {
        let payload = submission.into_payload();
        let mut blockchain = self.blockchain.write().await;
        if !blockchain.add_block(payload)? {
            self.api_stats.write().await.duplicates_rejected += 1;
            return Ok(None);
        }
        let block = blockchain.last_block()?.to_record();
        self.api_stats.write().await.threats_added += 1;
        info!(hash = %block.hash, length = blockchain.len(), "Threat recorded");
        Ok(Some(block))
    }

    /// Replace the stored chain with a fresh genesis-only chain and rebind the
    /// handle to it. On failure both the handle and storage keep the old chain.
    pub async fn reset(&self) -> Result<Vec<BlockRecord>, ChainError> {
        let mut blockchain = self.blockchain.write().await;
        *blockchain = Blockchain::start_fresh(self.persistence.clone())?;
        self.api_stats.write().await.resets += 1;
        info!("Blockchain reset");
        Ok(blockchain.to_records())
    }

    /// Verify the chain as storage holds it.
    pub async fn verify(&self) -> Result<(bool, String), ChainError> {
        let records = self.blockchain.read().await.stored_records()?;
        Ok(verify_report(&records))
    }

    pub async fn get_stats(&self) -> ApiStatsResponse {
        // Chain lock first and released; handlers that hold the chain lock
        // take the stats lock after it.
        let chain_length = self.blockchain.read().await.len();
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            threats_added: stats.threats_added,
            duplicates_rejected: stats.duplicates_rejected,
            resets: stats.resets,
            uptime_seconds: uptime,
            chain_length,
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    DuplicateThreat,
    IntegrityFailure(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BlockchainError(e) => {
                error!(error = %e, "Chain operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { error: e.to_string() }),
                )
                    .into_response()
            }
            ApiError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg })).into_response()
            }
            ApiError::DuplicateThreat => (
                StatusCode::CONFLICT,
                Json(MessageResponse {
                    message: "Duplicate threat data, block not added".to_string(),
                }),
            )
                .into_response(),
            ApiError::IntegrityFailure(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg })).into_response()
            }
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub length: usize,
    pub chain: Vec<BlockRecord>,
}

#[derive(Serialize)]
pub struct ThreatAddedResponse {
    pub message: String,
    pub new_block: BlockRecord,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub message: String,
    pub chain: Vec<BlockRecord>,
}

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub threats_added: u64,
    pub duplicates_rejected: u64,
    pub resets: u64,
    pub uptime_seconds: u64,
    pub chain_length: usize,
}

const INVALID_THREAT: &str = "Invalid threat data";

/// A submission must be a non-empty JSON object.
fn parse_submission(body: &[u8]) -> Result<ThreatSubmission, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::InvalidInput(INVALID_THREAT.to_string()))?;
    match &value {
        Value::Object(map) if !map.is_empty() => {}
        _ => return Err(ApiError::InvalidInput(INVALID_THREAT.to_string())),
    }
    serde_json::from_value(value).map_err(|e| {
        warn!(error = %e, "Rejected malformed threat submission");
        ApiError::InvalidInput(INVALID_THREAT.to_string())
    })
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    node.api_stats.write().await.record_request(success);

    response
}

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// CORS layer for the configured origins; `"*"` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
}

pub fn build_api_router(node: Arc<Node>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/chain", get(get_chain))
        .route("/threat", post(add_threat))
        .route("/verify", get(verify_chain))
        .route("/reset", post(reset_chain))
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        // logging before stats so we always record timing
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(node.clone(), stats_middleware))
        .with_state(node)
        .layer(cors)
}

pub async fn run_api_server(
    node: Arc<Node>,
    server: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node, cors_layer(&server.cors_origins));

    let addr: SocketAddr = format!("{}:{}", server.host, server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn get_chain(State(node): State<Arc<Node>>) -> Json<ChainResponse> {
    let blockchain = node.blockchain.read().await;
    Json(ChainResponse {
        length: blockchain.len(),
        chain: blockchain.to_records(),
    })
}

async fn add_threat(
    State(node): State<Arc<Node>>,
    body: Bytes,
) -> Result<Json<ThreatAddedResponse>, ApiError> {
    let submission = parse_submission(&body)?;
    let new_block = node
        .add_threat(submission)
        .await?
        .ok_or(ApiError::DuplicateThreat)?;

    Ok(Json(ThreatAddedResponse {
        message: "Threat added successfully!".to_string(),
        new_block,
    }))
}

async fn verify_chain(State(node): State<Arc<Node>>) -> Result<impl IntoResponse, ApiError> {
    let (valid, message) = node.verify().await?;
    if !valid {
        warn!(%message, "Chain verification failed");
        return Err(ApiError::IntegrityFailure(message));
    }
    Ok(Json(MessageResponse { message }))
}

async fn reset_chain(State(node): State<Arc<Node>>) -> Result<Json<ResetResponse>, ApiError> {
    let chain = node.reset().await?;
    Ok(Json(ResetResponse {
        message: "Blockchain reset successfully!".to_string(),
        chain,
    }))
}

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let length = node.blockchain.read().await.len();
    Json(serde_json::json!({
        "status": "healthy",
        "length": length,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_api_stats(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.get_stats().await)
}

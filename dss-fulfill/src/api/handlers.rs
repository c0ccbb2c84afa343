//! HTTP request handlers

use crate::api::server::AppContext;
use crate::buckets::{Bucket, BucketCounts, PublishedBuckets};
use crate::client::{ActiveRecordsPage, ActiveRecordsQuery, DatasheetQuery};
use crate::error::Error;
use crate::record::{DocType, Record};
use crate::session::SessionStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    bucket: Bucket,
    revision: u64,
    published_at: DateTime<Utc>,
    records: Vec<Record>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    #[serde(flatten)]
    session: SessionStatus,
    revision: u64,
    counts: BucketCounts,
    /// tier1 + tier2 + tier3
    pending: usize,
}

#[derive(Debug, Serialize)]
pub struct ManufacturersResponse {
    manufacturers: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    clients: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct MatchesResponse {
    matches: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerSearchParams {
    #[serde(default)]
    man_name: String,
}

/// `aka` and `upc` are comma-separated lists
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasheetSearchParams {
    product_identifier: Option<String>,
    man_name: Option<String>,
    aka: Option<String>,
    upc: Option<String>,
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

impl From<DatasheetSearchParams> for DatasheetQuery {
    fn from(params: DatasheetSearchParams) -> Self {
        DatasheetQuery {
            product_identifier: params.product_identifier,
            man_name: params.man_name,
            aka: split_list(params.aka),
            upc: split_list(params.upc),
        }
    }
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(StatusResponse {
            status: message.into(),
        }),
    )
}

/// Map an upstream failure onto a response for the local caller
fn upstream_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Api { status: 404, .. } => StatusCode::NOT_FOUND,
        Error::Api { status: 401 | 403, .. } | Error::Credential(_) => StatusCode::UNAUTHORIZED,
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    warn!(error = %e, status = %status, "Upstream request failed");
    api_error(status, e.to_string())
}

fn parse_doc_type(raw: &str) -> Result<DocType, ApiError> {
    raw.parse::<DocType>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

// ============================================================================
// Health and Status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "dss-fulfill".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
    })
}

/// GET /status - connection state, actor, latest revision, last fetch error
pub async fn get_status(State(ctx): State<AppContext>) -> Json<SessionStatusResponse> {
    let latest = ctx.session.latest();
    Json(SessionStatusResponse {
        session: ctx.session.status(),
        revision: latest.revision,
        counts: latest.counts,
        pending: latest.counts.pending(),
    })
}

/// POST /reload - repeat actor resolution and bulk fetch
pub async fn reload(State(ctx): State<AppContext>) -> Result<StatusCode, ApiError> {
    if ctx.session.reload() {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "session stopped"))
    }
}

// ============================================================================
// Bucket Views
// ============================================================================

/// GET /buckets - latest published snapshot of all five buckets
pub async fn get_buckets(State(ctx): State<AppContext>) -> Json<PublishedBuckets> {
    Json(PublishedBuckets::clone(&ctx.session.latest()))
}

/// GET /buckets/:name - one bucket of the latest snapshot
pub async fn get_bucket(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = name
        .parse::<Bucket>()
        .map_err(|_| api_error(StatusCode::NOT_FOUND, format!("unknown bucket '{}'", name)))?;

    let latest = ctx.session.latest();
    Ok(Json(BucketResponse {
        bucket,
        revision: latest.revision,
        published_at: latest.published_at,
        records: latest.views.get(bucket).to_vec(),
    }))
}

// ============================================================================
// Records
// ============================================================================

/// GET /records/:doc_type/:id - full record detail from the backend
pub async fn get_record(
    State(ctx): State<AppContext>,
    Path((doc_type, id)): Path<(String, String)>,
) -> Result<Json<Record>, ApiError> {
    let doc_type = parse_doc_type(&doc_type)?;
    let record = ctx
        .client
        .fetch_record(doc_type, &id)
        .await
        .map_err(upstream_error)?;
    Ok(Json(record))
}

/// POST /records/:doc_type/:id/queue
///
/// Forwards to the backend. Local views change only when the resulting
/// update arrives on the live feed.
pub async fn queue_record(
    State(ctx): State<AppContext>,
    Path((doc_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let doc_type = parse_doc_type(&doc_type)?;
    info!(%doc_type, record_id = %id, "Queue requested");
    ctx.client
        .queue(doc_type, &id)
        .await
        .map_err(upstream_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /records/:doc_type/:id/dequeue
pub async fn dequeue_record(
    State(ctx): State<AppContext>,
    Path((doc_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let doc_type = parse_doc_type(&doc_type)?;
    info!(%doc_type, record_id = %id, "Dequeue requested");
    ctx.client
        .dequeue(doc_type, &id)
        .await
        .map_err(upstream_error)?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Reference Data
// ============================================================================

/// GET /manufacturers
pub async fn get_manufacturers(
    State(ctx): State<AppContext>,
) -> Result<Json<ManufacturersResponse>, ApiError> {
    let manufacturers = ctx.client.fetch_manufacturers().await.map_err(upstream_error)?;
    Ok(Json(ManufacturersResponse { manufacturers }))
}

/// GET /manufacturers/search?manName=
pub async fn search_manufacturers(
    State(ctx): State<AppContext>,
    Query(params): Query<ManufacturerSearchParams>,
) -> Result<Json<MatchesResponse>, ApiError> {
    let matches = ctx
        .client
        .search_manufacturers(&params.man_name)
        .await
        .map_err(upstream_error)?;
    Ok(Json(MatchesResponse { matches }))
}

/// GET /clients
pub async fn get_clients(State(ctx): State<AppContext>) -> Result<Json<ClientsResponse>, ApiError> {
    let clients = ctx.client.fetch_clients().await.map_err(upstream_error)?;
    Ok(Json(ClientsResponse { clients }))
}

/// GET /datasheets/search?productIdentifier=&manName=&aka=&upc=
pub async fn search_datasheets(
    State(ctx): State<AppContext>,
    Query(params): Query<DatasheetSearchParams>,
) -> Result<Json<MatchesResponse>, ApiError> {
    let query = DatasheetQuery::from(params);
    let matches = ctx
        .client
        .search_datasheets(&query)
        .await
        .map_err(upstream_error)?;
    Ok(Json(MatchesResponse { matches }))
}

/// GET /active-records?page=&limit=&search=&sortBy=&sortOrder=
pub async fn get_active_records(
    State(ctx): State<AppContext>,
    Query(query): Query<ActiveRecordsQuery>,
) -> Result<Json<ActiveRecordsPage>, ApiError> {
    let page = ctx
        .client
        .fetch_active_records(&query)
        .await
        .map_err(upstream_error)?;
    Ok(Json(page))
}

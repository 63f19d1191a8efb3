use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::http::server::AppState;
use crate::routing::{Mappings, RouteDocument, RouteMapping};

const DEFAULT_HISTORY: usize = 10;
const MAX_HISTORY: usize = 100;

/// Failure of an admin call, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum AdminError {
    BadRequest(&'static str),
    Store(StoreError),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        AdminError::Store(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            AdminError::Store(err) => {
                let message = match &err {
                    StoreError::VersionConflict { .. } => "Version conflict".to_string(),
                    StoreError::NoPreviousVersion => "No previous version".to_string(),
                    StoreError::NotFound(_) => "Target version not found".to_string(),
                    other => other.to_string(),
                };
                if err.status_code().is_server_error() {
                    tracing::error!(error = %err, "Admin request failed");
                }
                (err.status_code(), message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
pub struct VersionReply {
    pub version: String,
}

#[derive(Serialize)]
pub struct MappingsReply {
    pub version: Option<String>,
    pub mappings: Mappings,
}

#[derive(Deserialize)]
struct PutMappingBody {
    upstream: Option<String>,
    #[serde(rename = "pathPrefix", default)]
    path_prefix: Option<String>,
}

#[derive(Deserialize)]
struct BatchDeleteBody {
    subdomains: Vec<String>,
}

#[derive(Deserialize)]
struct ImportBody {
    mappings: Mappings,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// `If-Match`, without ETag quotes.
fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get("if-match")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// The caller's precondition, defaulting to the version the edit was based on.
fn expected_version(headers: &HeaderMap, loaded: Option<&str>) -> Option<String> {
    if_match(headers).or_else(|| loaded.map(str::to_owned))
}

/// `toVersion` as a string; numbers are accepted.
fn rollback_target(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("toVersion")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn publish(
    state: &AppState,
    editor: &str,
    mappings: Mappings,
    expected: Option<String>,
) -> Result<Json<VersionReply>, AdminError> {
    let version = state
        .routes
        .publish(editor, mappings, expected.as_deref())
        .await?;
    Ok(Json(VersionReply { version }))
}

pub async fn list_mappings(State(state): State<AppState>) -> Json<MappingsReply> {
    let loaded = state.routes.load().await;
    Json(MappingsReply {
        version: loaded.version,
        mappings: loaded.mappings.as_ref().clone(),
    })
}

pub async fn put_mapping(
    State(state): State<AppState>,
    Path(sub): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VersionReply>, AdminError> {
    let upstream = serde_json::from_slice::<PutMappingBody>(&body)
        .ok()
        .and_then(|b| b.upstream.filter(|u| !u.is_empty()).map(|u| (u, b.path_prefix)))
        .ok_or(AdminError::BadRequest("upstream required"));
    let (upstream, path_prefix) = upstream?;

    let loaded = state.routes.load().await;
    let expected = expected_version(&headers, loaded.version.as_deref());
    let mut next = loaded.mappings.as_ref().clone();
    next.insert(
        sub,
        RouteMapping::new(upstream).with_prefix(path_prefix.unwrap_or_default()),
    );
    publish(&state, "manage.put", next, expected).await
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    Path(sub): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VersionReply>, AdminError> {
    let loaded = state.routes.load().await;
    let expected = expected_version(&headers, loaded.version.as_deref());
    let mut next = loaded.mappings.as_ref().clone();
    next.remove(&sub);
    publish(&state, "manage.delete", next, expected).await
}

pub async fn batch_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AdminError> {
    let request: BatchDeleteBody = serde_json::from_slice(&body)
        .map_err(|_| AdminError::BadRequest("subdomains array required"))?;

    let loaded = state.routes.load().await;
    let mut next = loaded.mappings.as_ref().clone();
    let count = request
        .subdomains
        .iter()
        .filter(|sub| next.remove(sub.as_str()).is_some())
        .count();

    if count == 0 {
        return Ok(Json(json!({
            "version": loaded.version,
            "message": "Nothing to delete",
        })));
    }

    let expected = expected_version(&headers, loaded.version.as_deref());
    let Json(reply) = publish(&state, "manage.batch-delete", next, expected).await?;
    Ok(Json(json!({ "version": reply.version, "count": count })))
}

pub async fn export(State(state): State<AppState>) -> Result<Json<Value>, AdminError> {
    let doc: Option<RouteDocument> = state.routes.export().await?;
    let value = match doc {
        Some(doc) => serde_json::to_value(doc).map_err(StoreError::from)?,
        None => json!({ "version": null, "mappings": {} }),
    };
    Ok(Json(value))
}

pub async fn import(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VersionReply>, AdminError> {
    let request: ImportBody =
        serde_json::from_slice(&body).map_err(|_| AdminError::BadRequest("mappings required"))?;

    let loaded = state.routes.load().await;
    let expected = expected_version(&headers, loaded.version.as_deref());
    publish(&state, "manage.import", request.mappings, expected).await
}

pub async fn rollback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<VersionReply>, AdminError> {
    let target = rollback_target(&body);
    let version = state.routes.rollback(target.as_deref()).await?;
    Ok(Json(VersionReply { version }))
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<RouteDocument>>, AdminError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    Ok(Json(state.routes.history(limit).await?))
}

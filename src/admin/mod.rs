//! Route management API, mounted under `/manage/api`.
//!
//! Every route is bearer-authenticated and answered with
//! `Cache-Control: no-store`. Writes go through the route store's
//! compare-and-publish with `If-Match` (or the version just read) as the
//! precondition.

pub mod auth;
pub mod handlers;

use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::{set_header::SetResponseHeaderLayer, timeout::TimeoutLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

#[allow(deprecated)]
pub fn router(state: AppState, request_timeout: Duration) -> Router<AppState> {
    Router::new()
        .route("/mappings", get(list_mappings))
        .route("/mappings/{sub}", put(put_mapping).delete(delete_mapping))
        .route("/batch-delete", post(batch_delete))
        .route("/export", get(export))
        .route("/import", post(import))
        .route("/rollback", post(rollback))
        .route("/history", get(history))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

use crate::{GIT_COMMIT_HASH, auth::AuthState};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    cache: String,
    database: String,
}

fn status_label(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}

#[utoipa::path(
    get,
    path = "/health",
    responses (
        (status = 200, description = "Cache and database are healthy", body = [Health]),
        (status = 503, description = "Cache or database is unhealthy", body = [Health])
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let cache_span = info_span!("cache.ping", db.system = "redis", db.operation = "PING");
    let cache_ok = match state.cache().ping().instrument(cache_span).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping cache: {err}");
            false
        }
    };

    let db_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    let database_ok = match state.directory().ping().instrument(db_span).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: status_label(cache_ok),
        database: status_label(database_ok),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or_default();

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(x_app) => {
            debug!("X-App header: {:?}", x_app);
            headers.insert("X-App", x_app);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    if cache_ok && database_ok {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

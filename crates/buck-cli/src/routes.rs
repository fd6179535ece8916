//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    middleware as axum_middleware,
    response::Response,
    routing::{delete, get, head, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Service endpoints
        .route("/", get(handlers::list_buckets))
        .route("/", head(handlers::health_check))
        // Bucket endpoints
        .route("/{bucket}", put(handlers::create_bucket))
        .route("/{bucket}", delete(handlers::delete_bucket))
        .route("/{bucket}", head(handlers::head_bucket))
        .route("/{bucket}", get(bucket_get_handler))
        // Object endpoints
        .route("/{bucket}/{*key}", put(handlers::put_object))
        .route("/{bucket}/{*key}", get(handlers::get_object))
        .route("/{bucket}/{*key}", head(handlers::head_object))
        .route("/{bucket}/{*key}", delete(handlers::delete_object))
        // Apply middleware
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    let router = if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);
        router.layer(cors)
    } else {
        router
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct BucketQueryParams {
    location: Option<String>,
    prefix: Option<String>,
    #[serde(rename = "max-keys")]
    max_keys: Option<usize>,
}

/// Handler that routes to list objects or get bucket location
async fn bucket_get_handler(
    state: State<Arc<AppState>>,
    path: Path<String>,
    Query(query): Query<BucketQueryParams>,
) -> Result<Response, crate::ApiError> {
    if query.location.is_some() {
        handlers::get_bucket_location(state, path).await
    } else {
        let list_params = handlers::ListObjectsParams {
            prefix: query.prefix,
            max_keys: query.max_keys,
        };
        handlers::list_objects(state, path, Query(list_params)).await
    }
}

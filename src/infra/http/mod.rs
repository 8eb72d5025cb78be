mod compile;
mod middleware;

pub use compile::HttpState;
pub use middleware::REQUEST_ID_HEADER;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
};
use latexd_api_types::{HealthResponse, StatusResponse};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::{CorsSettings, Settings};

use middleware::{log_responses, set_request_context};

pub fn build_router(state: HttpState, settings: &Settings) -> Router {
    let body_limit = usize::try_from(settings.uploads.max_request_bytes.get()).unwrap_or(usize::MAX);

    let router = Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/compile", post(compile::compile_upload))
        .route("/compile-text", post(compile::compile_text))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context));

    match cors_layer(&settings.cors) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse::up())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

fn cors_layer(settings: &CorsSettings) -> Option<CorsLayer> {
    let origin = match settings {
        CorsSettings::Disabled => return None,
        CorsSettings::AnyOrigin => AllowOrigin::from(Any),
        CorsSettings::AllowList(origins) => {
            let values = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(
                            target = "latexd::http::cors",
                            origin = %origin,
                            error = %err,
                            "Ignoring unusable CORS origin"
                        );
                        None
                    }
                })
                .collect::<Vec<_>>();
            AllowOrigin::list(values)
        }
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any),
    )
}

use std::error::Error;

use axum::{Router, http::Method, middleware, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler::{AppState, healthcheck};

pub mod api;
pub mod auth;
pub mod blog;
pub mod catalog;
pub mod config;
pub mod crud;
pub mod db;
pub mod error;
pub mod handler;
pub mod library;
pub mod model;
pub mod query;

#[cfg(test)]
mod test_support;

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

/// The whole service: JSON catalog and admin API under `/api`, the blog
/// under `/blog`, and the library pages at the root.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let api = catalog::routes()
        .merge(library::api_routes())
        .nest("/auth", auth::routes());

    Router::new()
        .route("/", get(healthcheck))
        .nest("/api", api)
        .nest("/blog", blog::routes())
        .merge(library::routes())
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let app = TestApp::new().await;
        let (status, body) = app.json(Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[test]
    fn unpack_error_joins_the_source_chain() {
        let inner = std::io::Error::other("disk gone");
        let outer = anyhow::Error::new(inner).context("reading config");
        assert_eq!(crate::unpack_error(outer.as_ref()), "reading config: disk gone");
    }
}

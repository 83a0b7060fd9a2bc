use std::sync::Arc;

use axum::{Json, response::IntoResponse};
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub token_ttl_hours: i64,
    pub page_size: u32,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        AppState {
            db,
            token_ttl_hours: config.app.token_ttl_hours,
            page_size: config.app.page_size,
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(json!({ "status": "ok" }))
}

use axum::{
    Router,
    routing::{get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register/", post(handler::register))
        .route("/token/", post(handler::obtain_token))
        .route("/token/revoke/", post(handler::revoke_token))
        .route("/me/", get(handler::me))
}

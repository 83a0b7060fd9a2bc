use axum::{
    Router,
    routing::{get, post},
};

use super::handler::{Comments, Posts, create_comment, posts_by_tag, show_profile, update_profile};
use crate::crud::{self, CrudPaths};
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(crud::routes::<Posts>(CrudPaths {
            list: Some("/posts/"),
            detail: Some("/posts/:id/"),
            create: Some("/posts/new/"),
            update: Some("/posts/:id/update/"),
            delete: Some("/posts/:id/delete/"),
        }))
        .merge(crud::routes::<Comments>(CrudPaths {
            list: Some("/comments/"),
            detail: Some("/comments/:id/"),
            create: None,
            update: Some("/comments/:id/update/"),
            delete: Some("/comments/:id/delete/"),
        }))
        .route("/posts/:id/comments/new/", post(create_comment))
        .route("/tags/:name/", get(posts_by_tag))
        .route("/profile/", get(show_profile).put(update_profile))
}

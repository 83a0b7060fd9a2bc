use axum::Router;

use super::handler::{Authors, Books};
use crate::crud::{self, CrudPaths};
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(crud::routes::<Books>(CrudPaths {
            list: Some("/books/"),
            detail: Some("/books/:id/"),
            create: Some("/books/create/"),
            update: Some("/books/update/:id/"),
            delete: Some("/books/delete/:id/"),
        }))
        .merge(crud::routes::<Authors>(CrudPaths {
            list: Some("/authors/"),
            detail: Some("/authors/:id/"),
            create: Some("/authors/create/"),
            update: Some("/authors/update/:id/"),
            delete: Some("/authors/delete/:id/"),
        }))
}

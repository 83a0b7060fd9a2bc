use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    routing::{MethodRouter, get, post},
};

use super::handler::{Librarians, Libraries};
use super::pages;
use crate::auth::{require_permission, require_role};
use crate::crud::{self, CrudPaths};
use crate::handler::AppState;
use crate::model::{Permission, Role};

fn with_role(role: Role, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn(move |request: Request, next: Next| {
        require_role(role, request, next)
    }))
}

fn with_permission(permission: Permission, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn(move |request: Request, next: Next| {
        require_permission(permission, request, next)
    }))
}

/// HTML pages, mounted at the root.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/books/", get(pages::list_books))
        .route("/bookshelf/books/", with_permission(Permission::CanView, get(pages::list_books)))
        .route(
            "/add_book/add/",
            with_permission(Permission::CanCreate, get(pages::add_book_form).post(pages::add_book)),
        )
        .route(
            "/edit_book/:id/edit/",
            with_permission(Permission::CanEdit, get(pages::edit_book_form).post(pages::edit_book)),
        )
        .route(
            "/delete_book/:id/delete/",
            with_permission(Permission::CanDelete, post(pages::delete_book)),
        )
        .route("/libraries/:id/", get(pages::library_detail))
        .route("/search/", get(pages::search))
        .route("/register/", get(pages::register_form).post(pages::register))
        .route("/login/", get(pages::login_form).post(pages::login))
        .route("/logout/", get(pages::logout).post(pages::logout))
        .route("/admin-view/", with_role(Role::Admin, get(pages::admin_view)))
        .route("/librarian-view/", with_role(Role::Librarian, get(pages::librarian_view)))
        .route("/member-view/", with_role(Role::Member, get(pages::member_view)))
        .layer(middleware::from_fn(pages::html_errors))
}

/// Admin JSON, mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(crud::routes::<Libraries>(CrudPaths {
            list: Some("/libraries/"),
            detail: Some("/libraries/:id/"),
            create: Some("/libraries/create/"),
            update: Some("/libraries/update/:id/"),
            delete: Some("/libraries/delete/:id/"),
        }))
        .merge(crud::routes::<Librarians>(CrudPaths {
            list: Some("/librarians/"),
            detail: Some("/librarians/:id/"),
            create: Some("/librarians/create/"),
            update: Some("/librarians/update/:id/"),
            delete: Some("/librarians/delete/:id/"),
        }))
}

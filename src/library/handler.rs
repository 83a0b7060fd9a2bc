//! Admin JSON surface for libraries and their librarians.

use async_trait::async_trait;

use super::lib::{
    Holdings, Librarian, LibrarianInput, LibrarianPatch, Library, LibraryDetail, LibraryInput, LibraryPatch,
};
use crate::api::PageRequest;
use crate::auth::{Policy, Principal};
use crate::crud::Resource;
use crate::db::Database;
use crate::error::FieldErrors;
use crate::model::Role;
use crate::query::{Clauses, FieldKind, Filter, OrderField, QuerySpec};

pub const LIBRARY_QUERY: QuerySpec = QuerySpec {
    filters: &[Filter { param: "name", predicate: "libraries.name = ?", kind: FieldKind::Text }],
    search: &["libraries.name"],
    ordering: &[
        OrderField { param: "name", column: "libraries.name" },
        OrderField { param: "id", column: "libraries.id" },
    ],
    default_ordering: None,
    primary_key: "libraries.id",
};

pub const LIBRARIAN_QUERY: QuerySpec = QuerySpec {
    filters: &[Filter { param: "library", predicate: "librarians.library_id = ?", kind: FieldKind::Integer }],
    search: &["librarians.name"],
    ordering: &[
        OrderField { param: "name", column: "librarians.name" },
        OrderField { param: "id", column: "librarians.id" },
    ],
    default_ordering: None,
    primary_key: "librarians.id",
};

pub struct Libraries;

#[async_trait]
impl Resource for Libraries {
    type Record = Library;
    type Detail = LibraryDetail;
    type Input = LibraryInput;
    type Patch = LibraryPatch;

    const NAME: &'static str = "library";
    const POLICY: Policy = Policy::role_writes(Role::Admin);
    const QUERY: QuerySpec = LIBRARY_QUERY;

    fn validate(input: &LibraryInput) -> FieldErrors {
        input.validate()
    }

    fn merge(existing: &Library, patch: LibraryPatch) -> LibraryInput {
        LibraryInput::merged(existing, patch)
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Library>> {
        Holdings::new(db).list_libraries(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Holdings::new(db).count_libraries(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Library>> {
        Holdings::new(db).get_library(id).await
    }

    async fn expand(db: &Database, record: Library) -> anyhow::Result<LibraryDetail> {
        Holdings::new(db).library_detail(record).await
    }

    async fn insert(db: &Database, input: LibraryInput, _author: Option<&Principal>) -> anyhow::Result<Library> {
        Holdings::new(db).create_library(&input).await
    }

    async fn update(db: &Database, id: i64, input: LibraryInput) -> anyhow::Result<Library> {
        Holdings::new(db).update_library(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Holdings::new(db).delete_library(id).await
    }
}

pub struct Librarians;

#[async_trait]
impl Resource for Librarians {
    type Record = Librarian;
    type Detail = Librarian;
    type Input = LibrarianInput;
    type Patch = LibrarianPatch;

    const NAME: &'static str = "librarian";
    const POLICY: Policy = Policy::role_writes(Role::Admin);
    const QUERY: QuerySpec = LIBRARIAN_QUERY;

    fn validate(input: &LibrarianInput) -> FieldErrors {
        input.validate()
    }

    fn merge(existing: &Librarian, patch: LibrarianPatch) -> LibrarianInput {
        LibrarianInput::merged(existing, patch)
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Librarian>> {
        Holdings::new(db).list_librarians(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Holdings::new(db).count_librarians(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Librarian>> {
        Holdings::new(db).get_librarian(id).await
    }

    async fn expand(_db: &Database, record: Librarian) -> anyhow::Result<Librarian> {
        Ok(record)
    }

    async fn insert(db: &Database, input: LibrarianInput, _author: Option<&Principal>) -> anyhow::Result<Librarian> {
        Holdings::new(db).create_librarian(&input).await
    }

    async fn update(db: &Database, id: i64, input: LibrarianInput) -> anyhow::Result<Librarian> {
        Holdings::new(db).update_librarian(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Holdings::new(db).delete_librarian(id).await
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::model::Role;
    use crate::test_support::TestApp;

    #[tokio::test]
    async fn only_admins_manage_libraries() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        let member = app.user("reader", Role::Member, &[]).await;

        let (status, _) = app
            .json(Method::POST, "/api/libraries/create/", None, Some(json!({ "name": "Central Library" })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app
            .json(Method::POST, "/api/libraries/create/", Some(&member), Some(json!({ "name": "Central Library" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, library) = app
            .json(Method::POST, "/api/libraries/create/", Some(&admin), Some(json!({ "name": "Central Library" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(library["books"], json!([]));

        let (status, listed) = app.json(Method::GET, "/api/libraries/", Some(&member), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_second_librarian_for_a_library_is_a_validation_error() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        let (_, library) = app
            .json(Method::POST, "/api/libraries/create/", Some(&admin), Some(json!({ "name": "Central Library" })))
            .await;
        let library_id = library["id"].as_i64().unwrap();

        let (status, ann) = app
            .json(
                Method::POST,
                "/api/librarians/create/",
                Some(&admin),
                Some(json!({ "name": "Ann", "library": library_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ann["library"], library_id);

        let (status, body) = app
            .json(
                Method::POST,
                "/api/librarians/create/",
                Some(&admin),
                Some(json!({ "name": "Ben", "library": library_id })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["fields"]["library"].is_array());

        let (status, detail) = app
            .json(Method::GET, &format!("/api/libraries/{library_id}/"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["librarian"]["name"], "Ann");
    }
}

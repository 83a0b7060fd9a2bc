//! Collection strategies for the catalog API.

use async_trait::async_trait;

use super::lib::{Author, AuthorDetail, AuthorInput, AuthorPatch, Book, BookInput, BookPatch, Catalog, current_year};
use crate::api::PageRequest;
use crate::auth::{Policy, Principal};
use crate::crud::Resource;
use crate::db::Database;
use crate::error::FieldErrors;
use crate::query::{Clauses, FieldKind, Filter, OrderField, QuerySpec};

pub const BOOK_QUERY: QuerySpec = QuerySpec {
    filters: &[
        Filter { param: "title", predicate: "books.title = ?", kind: FieldKind::Text },
        Filter { param: "author", predicate: "books.author_id = ?", kind: FieldKind::Integer },
        Filter { param: "publication_year", predicate: "books.publication_year = ?", kind: FieldKind::Integer },
    ],
    search: &["books.title", "authors.name"],
    ordering: &[
        OrderField { param: "title", column: "books.title" },
        OrderField { param: "publication_year", column: "books.publication_year" },
        OrderField { param: "id", column: "books.id" },
    ],
    default_ordering: None,
    primary_key: "books.id",
};

pub const AUTHOR_QUERY: QuerySpec = QuerySpec {
    filters: &[Filter { param: "name", predicate: "authors.name = ?", kind: FieldKind::Text }],
    search: &["authors.name"],
    ordering: &[
        OrderField { param: "name", column: "authors.name" },
        OrderField { param: "id", column: "authors.id" },
    ],
    default_ordering: None,
    primary_key: "authors.id",
};

pub struct Books;

#[async_trait]
impl Resource for Books {
    type Record = Book;
    type Detail = Book;
    type Input = BookInput;
    type Patch = BookPatch;

    const NAME: &'static str = "book";
    const POLICY: Policy = Policy::read_open_write_authenticated();
    const QUERY: QuerySpec = BOOK_QUERY;

    fn validate(input: &BookInput) -> FieldErrors {
        input.validate(current_year())
    }

    fn merge(existing: &Book, patch: BookPatch) -> BookInput {
        BookInput::merged(existing, patch)
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Book>> {
        Catalog::new(db).list_books(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Catalog::new(db).count_books(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Book>> {
        Catalog::new(db).get_book(id).await
    }

    async fn expand(_db: &Database, record: Book) -> anyhow::Result<Book> {
        Ok(record)
    }

    async fn insert(db: &Database, input: BookInput, _author: Option<&Principal>) -> anyhow::Result<Book> {
        Catalog::new(db).create_book(&input).await
    }

    async fn update(db: &Database, id: i64, input: BookInput) -> anyhow::Result<Book> {
        Catalog::new(db).update_book(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Catalog::new(db).delete_book(id).await
    }
}

pub struct Authors;

#[async_trait]
impl Resource for Authors {
    type Record = Author;
    type Detail = AuthorDetail;
    type Input = AuthorInput;
    type Patch = AuthorPatch;

    const NAME: &'static str = "author";
    const POLICY: Policy = Policy::read_open_write_authenticated();
    const QUERY: QuerySpec = AUTHOR_QUERY;

    fn validate(input: &AuthorInput) -> FieldErrors {
        input.validate()
    }

    fn merge(existing: &Author, patch: AuthorPatch) -> AuthorInput {
        AuthorInput {
            name: patch.name.unwrap_or_else(|| existing.name.clone()),
        }
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Author>> {
        Catalog::new(db).list_authors(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Catalog::new(db).count_authors(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Author>> {
        Catalog::new(db).get_author(id).await
    }

    async fn expand(db: &Database, record: Author) -> anyhow::Result<AuthorDetail> {
        Catalog::new(db).author_detail(record).await
    }

    async fn insert(db: &Database, input: AuthorInput, _author: Option<&Principal>) -> anyhow::Result<Author> {
        Catalog::new(db).create_author(&input).await
    }

    async fn update(db: &Database, id: i64, input: AuthorInput) -> anyhow::Result<Author> {
        Catalog::new(db).update_author(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Catalog::new(db).delete_author(id).await
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{Value, json};

    use super::*;
    use crate::model::Role;
    use crate::test_support::TestApp;

    /// George Orwell plus the three books every catalog test starts from.
    async fn seeded() -> (TestApp, String, i64) {
        let app = TestApp::new().await;
        let token = app.user("tester", Role::Member, &[]).await;
        let (_, author) = app
            .json(Method::POST, "/api/authors/create/", Some(&token), Some(json!({ "name": "George Orwell" })))
            .await;
        let author_id = author["id"].as_i64().unwrap();
        for (title, year) in [("1984", 1949), ("Animal Farm", 1945), ("A Modern Tale", 2020)] {
            let (status, _) = app
                .json(
                    Method::POST,
                    "/api/books/create/",
                    Some(&token),
                    Some(json!({ "title": title, "publication_year": year, "author": author_id })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        (app, token, author_id)
    }

    fn titles(body: &Value) -> Vec<String> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|b| b["title"].as_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn lists_are_open_and_unwrapped() {
        let (app, _, _) = seeded().await;
        let (status, body) = app.json(Method::GET, "/api/books/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&body), vec!["1984", "Animal Farm", "A Modern Tale"]);
    }

    #[tokio::test]
    async fn search_animal_finds_exactly_animal_farm() {
        let (app, _, _) = seeded().await;
        let (status, body) = app.json(Method::GET, "/api/books/?search=Animal", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&body), vec!["Animal Farm"]);

        let (_, body) = app.json(Method::GET, "/api/books/?search=aNiMaL", None, None).await;
        assert_eq!(titles(&body), vec!["Animal Farm"]);

        let (_, body) = app.json(Method::GET, "/api/books/?search=orwell", None, None).await;
        assert_eq!(titles(&body).len(), 3);
    }

    #[tokio::test]
    async fn ordering_is_monotonic_both_ways() {
        let (app, _, _) = seeded().await;
        let (_, body) = app.json(Method::GET, "/api/books/?ordering=publication_year", None, None).await;
        assert_eq!(titles(&body), vec!["Animal Farm", "1984", "A Modern Tale"]);

        let (_, body) = app.json(Method::GET, "/api/books/?ordering=-publication_year", None, None).await;
        assert_eq!(titles(&body), vec!["A Modern Tale", "1984", "Animal Farm"]);

        let (_, body) = app.json(Method::GET, "/api/books/?ordering=-title", None, None).await;
        assert_eq!(titles(&body), vec!["Animal Farm", "A Modern Tale", "1984"]);
    }

    #[tokio::test]
    async fn filters_match_exactly_and_reject_non_integers() {
        let (app, _, author_id) = seeded().await;
        let (_, body) = app.json(Method::GET, "/api/books/?publication_year=1949", None, None).await;
        assert_eq!(titles(&body), vec!["1984"]);

        let (_, body) = app.json(Method::GET, "/api/books/?title=Animal", None, None).await;
        assert!(titles(&body).is_empty());

        let uri = format!("/api/books/?author={author_id}&unknown=1");
        let (_, body) = app.json(Method::GET, &uri, None, None).await;
        assert_eq!(titles(&body).len(), 3);

        let (status, body) = app.json(Method::GET, "/api/books/?publication_year=old", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["fields"]["publication_year"].is_array());
    }

    #[tokio::test]
    async fn created_books_round_trip() {
        let (app, token, author_id) = seeded().await;
        let payload = json!({ "title": "Homage to Catalonia", "publication_year": 1938, "author": author_id });
        let (status, created) = app
            .json(Method::POST, "/api/books/create/", Some(&token), Some(payload))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("/api/books/{}/", created["id"]);
        let (status, fetched) = app.json(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["title"], "Homage to Catalonia");
        assert_eq!(fetched["publication_year"], 1938);
        assert_eq!(fetched["author"], author_id);
    }

    #[tokio::test]
    async fn future_publication_years_are_rejected() {
        let (app, token, author_id) = seeded().await;
        let next_year = current_year() + 1;
        let (status, body) = app
            .json(
                Method::POST,
                "/api/books/create/",
                Some(&token),
                Some(json!({ "title": "Tomorrow", "publication_year": next_year, "author": author_id })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["fields"]["publication_year"][0],
            "Publication year cannot be in the future."
        );

        let (status, _) = app
            .json(
                Method::POST,
                "/api/books/create/",
                Some(&token),
                Some(json!({ "title": "Today", "publication_year": current_year(), "author": author_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn anonymous_writes_are_refused_without_side_effects() {
        let (app, _, author_id) = seeded().await;
        let payload = json!({ "title": "Sneaky", "publication_year": 2000, "author": author_id });

        let (status, _) = app.json(Method::POST, "/api/books/create/", None, Some(payload.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.json(Method::PUT, "/api/books/update/1/", None, Some(payload)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.json(Method::DELETE, "/api/books/delete/1/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, body) = app.json(Method::GET, "/api/books/", None, None).await;
        assert_eq!(titles(&body), vec!["1984", "Animal Farm", "A Modern Tale"]);
    }

    #[tokio::test]
    async fn authenticated_users_update_and_delete() {
        let (app, token, _) = seeded().await;
        let (status, body) = app
            .json(Method::PATCH, "/api/books/update/1/", Some(&token), Some(json!({ "title": "Nineteen Eighty-Four" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Nineteen Eighty-Four");
        assert_eq!(body["publication_year"], 1949);

        let (status, _) = app.json(Method::DELETE, "/api/books/delete/1/", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.json(Method::GET, "/api/books/1/", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.json(Method::DELETE, "/api/books/delete/1/", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn author_detail_embeds_books() {
        let (app, _, author_id) = seeded().await;
        let (status, body) = app
            .json(Method::GET, &format!("/api/authors/{author_id}/"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "George Orwell");
        assert_eq!(body["books"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invalid_tokens_are_unauthorized_even_for_reads() {
        let (app, _, _) = seeded().await;
        let (status, body) = app.json(Method::GET, "/api/books/", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "not_authenticated");
    }
}

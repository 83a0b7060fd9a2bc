use anyhow::Result;
use chrono::{Datelike, Utc};
use libsql::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::api::PageRequest;
use crate::db::Database;
use crate::error::{AppError, FieldErrors};
use crate::query::{Clauses, limit_clause};

pub const NAME_MAX: usize = 200;
pub const TITLE_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

/// An author together with everything they wrote.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorDetail {
    pub id: i64,
    pub name: String,
    pub books: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub publication_year: i64,
    /// Author id.
    pub author: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorInput {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorPatch {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookInput {
    pub title: String,
    pub publication_year: i64,
    pub author: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookPatch {
    pub title: Option<String>,
    pub publication_year: Option<i64>,
    pub author: Option<i64>,
}

pub fn current_year() -> i64 {
    i64::from(Utc::now().year())
}

/// Required, non-blank once trimmed, at most `max` characters.
pub fn required_text(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, "This field may not be blank.");
    } else if value.chars().count() > max {
        errors.add(field, format!("Ensure this field has no more than {max} characters."));
    }
}

pub fn validate_publication_year(year: i64, current_year: i64) -> Result<(), String> {
    if year > current_year {
        return Err("Publication year cannot be in the future.".to_owned());
    }
    Ok(())
}

impl AuthorInput {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "name", &self.name, NAME_MAX);
        errors
    }
}

impl BookInput {
    /// `current_year` is read from the clock by callers at submission time.
    pub fn validate(&self, current_year: i64) -> FieldErrors {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "title", &self.title, TITLE_MAX);
        if let Err(message) = validate_publication_year(self.publication_year, current_year) {
            errors.add("publication_year", message);
        }
        errors
    }

    pub fn merged(existing: &Book, patch: BookPatch) -> Self {
        BookInput {
            title: patch.title.unwrap_or_else(|| existing.title.clone()),
            publication_year: patch.publication_year.unwrap_or(existing.publication_year),
            author: patch.author.unwrap_or(existing.author),
        }
    }
}

const BOOK_COLUMNS: &str = "books.id, books.title, books.publication_year, books.author_id";
const BOOK_FROM: &str = "FROM books JOIN authors ON authors.id = books.author_id";

fn row_to_book(row: &Row) -> Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        publication_year: row.get(2)?,
        author: row.get(3)?,
    })
}

fn row_to_author(row: &Row) -> Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

async fn ensure_author(conn: &Connection, author_id: i64) -> Result<()> {
    let mut rows = conn
        .query("SELECT 1 FROM authors WHERE id = ?", libsql::params![author_id])
        .await?;
    if rows.next().await?.is_none() {
        return Err(AppError::validation(
            "author",
            format!("Invalid pk \"{author_id}\" - object does not exist."),
        )
        .into());
    }
    Ok(())
}

pub struct Catalog<'a> {
    db: &'a Database,
}

impl<'a> Catalog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // ========================================================================
    // Books
    // ========================================================================

    pub async fn list_books(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Book>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!(
            "SELECT {BOOK_COLUMNS} {BOOK_FROM}{}{}{limit}",
            clauses.where_sql(),
            clauses.order_sql()
        );
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;

        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_book(&row)?);
        }
        Ok(books)
    }

    pub async fn count_books(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) {BOOK_FROM}{}", clauses.where_sql());
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let mut rows = self
            .db
            .connection()
            .query(
                &format!("SELECT {BOOK_COLUMNS} {BOOK_FROM} WHERE books.id = ?"),
                libsql::params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_book(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn create_book(&self, input: &BookInput) -> Result<Book> {
        let tx = self.db.begin().await?;
        let result = async {
            ensure_author(tx.connection(), input.author).await?;
            let mut rows = tx
                .connection()
                .query(
                    r#"
                    INSERT INTO books (title, publication_year, author_id)
                    VALUES (?, ?, ?)
                    RETURNING id, title, publication_year, author_id
                    "#,
                    libsql::params![input.title.trim().to_owned(), input.publication_year, input.author],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_book(&row),
                None => anyhow::bail!("failed to create book"),
            }
        }
        .await;
        let book = tx.finish(result).await?;
        tracing::info!(book_id = book.id, title = %book.title, "created book");
        Ok(book)
    }

    pub async fn update_book(&self, id: i64, input: &BookInput) -> Result<Book> {
        let tx = self.db.begin().await?;
        let result = async {
            ensure_author(tx.connection(), input.author).await?;
            let mut rows = tx
                .connection()
                .query(
                    r#"
                    UPDATE books SET title = ?, publication_year = ?, author_id = ?
                    WHERE id = ?
                    RETURNING id, title, publication_year, author_id
                    "#,
                    libsql::params![input.title.trim().to_owned(), input.publication_year, input.author, id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_book(&row),
                None => Err(AppError::not_found(format!("book {id} not found")).into()),
            }
        }
        .await;
        tx.finish(result).await
    }

    pub async fn delete_book(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM books WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    pub async fn books_for_author(&self, author_id: i64) -> Result<Vec<Book>> {
        let mut rows = self
            .db
            .connection()
            .query(
                &format!("SELECT {BOOK_COLUMNS} {BOOK_FROM} WHERE books.author_id = ? ORDER BY books.id"),
                libsql::params![author_id],
            )
            .await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_book(&row)?);
        }
        Ok(books)
    }

    /// Every book whose author carries exactly this name; unknown names yield nothing.
    pub async fn books_by_author(&self, author_name: &str) -> Result<Vec<Book>> {
        let mut rows = self
            .db
            .connection()
            .query(
                &format!("SELECT {BOOK_COLUMNS} {BOOK_FROM} WHERE authors.name = ? ORDER BY books.id"),
                libsql::params![author_name],
            )
            .await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_book(&row)?);
        }
        Ok(books)
    }

    // ========================================================================
    // Authors
    // ========================================================================

    pub async fn list_authors(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Author>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!(
            "SELECT authors.id, authors.name FROM authors{}{}{limit}",
            clauses.where_sql(),
            clauses.order_sql()
        );
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;
        let mut authors = Vec::new();
        while let Some(row) = rows.next().await? {
            authors.push(row_to_author(&row)?);
        }
        Ok(authors)
    }

    pub async fn count_authors(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM authors{}", clauses.where_sql());
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_author(&self, id: i64) -> Result<Option<Author>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT id, name FROM authors WHERE id = ?", libsql::params![id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_author(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn author_detail(&self, author: Author) -> Result<AuthorDetail> {
        let books = self.books_for_author(author.id).await?;
        Ok(AuthorDetail {
            id: author.id,
            name: author.name,
            books,
        })
    }

    pub async fn create_author(&self, input: &AuthorInput) -> Result<Author> {
        let tx = self.db.begin().await?;
        let result = async {
            let mut rows = tx
                .connection()
                .query(
                    "INSERT INTO authors (name) VALUES (?) RETURNING id, name",
                    libsql::params![input.name.trim().to_owned()],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_author(&row),
                None => anyhow::bail!("failed to create author"),
            }
        }
        .await;
        tx.finish(result).await
    }

    pub async fn update_author(&self, id: i64, input: &AuthorInput) -> Result<Author> {
        let tx = self.db.begin().await?;
        let result = async {
            let mut rows = tx
                .connection()
                .query(
                    "UPDATE authors SET name = ? WHERE id = ? RETURNING id, name",
                    libsql::params![input.name.trim().to_owned(), id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_author(&row),
                None => Err(AppError::not_found(format!("author {id} not found")).into()),
            }
        }
        .await;
        tx.finish(result).await
    }

    /// Removes the author and, through the schema cascade, their books.
    pub async fn delete_author(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM authors WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    /// Looks an author up by exact name, creating one when none exists.
    pub async fn get_or_create_author(&self, name: &str) -> Result<Author> {
        let tx = self.db.begin().await?;
        let result = author_for_name(tx.connection(), name).await;
        tx.finish(result).await
    }

    /// Creates a book, filing it under the author with this name (created on demand).
    pub async fn create_book_by_author_name(&self, title: &str, publication_year: i64, author_name: &str) -> Result<Book> {
        let tx = self.db.begin().await?;
        let result = async {
            let author = author_for_name(tx.connection(), author_name).await?;
            let mut rows = tx
                .connection()
                .query(
                    r#"
                    INSERT INTO books (title, publication_year, author_id)
                    VALUES (?, ?, ?)
                    RETURNING id, title, publication_year, author_id
                    "#,
                    libsql::params![title.trim().to_owned(), publication_year, author.id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_book(&row),
                None => anyhow::bail!("failed to create book"),
            }
        }
        .await;
        let book = tx.finish(result).await?;
        tracing::info!(book_id = book.id, title = %book.title, "created book");
        Ok(book)
    }

    pub async fn update_book_by_author_name(
        &self,
        id: i64,
        title: &str,
        publication_year: i64,
        author_name: &str,
    ) -> Result<Book> {
        let tx = self.db.begin().await?;
        let result = async {
            let author = author_for_name(tx.connection(), author_name).await?;
            let mut rows = tx
                .connection()
                .query(
                    r#"
                    UPDATE books SET title = ?, publication_year = ?, author_id = ?
                    WHERE id = ?
                    RETURNING id, title, publication_year, author_id
                    "#,
                    libsql::params![title.trim().to_owned(), publication_year, author.id, id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_book(&row),
                None => Err(AppError::not_found(format!("book {id} not found")).into()),
            }
        }
        .await;
        tx.finish(result).await
    }
}

async fn author_for_name(conn: &Connection, name: &str) -> Result<Author> {
    let name = name.trim();
    let mut rows = conn
        .query(
            "SELECT id, name FROM authors WHERE name = ? ORDER BY id LIMIT 1",
            libsql::params![name],
        )
        .await?;
    if let Some(row) = rows.next().await? {
        return row_to_author(&row);
    }
    let mut rows = conn
        .query(
            "INSERT INTO authors (name) VALUES (?) RETURNING id, name",
            libsql::params![name],
        )
        .await?;
    match rows.next().await? {
        Some(row) => row_to_author(&row),
        None => anyhow::bail!("failed to create author {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::QueryParams;
    use crate::catalog::handler::BOOK_QUERY;

    async fn seeded() -> (Database, Author) {
        let db = Database::in_memory().await.unwrap();
        let catalog = Catalog::new(&db);
        let orwell = catalog
            .create_author(&AuthorInput { name: "George Orwell".into() })
            .await
            .unwrap();
        for (title, year) in [("1984", 1949), ("Animal Farm", 1945), ("A Modern Tale", 2020)] {
            catalog
                .create_book(&BookInput {
                    title: title.into(),
                    publication_year: year,
                    author: orwell.id,
                })
                .await
                .unwrap();
        }
        (db, orwell)
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn publication_year_may_not_be_in_the_future() {
        assert!(validate_publication_year(2024, 2024).is_ok());
        assert!(validate_publication_year(1600, 2024).is_ok());
        assert!(validate_publication_year(2025, 2024).is_err());
    }

    #[test]
    fn book_validation_reports_every_field() {
        let input = BookInput {
            title: "   ".into(),
            publication_year: 3000,
            author: 1,
        };
        let errors = input.validate(2024);
        assert!(errors.get("title").is_some());
        assert_eq!(
            errors.get("publication_year"),
            Some(&["Publication year cannot be in the future.".to_owned()][..])
        );
    }

    #[tokio::test]
    async fn search_and_ordering_go_through_the_query_layer() {
        let (db, _) = seeded().await;
        let catalog = Catalog::new(&db);

        let clauses = BOOK_QUERY.build(&params(&[("search", "animal")])).unwrap();
        let found = catalog.list_books(&clauses, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Animal Farm");
        assert_eq!(catalog.count_books(&clauses).await.unwrap(), 1);

        let clauses = BOOK_QUERY.build(&params(&[("ordering", "-publication_year")])).unwrap();
        let years: Vec<i64> = catalog
            .list_books(&clauses, None)
            .await
            .unwrap()
            .iter()
            .map(|b| b.publication_year)
            .collect();
        assert_eq!(years, vec![2020, 1949, 1945]);
    }

    #[tokio::test]
    async fn books_need_an_existing_author() {
        let (db, _) = seeded().await;
        let err = Catalog::new(&db)
            .create_book(&BookInput {
                title: "Ghost".into(),
                publication_year: 2000,
                author: 999,
            })
            .await
            .unwrap_err();
        match AppError::from(err) {
            AppError::Validation(fields) => assert!(fields.get("author").is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_an_author_cascades_to_books() {
        let (db, orwell) = seeded().await;
        let catalog = Catalog::new(&db);
        assert_eq!(catalog.books_by_author("George Orwell").await.unwrap().len(), 3);

        assert!(catalog.delete_author(orwell.id).await.unwrap());
        let all = BOOK_QUERY.build(&params(&[])).unwrap();
        assert_eq!(catalog.count_books(&all).await.unwrap(), 0);
        assert!(catalog.books_by_author("George Orwell").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_or_create_author_reuses_exact_matches() {
        let (db, orwell) = seeded().await;
        let catalog = Catalog::new(&db);
        assert_eq!(catalog.get_or_create_author(" George Orwell ").await.unwrap(), orwell);
        let huxley = catalog.get_or_create_author("Aldous Huxley").await.unwrap();
        assert_ne!(huxley.id, orwell.id);
        assert_eq!(catalog.get_or_create_author("Aldous Huxley").await.unwrap(), huxley);
    }
}

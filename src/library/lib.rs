use std::collections::BTreeSet;

use anyhow::Result;
use libsql::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::api::PageRequest;
use crate::catalog::{Book, required_text};
use crate::db::Database;
use crate::error::{AppError, FieldErrors};
use crate::query::{Clauses, limit_clause};

pub const NAME_MAX: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Library {
    pub id: i64,
    pub name: String,
    /// Ids of the books on the shelves.
    pub books: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryDetail {
    pub id: i64,
    pub name: String,
    pub books: Vec<BookListing>,
    pub librarian: Option<Librarian>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryInput {
    pub name: String,
    #[serde(default)]
    pub books: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryPatch {
    pub name: Option<String>,
    pub books: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Librarian {
    pub id: i64,
    pub name: String,
    /// Library id.
    pub library: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarianInput {
    pub name: String,
    pub library: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibrarianPatch {
    pub name: Option<String>,
    pub library: Option<i64>,
}

/// A book as the pages show it, with its author's name resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookListing {
    pub id: i64,
    pub title: String,
    pub publication_year: i64,
    pub author: String,
}

impl LibraryInput {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "name", &self.name, NAME_MAX);
        errors
    }

    pub fn merged(existing: &Library, patch: LibraryPatch) -> Self {
        LibraryInput {
            name: patch.name.unwrap_or_else(|| existing.name.clone()),
            books: patch.books.unwrap_or_else(|| existing.books.clone()),
        }
    }
}

impl LibrarianInput {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "name", &self.name, NAME_MAX);
        errors
    }

    pub fn merged(existing: &Librarian, patch: LibrarianPatch) -> Self {
        LibrarianInput {
            name: patch.name.unwrap_or_else(|| existing.name.clone()),
            library: patch.library.unwrap_or(existing.library),
        }
    }
}

const LIBRARY_COLUMNS: &str = "libraries.id, libraries.name, \
    COALESCE((SELECT group_concat(book_id) FROM library_books WHERE library_id = libraries.id), '')";

fn row_to_library(row: &Row) -> Result<Library> {
    let shelf: String = row.get(2)?;
    let books: BTreeSet<i64> = shelf
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::parse::<i64>)
        .collect::<Result<_, _>>()?;
    Ok(Library {
        id: row.get(0)?,
        name: row.get(1)?,
        books: books.into_iter().collect(),
    })
}

fn row_to_librarian(row: &Row) -> Result<Librarian> {
    Ok(Librarian {
        id: row.get(0)?,
        name: row.get(1)?,
        library: row.get(2)?,
    })
}

fn row_to_listing(row: &Row) -> Result<BookListing> {
    Ok(BookListing {
        id: row.get(0)?,
        title: row.get(1)?,
        publication_year: row.get(2)?,
        author: row.get(3)?,
    })
}

const LISTING_SELECT: &str = "SELECT books.id, books.title, books.publication_year, authors.name \
    FROM books JOIN authors ON authors.id = books.author_id";

/// Every id must name an existing book.
async fn check_books(conn: &Connection, books: &[i64]) -> Result<()> {
    for id in books {
        let mut rows = conn.query("SELECT 1 FROM books WHERE id = ?", libsql::params![*id]).await?;
        if rows.next().await?.is_none() {
            return Err(AppError::validation("books", format!("Invalid pk \"{id}\" - object does not exist.")).into());
        }
    }
    Ok(())
}

async fn replace_shelf(conn: &Connection, library_id: i64, books: &[i64]) -> Result<()> {
    conn.execute("DELETE FROM library_books WHERE library_id = ?", libsql::params![library_id])
        .await?;
    for id in books.iter().collect::<BTreeSet<_>>() {
        conn.execute(
            "INSERT INTO library_books (library_id, book_id) VALUES (?, ?)",
            libsql::params![library_id, *id],
        )
        .await?;
    }
    Ok(())
}

async fn fetch_library(conn: &Connection, id: i64) -> Result<Option<Library>> {
    let mut rows = conn
        .query(
            &format!("SELECT {LIBRARY_COLUMNS} FROM libraries WHERE libraries.id = ?"),
            libsql::params![id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_library(&row)?)),
        None => Ok(None),
    }
}

/// Each library has at most one librarian; `except` is the librarian being edited.
async fn check_library_free(conn: &Connection, library_id: i64, except: Option<i64>) -> Result<()> {
    if fetch_library(conn, library_id).await?.is_none() {
        return Err(AppError::validation("library", format!("Invalid pk \"{library_id}\" - object does not exist.")).into());
    }
    let mut rows = conn
        .query("SELECT id FROM librarians WHERE library_id = ?", libsql::params![library_id])
        .await?;
    if let Some(row) = rows.next().await? {
        let holder: i64 = row.get(0)?;
        if Some(holder) != except {
            return Err(AppError::validation("library", "This library already has a librarian.").into());
        }
    }
    Ok(())
}

pub struct Holdings<'a> {
    db: &'a Database,
}

impl<'a> Holdings<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // ========================================================================
    // Libraries
    // ========================================================================

    pub async fn list_libraries(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Library>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!(
            "SELECT {LIBRARY_COLUMNS} FROM libraries{}{}{limit}",
            clauses.where_sql(),
            clauses.order_sql()
        );
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;
        let mut libraries = Vec::new();
        while let Some(row) = rows.next().await? {
            libraries.push(row_to_library(&row)?);
        }
        Ok(libraries)
    }

    pub async fn count_libraries(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM libraries{}", clauses.where_sql());
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_library(&self, id: i64) -> Result<Option<Library>> {
        fetch_library(self.db.connection(), id).await
    }

    pub async fn create_library(&self, input: &LibraryInput) -> Result<Library> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            check_books(conn, &input.books).await?;
            let mut rows = conn
                .query(
                    "INSERT INTO libraries (name) VALUES (?) RETURNING id",
                    libsql::params![input.name.trim().to_owned()],
                )
                .await?;
            let id: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => anyhow::bail!("failed to create library"),
            };
            replace_shelf(conn, id, &input.books).await?;
            fetch_library(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("library {id} vanished after insert"))
        }
        .await;
        let library = tx.finish(result).await?;
        tracing::info!(library_id = library.id, name = %library.name, "created library");
        Ok(library)
    }

    /// Renames the library and replaces its shelf with exactly `input.books`.
    pub async fn update_library(&self, id: i64, input: &LibraryInput) -> Result<Library> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            check_books(conn, &input.books).await?;
            let changed = conn
                .execute(
                    "UPDATE libraries SET name = ? WHERE id = ?",
                    libsql::params![input.name.trim().to_owned(), id],
                )
                .await?;
            if changed == 0 {
                return Err(AppError::not_found(format!("library {id} not found")).into());
            }
            replace_shelf(conn, id, &input.books).await?;
            fetch_library(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("library {id} vanished during update"))
        }
        .await;
        tx.finish(result).await
    }

    pub async fn delete_library(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM libraries WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    pub async fn library_detail(&self, library: Library) -> Result<LibraryDetail> {
        let books = self.shelf(library.id).await?;
        let librarian = self.librarian_for(library.id).await?;
        Ok(LibraryDetail {
            id: library.id,
            name: library.name,
            books,
            librarian,
        })
    }

    async fn shelf(&self, library_id: i64) -> Result<Vec<BookListing>> {
        let mut rows = self
            .db
            .connection()
            .query(
                &format!(
                    "{LISTING_SELECT} JOIN library_books ON library_books.book_id = books.id \
                     WHERE library_books.library_id = ? ORDER BY books.title, books.id"
                ),
                libsql::params![library_id],
            )
            .await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_listing(&row)?);
        }
        Ok(books)
    }

    // ========================================================================
    // Librarians
    // ========================================================================

    pub async fn list_librarians(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Librarian>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!(
            "SELECT librarians.id, librarians.name, librarians.library_id FROM librarians{}{}{limit}",
            clauses.where_sql(),
            clauses.order_sql()
        );
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;
        let mut librarians = Vec::new();
        while let Some(row) = rows.next().await? {
            librarians.push(row_to_librarian(&row)?);
        }
        Ok(librarians)
    }

    pub async fn count_librarians(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM librarians{}", clauses.where_sql());
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_librarian(&self, id: i64) -> Result<Option<Librarian>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, name, library_id FROM librarians WHERE id = ?",
                libsql::params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_librarian(&row)?)),
            None => Ok(None),
        }
    }

    async fn librarian_for(&self, library_id: i64) -> Result<Option<Librarian>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, name, library_id FROM librarians WHERE library_id = ?",
                libsql::params![library_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_librarian(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn create_librarian(&self, input: &LibrarianInput) -> Result<Librarian> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            check_library_free(conn, input.library, None).await?;
            let mut rows = conn
                .query(
                    "INSERT INTO librarians (name, library_id) VALUES (?, ?) RETURNING id, name, library_id",
                    libsql::params![input.name.trim().to_owned(), input.library],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_librarian(&row),
                None => anyhow::bail!("failed to create librarian"),
            }
        }
        .await;
        let librarian = tx.finish(result).await?;
        tracing::info!(librarian_id = librarian.id, library_id = librarian.library, "appointed librarian");
        Ok(librarian)
    }

    pub async fn update_librarian(&self, id: i64, input: &LibrarianInput) -> Result<Librarian> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            check_library_free(conn, input.library, Some(id)).await?;
            let mut rows = conn
                .query(
                    "UPDATE librarians SET name = ?, library_id = ? WHERE id = ? RETURNING id, name, library_id",
                    libsql::params![input.name.trim().to_owned(), input.library, id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => row_to_librarian(&row),
                None => Err(AppError::not_found(format!("librarian {id} not found")).into()),
            }
        }
        .await;
        tx.finish(result).await
    }

    pub async fn delete_librarian(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM librarians WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    // ========================================================================
    // Relationship queries
    // ========================================================================

    /// Books shelved in the library with this exact name; unknown names yield nothing.
    pub async fn books_in_library(&self, library_name: &str) -> Result<Vec<Book>> {
        let mut rows = self
            .db
            .connection()
            .query(
                r#"
                SELECT books.id, books.title, books.publication_year, books.author_id
                FROM books
                JOIN library_books ON library_books.book_id = books.id
                JOIN libraries ON libraries.id = library_books.library_id
                WHERE libraries.name = ?
                ORDER BY books.id
                "#,
                libsql::params![library_name],
            )
            .await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(Book {
                id: row.get(0)?,
                title: row.get(1)?,
                publication_year: row.get(2)?,
                author: row.get(3)?,
            });
        }
        Ok(books)
    }

    /// `None` when the library is unknown or has nobody appointed.
    pub async fn librarian_of_library(&self, library_name: &str) -> Result<Option<Librarian>> {
        let mut rows = self
            .db
            .connection()
            .query(
                r#"
                SELECT librarians.id, librarians.name, librarians.library_id
                FROM librarians
                JOIN libraries ON libraries.id = librarians.library_id
                WHERE libraries.name = ?
                ORDER BY libraries.id
                LIMIT 1
                "#,
                libsql::params![library_name],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_librarian(&row)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Page listings
    // ========================================================================

    /// Every book with its author's name, ordered by title; `title_contains`
    /// narrows to a case-insensitive title match.
    pub async fn listings(&self, title_contains: Option<&str>) -> Result<Vec<BookListing>> {
        let mut rows = match title_contains {
            Some(term) => {
                self.db
                    .connection()
                    .query(
                        &format!(
                            "{LISTING_SELECT} WHERE instr(lower(books.title), lower(?)) > 0 \
                             ORDER BY books.title, books.id"
                        ),
                        libsql::params![term],
                    )
                    .await?
            }
            None => {
                self.db
                    .connection()
                    .query(&format!("{LISTING_SELECT} ORDER BY books.title, books.id"), ())
                    .await?
            }
        };
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_listing(&row)?);
        }
        Ok(books)
    }

    pub async fn listing(&self, book_id: i64) -> Result<Option<BookListing>> {
        let mut rows = self
            .db
            .connection()
            .query(&format!("{LISTING_SELECT} WHERE books.id = ?"), libsql::params![book_id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_listing(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AuthorInput, BookInput, Catalog};

    struct Fixture {
        db: Database,
        central: Library,
        books: Vec<Book>,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let catalog = Catalog::new(&db);
        let doe = catalog.create_author(&AuthorInput { name: "John Doe".into() }).await.unwrap();
        let roe = catalog.create_author(&AuthorInput { name: "Jane Roe".into() }).await.unwrap();
        let mut books = Vec::new();
        for (title, author) in [("First Light", doe.id), ("Second Wind", doe.id), ("Other Hands", roe.id)] {
            books.push(
                catalog
                    .create_book(&BookInput {
                        title: title.into(),
                        publication_year: 1999,
                        author,
                    })
                    .await
                    .unwrap(),
            );
        }
        let central = Holdings::new(&db)
            .create_library(&LibraryInput {
                name: "Central Library".into(),
                books: vec![books[2].id, books[0].id, books[0].id],
            })
            .await
            .unwrap();
        Fixture { db, central, books }
    }

    #[tokio::test]
    async fn shelves_deduplicate_and_sort_book_ids() {
        let f = fixture().await;
        assert_eq!(f.central.books, vec![f.books[0].id, f.books[2].id]);

        let detail = Holdings::new(&f.db).library_detail(f.central.clone()).await.unwrap();
        let titles: Vec<&str> = detail.books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["First Light", "Other Hands"]);
        assert_eq!(detail.books[1].author, "Jane Roe");
        assert!(detail.librarian.is_none());
    }

    #[tokio::test]
    async fn relationship_queries_resolve_by_name() {
        let f = fixture().await;
        let libraries = Holdings::new(&f.db);

        let by_doe = Catalog::new(&f.db).books_by_author("John Doe").await.unwrap();
        assert_eq!(by_doe.len(), 2);

        let shelved = libraries.books_in_library("Central Library").await.unwrap();
        assert_eq!(shelved.len(), 2);
        assert!(libraries.books_in_library("Nowhere").await.unwrap().is_empty());

        assert!(libraries.librarian_of_library("Central Library").await.unwrap().is_none());
        let ann = libraries
            .create_librarian(&LibrarianInput {
                name: "Ann".into(),
                library: f.central.id,
            })
            .await
            .unwrap();
        assert_eq!(libraries.librarian_of_library("Central Library").await.unwrap(), Some(ann));
        assert!(libraries.librarian_of_library("Nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_librarian_per_library() {
        let f = fixture().await;
        let libraries = Holdings::new(&f.db);
        let ann = libraries
            .create_librarian(&LibrarianInput { name: "Ann".into(), library: f.central.id })
            .await
            .unwrap();
        let err = libraries
            .create_librarian(&LibrarianInput { name: "Ben".into(), library: f.central.id })
            .await
            .unwrap_err();
        match AppError::from(err) {
            AppError::Validation(fields) => assert!(fields.get("library").is_some()),
            other => panic!("unexpected {other:?}"),
        }

        let renamed = libraries
            .update_librarian(ann.id, &LibrarianInput { name: "Annie".into(), library: f.central.id })
            .await
            .unwrap();
        assert_eq!(renamed.name, "Annie");
    }

    #[tokio::test]
    async fn shelves_are_replaced_wholesale_and_follow_book_deletes() {
        let f = fixture().await;
        let libraries = Holdings::new(&f.db);
        let updated = libraries
            .update_library(
                f.central.id,
                &LibraryInput { name: "Central Library".into(), books: vec![f.books[1].id] },
            )
            .await
            .unwrap();
        assert_eq!(updated.books, vec![f.books[1].id]);

        Catalog::new(&f.db).delete_book(f.books[1].id).await.unwrap();
        let reloaded = libraries.get_library(f.central.id).await.unwrap().unwrap();
        assert!(reloaded.books.is_empty());
    }

    #[tokio::test]
    async fn listings_search_titles_case_insensitively() {
        let f = fixture().await;
        let libraries = Holdings::new(&f.db);
        assert_eq!(libraries.listings(None).await.unwrap().len(), 3);
        let found = libraries.listings(Some("LIGHT")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].author, "John Doe");
    }
}

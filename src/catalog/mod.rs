//! Catalog Module
//!
//! The book catalog API: authors and the books they wrote. Reads are open
//! to everyone; any signed-in user may create, change or remove records.
//!
//! Book lists accept `title`, `author` and `publication_year` filters,
//! a `search` term matched against titles and author names, and an
//! `ordering` over `title`, `publication_year` or `id` (prefix `-` for
//! descending).
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .nest("/api", catalog::routes())
//!     .with_state(app_state);
//!
//! let books = catalog::Catalog::new(&db).books_by_author("George Orwell").await?;
//! ```

mod handler;
mod lib;
mod routes;

pub use handler::{AUTHOR_QUERY, Authors, BOOK_QUERY, Books};
pub use lib::*;
pub use routes::routes;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("catalog_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}

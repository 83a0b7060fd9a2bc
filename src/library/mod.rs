//! Library Module
//!
//! The library catalog as people use it in a browser: book lists, a title
//! search, library pages with their shelves and librarian, and book
//! management gated by the named permissions `can_create`, `can_edit` and
//! `can_delete`. Each role has its own dashboard page; visiting another
//! role's dashboard is a 403.
//!
//! Libraries and librarians are administered over JSON by Admin users, see
//! [`api_routes`]. Relationship lookups (books by author, books in a
//! library, the librarian of a library) are on [`Holdings`] and
//! [`Catalog`](crate::catalog::Catalog).

mod handler;
mod lib;
mod pages;
mod routes;
mod views;

pub use handler::{LIBRARIAN_QUERY, LIBRARY_QUERY, Librarians, Libraries};
pub use lib::*;
pub use routes::{api_routes, routes};

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("library_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}

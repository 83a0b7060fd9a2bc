//! Page markup. Everything is rendered with `maud` at compile time.

use axum::http::StatusCode;
use maud::{DOCTYPE, Markup, html};

use super::lib::{BookListing, LibraryDetail};
use crate::auth::Principal;
use crate::error::FieldErrors;
use crate::model::{Permission, Role};

/// Values a book form is re-rendered with.
#[derive(Debug, Clone, Default)]
pub struct BookFields<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub publication_year: &'a str,
}

fn layout(title: &str, viewer: Option<&Principal>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { (title) " | Lectern" }
            }
            body {
                nav {
                    a href="/books/" { "Books" }
                    " | "
                    a href="/search/" { "Search" }
                    " | "
                    @if let Some(principal) = viewer {
                        a href=(dashboard_path(principal.user.role)) { "Dashboard" }
                        " | "
                        span { "Signed in as " (principal.user.username) }
                        form method="post" action="/logout/" style="display:inline" {
                            button type="submit" { "Log out" }
                        }
                    } @else {
                        a href="/login/" { "Log in" }
                        " | "
                        a href="/register/" { "Register" }
                    }
                }
                main {
                    h1 { (title) }
                    (content)
                }
            }
        }
    }
}

pub fn dashboard_path(role: Role) -> &'static str {
    match role {
        Role::Admin => "/admin-view/",
        Role::Librarian => "/librarian-view/",
        Role::Member => "/member-view/",
    }
}

fn errors_for(errors: &FieldErrors, field: &str) -> Markup {
    html! {
        @if let Some(messages) = errors.get(field) {
            ul class="errors" {
                @for message in messages {
                    li { (message) }
                }
            }
        }
    }
}

fn book_rows(books: &[BookListing], viewer: Option<&Principal>) -> Markup {
    let can_edit = viewer.is_some_and(|p| p.has_permission(Permission::CanEdit));
    let can_delete = viewer.is_some_and(|p| p.has_permission(Permission::CanDelete));
    html! {
        @if books.is_empty() {
            p { "No books found." }
        } @else {
            table {
                thead {
                    tr { th { "Title" } th { "Author" } th { "Year" } @if can_edit || can_delete { th {} } }
                }
                tbody {
                    @for book in books {
                        tr {
                            td { (book.title) }
                            td { (book.author) }
                            td { (book.publication_year) }
                            @if can_edit || can_delete {
                                td {
                                    @if can_edit {
                                        a href=(format!("/edit_book/{}/edit/", book.id)) { "Edit" }
                                    }
                                    @if can_delete {
                                        form method="post" action=(format!("/delete_book/{}/delete/", book.id)) style="display:inline" {
                                            button type="submit" { "Delete" }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn book_list(books: &[BookListing], viewer: Option<&Principal>) -> Markup {
    let can_create = viewer.is_some_and(|p| p.has_permission(Permission::CanCreate));
    layout(
        "Books",
        viewer,
        html! {
            @if can_create {
                p { a href="/add_book/add/" { "Add a book" } }
            }
            (book_rows(books, viewer))
        },
    )
}

pub fn book_form(heading: &str, action: &str, viewer: Option<&Principal>, fields: &BookFields, errors: &FieldErrors) -> Markup {
    layout(
        heading,
        viewer,
        html! {
            form method="post" action=(action) {
                p {
                    label for="title" { "Title" }
                    input id="title" name="title" type="text" maxlength="100" required value=(fields.title);
                    (errors_for(errors, "title"))
                }
                p {
                    label for="author" { "Author" }
                    input id="author" name="author" type="text" maxlength="100" required value=(fields.author);
                    (errors_for(errors, "author"))
                }
                p {
                    label for="publication_year" { "Publication year" }
                    input id="publication_year" name="publication_year" type="number" value=(fields.publication_year);
                    (errors_for(errors, "publication_year"))
                }
                button type="submit" { "Save" }
            }
        },
    )
}

pub fn library_detail(library: &LibraryDetail, viewer: Option<&Principal>) -> Markup {
    layout(
        &library.name,
        viewer,
        html! {
            p {
                "Librarian: "
                @match &library.librarian {
                    Some(librarian) => strong { (librarian.name) },
                    None => em { "none appointed" },
                }
            }
            h2 { "Books" }
            (book_rows(&library.books, viewer))
        },
    )
}

pub fn search(query: &str, results: Option<&[BookListing]>, viewer: Option<&Principal>) -> Markup {
    layout(
        "Search books",
        viewer,
        html! {
            form method="get" action="/search/" {
                input name="query" type="search" maxlength="100" value=(query);
                button type="submit" { "Search" }
            }
            @if let Some(results) = results {
                (book_rows(results, viewer))
            }
        },
    )
}

pub fn register(username: &str, email: &str, errors: &FieldErrors) -> Markup {
    layout(
        "Register",
        None,
        html! {
            form method="post" action="/register/" {
                (errors_for(errors, "non_field_errors"))
                p {
                    label for="username" { "Username" }
                    input id="username" name="username" type="text" required value=(username);
                    (errors_for(errors, "username"))
                }
                p {
                    label for="email" { "Email" }
                    input id="email" name="email" type="email" value=(email);
                }
                p {
                    label for="password" { "Password" }
                    input id="password" name="password" type="password" required;
                    (errors_for(errors, "password"))
                }
                p {
                    label for="password_confirmation" { "Password confirmation" }
                    input id="password_confirmation" name="password_confirmation" type="password" required;
                    (errors_for(errors, "password_confirmation"))
                }
                button type="submit" { "Register" }
            }
        },
    )
}

pub fn login(next: &str, error: Option<&str>, viewer: Option<&Principal>) -> Markup {
    layout(
        "Log in",
        viewer,
        html! {
            @if let Some(principal) = viewer {
                p { "You are signed in as " (principal.user.username) "." }
            }
            @if let Some(error) = error {
                p class="errors" { (error) }
            }
            form method="post" action="/login/" {
                input type="hidden" name="next" value=(next);
                p {
                    label for="username" { "Username" }
                    input id="username" name="username" type="text" required;
                }
                p {
                    label for="password" { "Password" }
                    input id="password" name="password" type="password" required;
                }
                button type="submit" { "Log in" }
            }
        },
    )
}

pub fn logged_out() -> Markup {
    layout(
        "Logged out",
        None,
        html! {
            p { "You have been logged out. " a href="/login/" { "Log in again" } }
        },
    )
}

pub fn dashboard(role: Role, principal: &Principal) -> Markup {
    let title = format!("{role} dashboard");
    layout(
        &title,
        Some(principal),
        html! {
            p { "Welcome, " (principal.user.username) "." }
            @match role {
                Role::Admin => p { "Manage libraries and librarians through the admin API." },
                Role::Librarian => p { "Keep the shelves in order: " a href="/books/" { "all books" } "." },
                Role::Member => p { "Browse the " a href="/books/" { "catalog" } " or " a href="/search/" { "search" } "." },
            }
        },
    )
}

/// `login` links anonymous visitors to the sign-in page.
pub fn error_page(status: StatusCode, message: &str, login: Option<&str>) -> Markup {
    let title = status.canonical_reason().unwrap_or("Error");
    layout(
        title,
        None,
        html! {
            p { (message) }
            @if let Some(login) = login {
                p { a href=(login) { "Log in to continue" } }
            }
        },
    )
}

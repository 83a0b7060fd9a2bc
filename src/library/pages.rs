//! Page handlers for the library catalog.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use maud::Markup;
use serde::Deserialize;

use super::lib::{BookListing, Holdings, NAME_MAX};
use super::views::{self, BookFields};
use crate::api::FormPayload;
use crate::auth::{Accounts, Credentials, CurrentUser, Identity, Registration, SESSION_COOKIE};
use crate::catalog::{Catalog, current_year, required_text, validate_publication_year};
use crate::error::{AppError, ErrorReport, FieldErrors};
use crate::handler::AppState;
use crate::model::Role;

/// Re-renders any error response produced below it as an HTML page with the same status.
pub async fn html_errors(request: Request, next: Next) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let response = next.run(request).await;
    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };
    let login = (report.status == StatusCode::UNAUTHORIZED)
        .then(|| format!("/login/?next={}", urlencoding::encode(&target)));
    (report.status, views::error_page(report.status, &report.message, login.as_deref())).into_response()
}

// ============================================================================
// Books
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct BookForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub publication_year: String,
}

struct CleanBook {
    title: String,
    author: String,
    publication_year: i64,
}

impl BookForm {
    fn fields(&self) -> BookFields<'_> {
        BookFields {
            title: &self.title,
            author: &self.author,
            publication_year: &self.publication_year,
        }
    }

    fn clean(&self, current_year: i64) -> Result<CleanBook, FieldErrors> {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "title", &self.title, NAME_MAX);
        required_text(&mut errors, "author", &self.author, NAME_MAX);
        let year = match self.publication_year.trim().parse::<i64>() {
            Ok(year) => {
                if let Err(message) = validate_publication_year(year, current_year) {
                    errors.add("publication_year", message);
                }
                Some(year)
            }
            Err(_) => {
                errors.add("publication_year", "Enter a whole number.");
                None
            }
        };
        match year {
            Some(publication_year) if errors.is_empty() => Ok(CleanBook {
                title: self.title.trim().to_owned(),
                author: self.author.trim().to_owned(),
                publication_year,
            }),
            _ => Err(errors),
        }
    }
}

fn book_fields(listing: &BookListing) -> (String, String, String) {
    (
        listing.title.clone(),
        listing.author.clone(),
        listing.publication_year.to_string(),
    )
}

async fn find_listing(state: &AppState, id: i64) -> Result<BookListing, AppError> {
    Holdings::new(&state.db)
        .listing(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("book {id} not found")))
}

pub async fn list_books(State(state): State<AppState>, Identity(viewer): Identity) -> Result<Markup, AppError> {
    let books = Holdings::new(&state.db).listings(None).await?;
    Ok(views::book_list(&books, viewer.as_ref()))
}

pub async fn add_book_form(Identity(viewer): Identity) -> Markup {
    views::book_form(
        "Add book",
        "/add_book/add/",
        viewer.as_ref(),
        &BookFields::default(),
        &FieldErrors::new(),
    )
}

pub async fn add_book(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    FormPayload(form): FormPayload<BookForm>,
) -> Result<Response, AppError> {
    let clean = match form.clean(current_year()) {
        Ok(clean) => clean,
        Err(errors) => {
            let page = views::book_form("Add book", "/add_book/add/", viewer.as_ref(), &form.fields(), &errors);
            return Ok((StatusCode::BAD_REQUEST, page).into_response());
        }
    };
    Catalog::new(&state.db)
        .create_book_by_author_name(&clean.title, clean.publication_year, &clean.author)
        .await?;
    Ok(Redirect::to("/books/").into_response())
}

pub async fn edit_book_form(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
) -> Result<Markup, AppError> {
    let listing = find_listing(&state, id).await?;
    let (title, author, publication_year) = book_fields(&listing);
    let fields = BookFields {
        title: &title,
        author: &author,
        publication_year: &publication_year,
    };
    Ok(views::book_form(
        "Edit book",
        &format!("/edit_book/{id}/edit/"),
        viewer.as_ref(),
        &fields,
        &FieldErrors::new(),
    ))
}

pub async fn edit_book(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
    FormPayload(form): FormPayload<BookForm>,
) -> Result<Response, AppError> {
    find_listing(&state, id).await?;
    let clean = match form.clean(current_year()) {
        Ok(clean) => clean,
        Err(errors) => {
            let action = format!("/edit_book/{id}/edit/");
            let page = views::book_form("Edit book", &action, viewer.as_ref(), &form.fields(), &errors);
            return Ok((StatusCode::BAD_REQUEST, page).into_response());
        }
    };
    Catalog::new(&state.db)
        .update_book_by_author_name(id, &clean.title, clean.publication_year, &clean.author)
        .await?;
    Ok(Redirect::to("/books/").into_response())
}

pub async fn delete_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Redirect, AppError> {
    if !Catalog::new(&state.db).delete_book(id).await? {
        return Err(AppError::not_found(format!("book {id} not found")));
    }
    tracing::info!(book_id = id, "deleted book from the library pages");
    Ok(Redirect::to("/books/"))
}

pub async fn library_detail(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
) -> Result<Markup, AppError> {
    let holdings = Holdings::new(&state.db);
    let library = holdings
        .get_library(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("library {id} not found")))?;
    let detail = holdings.library_detail(library).await?;
    Ok(views::library_detail(&detail, viewer.as_ref()))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

/// Title search; an empty query shows the form without results.
pub async fn search(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Query(params): Query<SearchQuery>,
) -> Result<Markup, AppError> {
    let term = params.query.trim();
    if term.is_empty() {
        return Ok(views::search("", None, viewer.as_ref()));
    }
    let results = Holdings::new(&state.db).listings(Some(term)).await?;
    Ok(views::search(term, Some(&results), viewer.as_ref()))
}

// ============================================================================
// Accounts
// ============================================================================

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Only same-site paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") => next,
        _ => "/books/",
    }
}

pub async fn register_form() -> Markup {
    views::register("", "", &FieldErrors::new())
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    FormPayload(mut form): FormPayload<Registration>,
) -> Result<Response, AppError> {
    // The page always asks for the confirmation.
    form.password_confirmation.get_or_insert_with(String::new);
    let username = form.username.clone();
    let email = form.email.clone().unwrap_or_default();

    let accounts = Accounts::new(&state.db);
    let user = match accounts.register(form).await {
        Ok(user) => user,
        Err(err) => match AppError::from(err) {
            AppError::Validation(errors) => {
                let page = views::register(&username, &email, &errors);
                return Ok((StatusCode::BAD_REQUEST, page).into_response());
            }
            other => return Err(other),
        },
    };
    let token = accounts.issue_token(user.id, state.token_ttl_hours).await?;
    Ok((jar.add(session_cookie(token)), Redirect::to("/login/")).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

pub async fn login_form(Identity(viewer): Identity, Query(params): Query<LoginQuery>) -> Markup {
    views::login(safe_next(params.next.as_deref()), None, viewer.as_ref())
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    FormPayload(form): FormPayload<LoginForm>,
) -> Result<Response, AppError> {
    let next = safe_next(form.next.as_deref()).to_owned();
    let accounts = Accounts::new(&state.db);
    let credentials = Credentials {
        username: form.username,
        password: form.password,
    };
    let Some(user) = accounts.check_credentials(&credentials).await? else {
        tracing::warn!(username = %credentials.username, "failed page login");
        let page = views::login(
            &next,
            Some("Please enter a correct username and password."),
            None,
        );
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    };
    let token = accounts.issue_token(user.id, state.token_ttl_hours).await?;
    tracing::info!(user_id = user.id, "signed in");
    Ok((jar.add(session_cookie(token)), Redirect::to(&next)).into_response())
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<Response, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        Accounts::new(&state.db).revoke_token(cookie.value()).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, views::logged_out()).into_response())
}

// ============================================================================
// Dashboards
// ============================================================================

pub async fn admin_view(CurrentUser(principal): CurrentUser) -> Markup {
    views::dashboard(Role::Admin, &principal)
}

pub async fn librarian_view(CurrentUser(principal): CurrentUser) -> Markup {
    views::dashboard(Role::Librarian, &principal)
}

pub async fn member_view(CurrentUser(principal): CurrentUser) -> Markup {
    views::dashboard(Role::Member, &principal)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};

    use super::*;
    use crate::model::Permission;
    use crate::test_support::TestApp;

    #[test]
    fn only_local_next_targets_are_followed() {
        assert_eq!(safe_next(Some("/member-view/")), "/member-view/");
        assert_eq!(safe_next(Some("//evil.example")), "/books/");
        assert_eq!(safe_next(Some("https://evil.example")), "/books/");
        assert_eq!(safe_next(None), "/books/");
    }

    #[test]
    fn book_forms_check_every_field() {
        let form = BookForm {
            title: "".into(),
            author: "Jane Roe".into(),
            publication_year: "soon".into(),
        };
        let errors = form.clean(2024).err().unwrap();
        assert!(errors.get("title").is_some());
        assert!(errors.get("author").is_none());
        assert!(errors.get("publication_year").is_some());

        let future = BookForm {
            title: "Later".into(),
            author: "Jane Roe".into(),
            publication_year: "2025".into(),
        };
        assert!(future.clean(2024).is_err());
    }

    #[tokio::test]
    async fn dashboards_follow_roles() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        let member = app.user("reader", Role::Member, &[]).await;

        let page = app.page(Method::GET, "/admin-view/", Some(&admin), None).await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.body.contains("Admin dashboard"));

        let page = app.page(Method::GET, "/admin-view/", Some(&member), None).await;
        assert_eq!(page.status, StatusCode::FORBIDDEN);
        assert!(page.body.contains("requires the Admin role"));

        let page = app.page(Method::GET, "/member-view/", Some(&member), None).await;
        assert_eq!(page.status, StatusCode::OK);

        let page = app.page(Method::GET, "/librarian-view/", None, None).await;
        assert_eq!(page.status, StatusCode::UNAUTHORIZED);
        assert!(page.body.contains("/login/?next=%2Flibrarian-view%2F"));
    }

    #[tokio::test]
    async fn book_pages_check_named_permissions() {
        let app = TestApp::new().await;
        let creator = app.user("creator", Role::Member, &[Permission::CanCreate]).await;
        let viewer = app.user("viewer", Role::Member, &[Permission::CanView]).await;
        let form = "title=Dune&author=Frank+Herbert&publication_year=1965";

        let page = app.page(Method::POST, "/add_book/add/", Some(&viewer), Some(form)).await;
        assert_eq!(page.status, StatusCode::FORBIDDEN);

        let page = app.page(Method::POST, "/add_book/add/", Some(&creator), Some(form)).await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(page.location(), Some("/books/"));

        let page = app.page(Method::GET, "/books/", None, None).await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.body.contains("Dune"));
        assert!(page.body.contains("Frank Herbert"));

        let page = app.page(Method::POST, "/delete_book/1/delete/", Some(&creator), None).await;
        assert_eq!(page.status, StatusCode::FORBIDDEN);
        let page = app.page(Method::GET, "/edit_book/1/edit/", Some(&creator), None).await;
        assert_eq!(page.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn the_bookshelf_needs_can_view() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        let member = app.user("member", Role::Member, &[]).await;
        let viewer = app.user("viewer", Role::Member, &[Permission::CanView]).await;
        app.page(
            Method::POST,
            "/add_book/add/",
            Some(&admin),
            Some("title=Beloved&author=Toni+Morrison&publication_year=1987"),
        )
        .await;

        let page = app.page(Method::GET, "/bookshelf/books/", None, None).await;
        assert_eq!(page.status, StatusCode::UNAUTHORIZED);
        assert!(page.body.contains("/login/?next=%2Fbookshelf%2Fbooks%2F"));

        let page = app.page(Method::GET, "/bookshelf/books/", Some(&member), None).await;
        assert_eq!(page.status, StatusCode::FORBIDDEN);

        for session in [&viewer, &admin] {
            let page = app.page(Method::GET, "/bookshelf/books/", Some(session), None).await;
            assert_eq!(page.status, StatusCode::OK);
            assert!(page.body.contains("Beloved"));
        }
    }

    #[tokio::test]
    async fn editors_and_deleters_change_books() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        app.page(
            Method::POST,
            "/add_book/add/",
            Some(&admin),
            Some("title=Emma&author=Jane+Austen&publication_year=1815"),
        )
        .await;

        let page = app.page(Method::GET, "/edit_book/1/edit/", Some(&admin), None).await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.body.contains("value=\"Emma\""));

        let page = app
            .page(
                Method::POST,
                "/edit_book/1/edit/",
                Some(&admin),
                Some("title=Persuasion&author=Jane+Austen&publication_year=1817"),
            )
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        let page = app.page(Method::GET, "/search/?query=persua", None, None).await;
        assert!(page.body.contains("Persuasion"));

        let page = app.page(Method::POST, "/delete_book/1/delete/", Some(&admin), None).await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        let page = app.page(Method::POST, "/delete_book/1/delete/", Some(&admin), None).await;
        assert_eq!(page.status, StatusCode::NOT_FOUND);
        assert!(page.body.contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn invalid_book_forms_are_re_rendered() {
        let app = TestApp::new().await;
        let creator = app.user("creator", Role::Member, &[Permission::CanCreate]).await;
        let next_year = current_year() + 1;
        let form = format!("title=Later&author=Someone&publication_year={next_year}");
        let page = app.page(Method::POST, "/add_book/add/", Some(&creator), Some(&form)).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert!(page.body.contains("Publication year cannot be in the future."));
    }

    #[tokio::test]
    async fn register_login_and_logout_manage_the_session_cookie() {
        let app = TestApp::new().await;
        let page = app
            .page(
                Method::POST,
                "/register/",
                None,
                Some("username=newbie&password=correct+horse&password_confirmation=correct+horse&email="),
            )
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert!(page.headers.get(header::SET_COOKIE).is_some());

        let page = app
            .page(
                Method::POST,
                "/login/",
                None,
                Some("username=newbie&password=correct+horse&next=%2Fmember-view%2F"),
            )
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(page.location(), Some("/member-view/"));
        let cookie = page.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap().to_owned();
        let token = cookie
            .strip_prefix("sessionid=")
            .and_then(|rest| rest.split(';').next())
            .unwrap()
            .to_owned();

        let page = app.page(Method::GET, "/member-view/", Some(&token), None).await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.body.contains("Welcome, newbie."));

        let page = app.page(Method::POST, "/logout/", Some(&token), None).await;
        assert_eq!(page.status, StatusCode::OK);
        let page = app.page(Method::GET, "/member-view/", Some(&token), None).await;
        assert_eq!(page.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_credentials_and_mismatched_passwords_stay_on_the_form() {
        let app = TestApp::new().await;
        let page = app
            .page(
                Method::POST,
                "/register/",
                None,
                Some("username=newbie&password=correct+horse&password_confirmation=other+horse"),
            )
            .await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);

        let page = app
            .page(Method::POST, "/login/", None, Some("username=ghost&password=whatever+else"))
            .await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert!(page.body.contains("Please enter a correct username and password."));
    }

    #[tokio::test]
    async fn library_pages_show_shelves_and_librarian() {
        let app = TestApp::new().await;
        let admin = app.user("root", Role::Admin, &[]).await;
        app.page(
            Method::POST,
            "/add_book/add/",
            Some(&admin),
            Some("title=Emma&author=Jane+Austen&publication_year=1815"),
        )
        .await;
        let (_, library) = app
            .json(
                Method::POST,
                "/api/libraries/create/",
                Some(&admin),
                Some(serde_json::json!({ "name": "Central Library", "books": [1] })),
            )
            .await;
        let id = library["id"].as_i64().unwrap();

        let page = app.page(Method::GET, &format!("/libraries/{id}/"), None, None).await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.body.contains("Central Library"));
        assert!(page.body.contains("Emma"));
        assert!(page.body.contains("none appointed"));

        let page = app.page(Method::GET, "/libraries/999/", None, None).await;
        assert_eq!(page.status, StatusCode::NOT_FOUND);
    }
}

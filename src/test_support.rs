//! In-process harness for router tests.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use crate::auth::{Accounts, Registration};
use crate::config::Config;
use crate::db::Database;
use crate::handler::AppState;
use crate::model::{Permission, Role};

pub struct TestApp {
    pub router: Router,
    pub db: Arc<Database>,
}

pub struct PageResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl PageResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers.get(header::LOCATION).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let state = AppState::new(db.clone(), &Config::in_memory());
        TestApp {
            router: crate::app(state),
            db,
        }
    }

    /// Registers a user with the given role and permissions and returns a live token.
    pub async fn user(&self, username: &str, role: Role, permissions: &[Permission]) -> String {
        let accounts = Accounts::new(&self.db);
        let user = accounts
            .register(Registration {
                username: username.to_owned(),
                password: "correct horse".to_owned(),
                password_confirmation: None,
                email: Some(format!("{username}@example.com")),
            })
            .await
            .unwrap();
        accounts.set_role(username, role).await.unwrap();
        for permission in permissions {
            accounts.grant_permission(username, *permission).await.unwrap();
        }
        accounts.issue_token(user.id, 1).await.unwrap()
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Token {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Drives a page route; `session` goes in the session cookie, `form` is urlencoded.
    pub async fn page(&self, method: Method, uri: &str, session: Option<&str>, form: Option<&str>) -> PageResponse {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            request = request.header(header::COOKIE, format!("{}={session}", crate::auth::SESSION_COOKIE));
        }
        let request = match form {
            Some(form) => request
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_owned()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        PageResponse {
            status,
            headers,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }
}

//! Authentication runs once per request, before routing reaches a handler:
//! the credential is resolved to a [`Principal`] and parked in the request
//! extensions. Handlers and guard layers read it back through [`Identity`]
//! and [`CurrentUser`].

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use super::lib::Accounts;
use super::policy::{Principal, Rule, authorize};
use crate::error::AppError;
use crate::handler::AppState;
use crate::model::{Permission, Role};

pub const SESSION_COOKIE: &str = "sessionid";

/// Whoever is making the request, if anyone.
#[derive(Debug, Clone, Default)]
pub struct Identity(pub Option<Principal>);

impl Identity {
    pub fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }
}

/// An authenticated caller; rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Identity>() {
            Some(Identity(Some(principal))) => Ok(CurrentUser(principal.clone())),
            _ => Err(AppError::Unauthenticated),
        }
    }
}

/// Pulls `Token <key>` or `Bearer <key>` out of the Authorization header.
/// Other schemes are not ours and are ignored.
pub fn header_token(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AppError::Unauthenticated)?;
    let mut parts = value.split_whitespace();
    let scheme = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(Some(key.to_owned())),
        _ => Err(AppError::Unauthenticated),
    }
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let accounts = Accounts::new(&state.db);

    let principal = if let Some(token) = header_token(request.headers())? {
        match accounts.resolve_token(&token).await? {
            Some(principal) => Some(principal),
            None => {
                tracing::warn!(path = %request.uri().path(), "rejected invalid or expired token");
                return Err(AppError::Unauthenticated);
            }
        }
    } else if let Some(cookie) = CookieJar::from_headers(request.headers()).get(SESSION_COOKIE) {
        // A stale session cookie just means an anonymous visitor.
        accounts.resolve_token(cookie.value()).await?
    } else {
        None
    };

    request.extensions_mut().insert(Identity(principal));
    Ok(next.run(request).await)
}

fn identity_of(request: &Request) -> Option<&Principal> {
    request.extensions().get::<Identity>().and_then(Identity::principal)
}

/// Guard layer evaluated before the handler. An [`Rule::Owner`] rule can
/// only be settled once the target is loaded, so here it only demands
/// credentials; the handler finishes the check.
pub async fn require_rule(rule: Rule, request: Request, next: Next) -> Result<Response, AppError> {
    let decision = match rule {
        Rule::Owner => authorize(identity_of(&request), Rule::Authenticated, None),
        other => authorize(identity_of(&request), other, None),
    };
    decision.into_result()?;
    Ok(next.run(request).await)
}

/// Guard layer: the caller must hold `role`.
pub async fn require_role(role: Role, request: Request, next: Next) -> Result<Response, AppError> {
    require_rule(Rule::Role(role), request, next).await
}

/// Guard layer: the caller must hold `permission`.
pub async fn require_permission(
    permission: Permission,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_rule(Rule::Permission(permission), request, next).await
}

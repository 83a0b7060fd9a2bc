//! Accounts and access control.
//!
//! Users carry one [`Role`](crate::model::Role) and any number of named
//! [`Permission`](crate::model::Permission)s. Credentials are opaque tokens,
//! presented either as `Authorization: Token <key>` (API clients) or in the
//! `sessionid` cookie (pages). Every decision goes through
//! [`policy::authorize`].

mod handler;
mod lib;
pub mod middleware;
pub mod policy;
mod routes;

pub use lib::*;
pub use middleware::{CurrentUser, Identity, SESSION_COOKIE, authenticate, require_permission, require_role, require_rule};
pub use policy::{Action, Decision, Policy, Principal, Rule, authorize};
pub use routes::routes;

use std::collections::BTreeSet;

use anyhow::Result;
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use libsql::Row;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::policy::Principal;
use crate::db::Database;
use crate::error::{AppError, FieldErrors};
use crate::model::{Permission, Role, User};

const USERNAME_MAX: usize = 150;
const PASSWORD_MIN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    /// Present on the form variant; must match `password` when given.
    #[serde(default)]
    pub password_confirmation: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let username = self.username.trim();
        if username.is_empty() {
            errors.add("username", "This field may not be blank.");
        } else if username.chars().count() > USERNAME_MAX {
            errors.add("username", format!("Ensure this field has no more than {USERNAME_MAX} characters."));
        } else if !username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        {
            errors.add("username", "Enter a valid username: letters, digits and @/./+/-/_ only.");
        }

        if self.password.chars().count() < PASSWORD_MIN {
            errors.add("password", format!("This password is too short. It must contain at least {PASSWORD_MIN} characters."));
        } else if self.password.chars().all(|c| c.is_ascii_digit()) {
            errors.add("password", "This password is entirely numeric.");
        }
        if let Some(confirmation) = &self.password_confirmation {
            if confirmation != &self.password {
                errors.add("password_confirmation", "The two password fields didn't match.");
            }
        }
        if let Some(email) = self.email.as_deref().map(str::trim) {
            if !email.is_empty() && !email.contains('@') {
                errors.add("email", "Enter a valid email address.");
            }
        }
        errors
    }
}

/// Hash a plain password with argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))
}

/// Verify a password against an argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Tokens are handed out once and only their digest is stored.
fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct Accounts<'a> {
    db: &'a Database,
}

impl<'a> Accounts<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn row_to_user(row: &Row) -> Result<User> {
        let role: String = row.get(3)?;
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: role.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            date_joined: row.get(4)?,
        })
    }

    pub async fn register(&self, input: Registration) -> Result<User> {
        input.validate().into_result()?;
        let username = input.username.trim().to_owned();
        let password_hash = hash_password(&input.password)?;
        let email = input.email.unwrap_or_default().trim().to_owned();

        let tx = self.db.begin().await?;
        let result = async {
            let mut taken = tx
                .connection()
                .query("SELECT 1 FROM users WHERE username = ?", libsql::params![username.clone()])
                .await?;
            if taken.next().await?.is_some() {
                return Err(AppError::validation("username", "A user with that username already exists.").into());
            }
            let mut rows = tx
                .connection()
                .query(
                    r#"
                    INSERT INTO users (username, email, password_hash)
                    VALUES (?, ?, ?)
                    RETURNING id, username, email, role, date_joined
                    "#,
                    libsql::params![username, email, password_hash],
                )
                .await?;
            let user = match rows.next().await? {
                Some(row) => Self::row_to_user(&row)?,
                None => anyhow::bail!("failed to create user"),
            };
            tx.connection()
                .execute("INSERT INTO profiles (user_id) VALUES (?)", libsql::params![user.id])
                .await?;
            Ok(user)
        }
        .await;
        let user = tx.finish(result).await?;
        tracing::info!(user_id = user.id, username = %user.username, "registered user");
        Ok(user)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, username, email, role, date_joined FROM users WHERE username = ?",
                libsql::params![username],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, username, email, role, date_joined FROM users WHERE id = ?",
                libsql::params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// `None` on an unknown user or a wrong password; callers must not say which.
    pub async fn check_credentials(&self, credentials: &Credentials) -> Result<Option<User>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, username, email, role, date_joined, password_hash FROM users WHERE username = ?",
                libsql::params![credentials.username.trim()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let hash: String = row.get(5)?;
        if verify_password(&credentials.password, &hash) {
            Ok(Some(Self::row_to_user(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn issue_token(&self, user_id: i64, ttl_hours: i64) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let tx = self.db.begin().await?;
        let result = async {
            let purged = tx
                .connection()
                .execute(
                    "DELETE FROM auth_tokens WHERE user_id = ? AND expires_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    libsql::params![user_id],
                )
                .await?;
            if purged > 0 {
                tracing::debug!(user_id, purged, "dropped expired tokens");
            }
            tx.connection()
                .execute(
                    r#"
                    INSERT INTO auth_tokens (key_hash, user_id, expires_at)
                    VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?))
                    "#,
                    libsql::params![token_digest(&token), user_id, format!("{ttl_hours} hours")],
                )
                .await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;
        Ok(token)
    }

    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM auth_tokens WHERE key_hash = ?", libsql::params![token_digest(token)])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    /// Resolves a live token to its principal. Expired tokens resolve to `None`.
    pub async fn resolve_token(&self, token: &str) -> Result<Option<Principal>> {
        let mut rows = self
            .db
            .connection()
            .query(
                r#"
                SELECT users.id, users.username, users.email, users.role, users.date_joined
                FROM auth_tokens
                JOIN users ON users.id = auth_tokens.user_id
                WHERE auth_tokens.key_hash = ?
                  AND auth_tokens.expires_at > strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                "#,
                libsql::params![token_digest(token)],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let user = Self::row_to_user(&row)?;
        Ok(Some(self.principal_for(user).await?))
    }

    pub async fn principal_for(&self, user: User) -> Result<Principal> {
        let permissions = self.permissions_of(user.id).await?;
        Ok(Principal { user, permissions })
    }

    pub async fn permissions_of(&self, user_id: i64) -> Result<BTreeSet<Permission>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT permission FROM user_permissions WHERE user_id = ? ORDER BY permission",
                libsql::params![user_id],
            )
            .await?;
        let mut permissions = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            match name.parse::<Permission>() {
                Ok(p) => {
                    permissions.insert(p);
                }
                Err(e) => tracing::warn!(user_id, "ignoring stored permission: {}", e),
            }
        }
        Ok(permissions)
    }

    async fn require_user(&self, username: &str) -> Result<User> {
        match self.find_user_by_username(username).await? {
            Some(user) => Ok(user),
            None => Err(AppError::not_found(format!("user {username}")).into()),
        }
    }

    pub async fn grant_permission(&self, username: &str, permission: Permission) -> Result<()> {
        let user = self.require_user(username).await?;
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute(
                "INSERT OR IGNORE INTO user_permissions (user_id, permission) VALUES (?, ?)",
                libsql::params![user.id, permission.as_str()],
            )
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from);
        tx.finish(result).await?;
        tracing::info!(username, permission = %permission, "granted permission");
        Ok(())
    }

    pub async fn revoke_permission(&self, username: &str, permission: Permission) -> Result<()> {
        let user = self.require_user(username).await?;
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute(
                "DELETE FROM user_permissions WHERE user_id = ? AND permission = ?",
                libsql::params![user.id, permission.as_str()],
            )
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from);
        tx.finish(result).await?;
        tracing::info!(username, permission = %permission, "revoked permission");
        Ok(())
    }

    pub async fn set_role(&self, username: &str, role: Role) -> Result<()> {
        let user = self.require_user(username).await?;
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("UPDATE users SET role = ? WHERE id = ?", libsql::params![role.as_str(), user.id])
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from);
        tx.finish(result).await?;
        tracing::info!(username, role = %role, "changed role");
        Ok(())
    }
}

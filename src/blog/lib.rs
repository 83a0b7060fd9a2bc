use anyhow::Result;
use libsql::{Connection, Row, Value};
use serde::{Deserialize, Serialize};

use crate::api::PageRequest;
use crate::catalog::required_text;
use crate::db::{Database, split_comma_separated_string};
use crate::error::{AppError, FieldErrors};
use crate::query::{Clauses, limit_clause};

pub const TITLE_MAX: usize = 100;
pub const TAG_MAX: usize = 30;
const PICTURE_MAX: usize = 100;
const USERNAME_MAX: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub date_posted: String,
    pub updated_at: String,
    /// Author's user id.
    pub author: i64,
    pub author_username: String,
    pub published: bool,
    /// Tag names, sorted.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}

fn published_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    #[serde(default = "published_by_default")]
    pub published: bool,
    /// Comma separated tag names. Absent leaves the current tags alone.
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub published: Option<bool>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub id: i64,
    /// Post id.
    pub post: i64,
    pub author: i64,
    pub author_username: String,
    pub content: String,
    pub date_posted: String,
    pub updated_at: String,
}

/// Only the text is writable; the post comes from the URL a comment is made
/// on and never changes afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentInput {
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentPatch {
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub bio: String,
    pub picture: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub picture: Option<String>,
}

/// Normalizes free-text tags: split on commas, trim, drop blanks, keep the
/// first occurrence of each exact name.
pub fn tag_names(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in split_comma_separated_string(raw) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

impl PostInput {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "title", &self.title, TITLE_MAX);
        if self.content.trim().is_empty() {
            errors.add("content", "This field may not be blank.");
        }
        if let Some(raw) = &self.tags {
            for name in tag_names(raw) {
                if name.chars().count() > TAG_MAX {
                    errors.add("tags", format!("Tag \"{name}\" is longer than {TAG_MAX} characters."));
                }
            }
        }
        errors
    }

    /// Tags are only rewritten when the patch carries them.
    pub fn merged(existing: &Post, patch: PostPatch) -> Self {
        PostInput {
            title: patch.title.unwrap_or_else(|| existing.title.clone()),
            content: patch.content.unwrap_or_else(|| existing.content.clone()),
            published: patch.published.unwrap_or(existing.published),
            tags: patch.tags,
        }
    }
}

impl CommentInput {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.content.trim().is_empty() {
            errors.add("content", "This field may not be blank.");
        }
        errors
    }

    pub fn merged(existing: &Comment, patch: CommentPatch) -> Self {
        CommentInput {
            content: patch.content.unwrap_or_else(|| existing.content.clone()),
        }
    }
}

impl ProfileUpdate {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Some(username) = &self.username {
            required_text(&mut errors, "username", username, USERNAME_MAX);
        }
        if let Some(email) = self.email.as_deref().map(str::trim) {
            if !email.is_empty() && !email.contains('@') {
                errors.add("email", "Enter a valid email address.");
            }
        }
        if let Some(picture) = &self.picture {
            required_text(&mut errors, "picture", picture, PICTURE_MAX);
        }
        errors
    }
}

const POST_SELECT: &str = "SELECT posts.id, posts.title, posts.content, posts.date_posted, posts.updated_at, \
    posts.author_id, users.username, posts.published, \
    COALESCE((SELECT group_concat(tags.name, char(31)) FROM post_tags JOIN tags ON tags.id = post_tags.tag_id \
    WHERE post_tags.post_id = posts.id), '') \
    FROM posts JOIN users ON users.id = posts.author_id";

const COMMENT_SELECT: &str = "SELECT comments.id, comments.post_id, comments.author_id, users.username, \
    comments.content, comments.date_posted, comments.updated_at \
    FROM comments JOIN users ON users.id = comments.author_id";

fn row_to_post(row: &Row) -> Result<Post> {
    let joined: String = row.get(8)?;
    let mut tags: Vec<String> = joined
        .split('\u{1f}')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect();
    tags.sort();
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        date_posted: row.get(3)?,
        updated_at: row.get(4)?,
        author: row.get(5)?,
        author_username: row.get(6)?,
        published: row.get::<i64>(7)? != 0,
        tags,
    })
}

fn row_to_comment(row: &Row) -> Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post: row.get(1)?,
        author: row.get(2)?,
        author_username: row.get(3)?,
        content: row.get(4)?,
        date_posted: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn text_or_null(value: Option<&String>) -> Value {
    match value {
        Some(text) => Value::Text(text.trim().to_owned()),
        None => Value::Null,
    }
}

async fn fetch_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let mut rows = conn
        .query(&format!("{POST_SELECT} WHERE posts.id = ?"), libsql::params![id])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_post(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_comment(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    let mut rows = conn
        .query(&format!("{COMMENT_SELECT} WHERE comments.id = ?"), libsql::params![id])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_comment(&row)?)),
        None => Ok(None),
    }
}

/// Makes the post carry exactly the tags named in `raw`, creating missing ones.
async fn replace_tags(conn: &Connection, post_id: i64, raw: &str) -> Result<()> {
    conn.execute("DELETE FROM post_tags WHERE post_id = ?", libsql::params![post_id])
        .await?;
    for name in tag_names(raw) {
        conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", libsql::params![name.clone()])
            .await?;
        conn.execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) SELECT ?, id FROM tags WHERE name = ?",
            libsql::params![post_id, name],
        )
        .await?;
    }
    Ok(())
}

async fn ensure_post(conn: &Connection, post_id: i64) -> Result<()> {
    let mut rows = conn
        .query("SELECT 1 FROM posts WHERE id = ?", libsql::params![post_id])
        .await?;
    if rows.next().await?.is_none() {
        return Err(AppError::validation("post", format!("Invalid pk \"{post_id}\" - object does not exist.")).into());
    }
    Ok(())
}

pub struct Blog<'a> {
    db: &'a Database,
}

impl<'a> Blog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn list_posts(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Post>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!("{POST_SELECT}{}{}{limit}", clauses.where_sql(), clauses.order_sql());
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;
        let mut posts = Vec::new();
        while let Some(row) = rows.next().await? {
            posts.push(row_to_post(&row)?);
        }
        Ok(posts)
    }

    pub async fn count_posts(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM posts JOIN users ON users.id = posts.author_id{}",
            clauses.where_sql()
        );
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        fetch_post(self.db.connection(), id).await
    }

    pub async fn create_post(&self, author_id: i64, input: &PostInput) -> Result<Post> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            let mut rows = conn
                .query(
                    "INSERT INTO posts (title, content, author_id, published) VALUES (?, ?, ?, ?) RETURNING id",
                    libsql::params![
                        input.title.trim().to_owned(),
                        input.content.clone(),
                        author_id,
                        i64::from(input.published)
                    ],
                )
                .await?;
            let id: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => anyhow::bail!("failed to create post"),
            };
            if let Some(raw) = &input.tags {
                replace_tags(conn, id, raw).await?;
            }
            fetch_post(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("post {id} vanished after insert"))
        }
        .await;
        let post = tx.finish(result).await?;
        tracing::info!(post_id = post.id, author_id, tags = post.tags.len(), "created post");
        Ok(post)
    }

    /// The author is fixed at creation and never changes here.
    pub async fn update_post(&self, id: i64, input: &PostInput) -> Result<Post> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            let changed = conn
                .execute(
                    r#"
                    UPDATE posts
                    SET title = ?, content = ?, published = ?,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?
                    "#,
                    libsql::params![
                        input.title.trim().to_owned(),
                        input.content.clone(),
                        i64::from(input.published),
                        id
                    ],
                )
                .await?;
            if changed == 0 {
                return Err(AppError::not_found(format!("post {id} not found")).into());
            }
            if let Some(raw) = &input.tags {
                replace_tags(conn, id, raw).await?;
            }
            fetch_post(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("post {id} vanished during update"))
        }
        .await;
        tx.finish(result).await
    }

    pub async fn delete_post(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM posts WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    pub async fn post_detail(&self, post: Post) -> Result<PostDetail> {
        let comments = self.comments_for(post.id).await?;
        Ok(PostDetail { post, comments })
    }

    /// Oldest first.
    pub async fn comments_for(&self, post_id: i64) -> Result<Vec<Comment>> {
        let mut rows = self
            .db
            .connection()
            .query(
                &format!("{COMMENT_SELECT} WHERE comments.post_id = ? ORDER BY comments.date_posted, comments.id"),
                libsql::params![post_id],
            )
            .await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn list_comments(&self, clauses: &Clauses, page: Option<PageRequest>) -> Result<Vec<Comment>> {
        let (limit, extra) = limit_clause(page);
        let sql = format!("{COMMENT_SELECT}{}{}{limit}", clauses.where_sql(), clauses.order_sql());
        let mut rows = self
            .db
            .connection()
            .query(&sql, libsql::params_from_iter(clauses.params_with(extra)))
            .await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    pub async fn count_comments(&self, clauses: &Clauses) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM comments JOIN users ON users.id = comments.author_id{}",
            clauses.where_sql()
        );
        self.db.count(&sql, clauses.params()).await
    }

    pub async fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        fetch_comment(self.db.connection(), id).await
    }

    pub async fn create_comment(&self, post_id: i64, author_id: i64, input: &CommentInput) -> Result<Comment> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            ensure_post(conn, post_id).await?;
            let mut rows = conn
                .query(
                    "INSERT INTO comments (post_id, author_id, content) VALUES (?, ?, ?) RETURNING id",
                    libsql::params![post_id, author_id, input.content.trim().to_owned()],
                )
                .await?;
            let id: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => anyhow::bail!("failed to create comment"),
            };
            fetch_comment(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("comment {id} vanished after insert"))
        }
        .await;
        let comment = tx.finish(result).await?;
        tracing::info!(comment_id = comment.id, post_id, author_id, "created comment");
        Ok(comment)
    }

    /// Only the text changes; a comment stays on the post it was made on.
    pub async fn update_comment(&self, id: i64, input: &CommentInput) -> Result<Comment> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            let changed = conn
                .execute(
                    "UPDATE comments SET content = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
                    libsql::params![input.content.trim().to_owned(), id],
                )
                .await?;
            if changed == 0 {
                return Err(AppError::not_found(format!("comment {id} not found")).into());
            }
            fetch_comment(conn, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("comment {id} vanished during update"))
        }
        .await;
        tx.finish(result).await
    }

    pub async fn delete_comment(&self, id: i64) -> Result<bool> {
        let tx = self.db.begin().await?;
        let result = tx
            .connection()
            .execute("DELETE FROM comments WHERE id = ?", libsql::params![id])
            .await
            .map_err(anyhow::Error::from);
        Ok(tx.finish(result).await? > 0)
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Creates the profile row on first access.
    pub async fn profile(&self, user_id: i64) -> Result<Profile> {
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            conn.execute("INSERT OR IGNORE INTO profiles (user_id) VALUES (?)", libsql::params![user_id])
                .await?;
            fetch_profile(conn, user_id).await
        }
        .await;
        tx.finish(result).await
    }

    pub async fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<Profile> {
        update.validate().into_result()?;
        let tx = self.db.begin().await?;
        let result = async {
            let conn = tx.connection();
            if let Some(username) = &update.username {
                let mut rows = conn
                    .query(
                        "SELECT 1 FROM users WHERE username = ? AND id != ?",
                        libsql::params![username.trim().to_owned(), user_id],
                    )
                    .await?;
                if rows.next().await?.is_some() {
                    return Err(AppError::validation("username", "A user with that username already exists.").into());
                }
            }
            let changed = conn
                .execute(
                    "UPDATE users SET username = COALESCE(?, username), email = COALESCE(?, email) WHERE id = ?",
                    libsql::params![
                        text_or_null(update.username.as_ref()),
                        text_or_null(update.email.as_ref()),
                        user_id
                    ],
                )
                .await?;
            if changed == 0 {
                return Err(AppError::not_found(format!("user {user_id} not found")).into());
            }
            conn.execute("INSERT OR IGNORE INTO profiles (user_id) VALUES (?)", libsql::params![user_id])
                .await?;
            conn.execute(
                "UPDATE profiles SET bio = COALESCE(?, bio), picture = COALESCE(?, picture) WHERE user_id = ?",
                libsql::params![
                    text_or_null(update.bio.as_ref()),
                    text_or_null(update.picture.as_ref()),
                    user_id
                ],
            )
            .await?;
            fetch_profile(conn, user_id).await
        }
        .await;
        let profile = tx.finish(result).await?;
        tracing::info!(user_id, username = %profile.username, "updated profile");
        Ok(profile)
    }
}

async fn fetch_profile(conn: &Connection, user_id: i64) -> Result<Profile> {
    let mut rows = conn
        .query(
            r#"
            SELECT users.username, users.email, profiles.bio, profiles.picture
            FROM users JOIN profiles ON profiles.user_id = users.id
            WHERE users.id = ?
            "#,
            libsql::params![user_id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Profile {
            username: row.get(0)?,
            email: row.get(1)?,
            bio: row.get(2)?,
            picture: row.get(3)?,
        }),
        None => Err(AppError::not_found(format!("user {user_id} not found")).into()),
    }
}

//! Blog collections plus the handlers that do not fit the generic shape:
//! commenting on a post, browsing by tag, and the caller's own profile.

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use libsql::Value;

use super::lib::{
    Blog, Comment, CommentInput, CommentPatch, Post, PostDetail, PostInput, PostPatch, Profile, ProfileUpdate,
};
use crate::api::{self, PageRequest, Payload, QueryParams};
use crate::auth::{CurrentUser, Identity, Policy, Principal};
use crate::crud::{self, Resource};
use crate::db::Database;
use crate::error::{AppError, FieldErrors};
use crate::handler::AppState;
use crate::query::{Clauses, FieldKind, Filter, OrderField, QuerySpec};

const TAG_PREDICATE: &str = "EXISTS (SELECT 1 FROM post_tags JOIN tags ON tags.id = post_tags.tag_id \
    WHERE post_tags.post_id = posts.id AND tags.name = ? COLLATE NOCASE)";

pub const POST_QUERY: QuerySpec = QuerySpec {
    filters: &[
        Filter { param: "tag", predicate: TAG_PREDICATE, kind: FieldKind::Text },
        Filter {
            param: "year",
            predicate: "CAST(strftime('%Y', posts.date_posted) AS INTEGER) = ?",
            kind: FieldKind::Integer,
        },
        Filter { param: "author", predicate: "users.username = ?", kind: FieldKind::Text },
    ],
    search: &["posts.title", "posts.content"],
    ordering: &[
        OrderField { param: "date_posted", column: "posts.date_posted" },
        OrderField { param: "title", column: "posts.title" },
    ],
    default_ordering: Some("-date_posted"),
    primary_key: "posts.id",
};

pub const COMMENT_QUERY: QuerySpec = QuerySpec {
    filters: &[
        Filter { param: "post", predicate: "comments.post_id = ?", kind: FieldKind::Integer },
        Filter { param: "author", predicate: "users.username = ?", kind: FieldKind::Text },
    ],
    search: &["comments.content"],
    ordering: &[OrderField { param: "date_posted", column: "comments.date_posted" }],
    default_ordering: None,
    primary_key: "comments.id",
};

pub struct Posts;

#[async_trait]
impl Resource for Posts {
    type Record = Post;
    type Detail = PostDetail;
    type Input = PostInput;
    type Patch = PostPatch;

    const NAME: &'static str = "post";
    const POLICY: Policy = Policy::owner_writes();
    const QUERY: QuerySpec = POST_QUERY;
    const PAGINATED: bool = true;

    fn scope(clauses: &mut Clauses, _viewer: Option<&Principal>) {
        clauses.push_condition("posts.published = 1", []);
    }

    fn visible(record: &Post, viewer: Option<&Principal>) -> bool {
        record.published || viewer.is_some_and(|p| p.id() == record.author)
    }

    fn owner(record: &Post) -> Option<i64> {
        Some(record.author)
    }

    fn validate(input: &PostInput) -> FieldErrors {
        input.validate()
    }

    fn merge(existing: &Post, patch: PostPatch) -> PostInput {
        PostInput::merged(existing, patch)
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Post>> {
        Blog::new(db).list_posts(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Blog::new(db).count_posts(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Post>> {
        Blog::new(db).get_post(id).await
    }

    async fn expand(db: &Database, record: Post) -> anyhow::Result<PostDetail> {
        Blog::new(db).post_detail(record).await
    }

    async fn insert(db: &Database, input: PostInput, author: Option<&Principal>) -> anyhow::Result<Post> {
        let author = author.ok_or(AppError::Unauthenticated)?;
        Blog::new(db).create_post(author.id(), &input).await
    }

    async fn update(db: &Database, id: i64, input: PostInput) -> anyhow::Result<Post> {
        Blog::new(db).update_post(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Blog::new(db).delete_post(id).await
    }
}

pub struct Comments;

#[async_trait]
impl Resource for Comments {
    type Record = Comment;
    type Detail = Comment;
    type Input = CommentInput;
    type Patch = CommentPatch;

    const NAME: &'static str = "comment";
    const POLICY: Policy = Policy::owner_writes();
    const QUERY: QuerySpec = COMMENT_QUERY;

    /// Comments under unpublished posts stay out of listings.
    fn scope(clauses: &mut Clauses, _viewer: Option<&Principal>) {
        clauses.push_condition(
            "EXISTS (SELECT 1 FROM posts WHERE posts.id = comments.post_id AND posts.published = 1)",
            [],
        );
    }

    fn owner(record: &Comment) -> Option<i64> {
        Some(record.author)
    }

    fn validate(input: &CommentInput) -> FieldErrors {
        input.validate()
    }

    fn merge(existing: &Comment, patch: CommentPatch) -> CommentInput {
        CommentInput::merged(existing, patch)
    }

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Comment>> {
        Blog::new(db).list_comments(clauses, page).await
    }

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64> {
        Blog::new(db).count_comments(clauses).await
    }

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Comment>> {
        Blog::new(db).get_comment(id).await
    }

    async fn expand(_db: &Database, record: Comment) -> anyhow::Result<Comment> {
        Ok(record)
    }

    async fn update(db: &Database, id: i64, input: CommentInput) -> anyhow::Result<Comment> {
        Blog::new(db).update_comment(id, &input).await
    }

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool> {
        Blog::new(db).delete_comment(id).await
    }
}

/// Comments on a post the caller can see; the post comes from the path.
pub async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(post_id): Path<i64>,
    Payload(input): Payload<CommentInput>,
) -> Result<Response, AppError> {
    crud::load::<Posts>(&state.db, post_id, Some(&principal)).await?;
    Comments::validate(&input).into_result()?;

    let comment = Blog::new(&state.db).create_comment(post_id, principal.id(), &input).await?;
    tracing::info!(comment_id = comment.id, post_id, user_id = principal.id(), "commented");
    Ok(api::created(comment))
}

/// Published posts carrying the tag, matched case-insensitively. The usual
/// list parameters still apply.
pub async fn posts_by_tag(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(name): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Response, AppError> {
    let mut clauses = POST_QUERY.build(&params).map_err(AppError::Validation)?;
    Posts::scope(&mut clauses, viewer.as_ref());
    clauses.push_condition(TAG_PREDICATE, [Value::Text(name)]);
    crud::render_list::<Posts>(&state, &params, &clauses).await
}

pub async fn show_profile(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(Blog::new(&state.db).profile(principal.id()).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Payload(update): Payload<ProfileUpdate>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(Blog::new(&state.db).update_profile(principal.id(), &update).await?))
}

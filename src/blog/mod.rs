//! Blog Module
//!
//! Posts, their comments and tags, and each user's profile. Anyone may
//! read published posts; signed-in users write, and only a post's or
//! comment's author may change or remove it. Unpublished posts are shown
//! to their author alone.
//!
//! Post lists are paginated and newest first. They accept `tag`, `year`
//! and `author` (username) filters, a `search` over title and content, and
//! `ordering` by `date_posted` or `title`.
//!
//! Tags arrive as one comma separated string on the post body:
//!
//! ```rust,ignore
//! let post = Blog::new(&db)
//!     .create_post(user_id, &PostInput {
//!         title: "Borrowing".into(),
//!         content: "...".into(),
//!         published: true,
//!         tags: Some("rust, ownership".into()),
//!     })
//!     .await?;
//! ```

mod handler;
mod lib;
mod routes;

pub use handler::{COMMENT_QUERY, Comments, POST_QUERY, Posts};
pub use lib::*;
pub use routes::routes;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("blog_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}

//! The storage capabilities the server needs, independent of the backend.
//!
//! [`DbClient`](crate::client::DbClient) implements them on top of
//! PostgreSQL, [`MemoryStore`](crate::memory::MemoryStore) keeps everything
//! in process.

use agora_common::{
    model::{
        Id, ModelValidationError,
        auth::{AuthTokenHash, Authentication, PasswordDigest},
        comment::{Comment, CommentMarker, CreateComment},
        like::LikeState,
        post::{CreatePost, Post, PostBody, PostMarker},
        user::{
            CreateUser, FollowState, ProfileUpdate, User, UserHandle, UserMarker, UserProfile,
        },
    },
    snowflake::SnowflakeTimestampError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Migrating the database failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeTimestampError),
    #[error("User {0} does not exist")]
    UnknownUser(Id<UserMarker>),
    #[error("Comment {0} was reached twice while building its thread")]
    CommentCycle(Id<CommentMarker>),
}

/// Result of a write that only the author of the target may perform.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum AuthorWrite<T> {
    Applied(T),
    NotFound,
    NotAuthor,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum CreateCommentOutcome {
    Created(Comment),
    PostNotFound,
    /// The parent does not exist or belongs to a different post.
    ParentNotFound,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    /// Returns `None` if the handle is already taken.
    async fn create_user(
        &self,
        user: &CreateUser,
        password: &PasswordDigest,
    ) -> Result<Option<User>>;

    async fn fetch_credentials(
        &self,
        handle: &UserHandle,
    ) -> Result<Option<(User, PasswordDigest)>>;

    async fn fetch_profile(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<UserProfile>>;

    /// Returns `None` if the user does not exist.
    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>>;

    /// Follows `followee` if `follower` does not already, unfollows otherwise.
    /// Returns `None` if `followee` does not exist.
    async fn toggle_follow(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<Option<FollowState>>;
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_auth(&self, authentication: &Authentication) -> Result<()>;

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>>;

    /// Revokes a token. Returns whether it existed.
    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<bool>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// All posts, newest first.
    async fn fetch_posts(&self, viewer: Id<UserMarker>) -> Result<Vec<Post>>;

    async fn fetch_post(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Post>>;

    /// Returns `None` if the user does not exist.
    async fn fetch_user_posts(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Vec<Post>>>;

    async fn post_exists(&self, post_id: Id<PostMarker>) -> Result<bool>;

    async fn create_post(&self, post: &CreatePost) -> Result<Post>;

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
        body: &PostBody,
    ) -> Result<AuthorWrite<Post>>;

    /// Deleting a post also deletes its comments and likes.
    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<()>>;

    /// Returns `None` if the post does not exist.
    async fn toggle_post_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn create_comment(&self, comment: &CreateComment) -> Result<CreateCommentOutcome>;

    async fn fetch_comment(&self, comment_id: Id<CommentMarker>) -> Result<Option<Comment>>;

    /// Comments of `post_id` without a parent, newest first.
    async fn list_top_level(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>>;

    /// Direct replies to `parent_id`, newest first.
    async fn list_replies(&self, parent_id: Id<CommentMarker>) -> Result<Vec<Comment>>;

    /// Every comment of `post_id` regardless of depth, newest first.
    async fn list_post_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>>;

    /// Deletes the comment together with its replies. On success, returns the
    /// number of comments removed.
    async fn delete_comment(
        &self,
        comment_id: Id<CommentMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<u64>>;

    /// Returns `None` if the comment does not exist.
    async fn toggle_comment_like(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>>;

    async fn like_count(&self, comment_id: Id<CommentMarker>) -> Result<i64>;

    async fn has_liked(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<bool>;

    /// Like state of every liked comment of `post_id`. Comments without likes
    /// are absent.
    async fn post_comment_likes(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<HashMap<Id<CommentMarker>, LikeState>>;
}

/// Everything the server needs from a backend.
pub trait Store: UserStore + AuthStore + PostStore + CommentStore {}

impl<T> Store for T where T: UserStore + AuthStore + PostStore + CommentStore + ?Sized {}

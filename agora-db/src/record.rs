use agora_common::model::{
    Id, ModelValidationError,
    auth::{Authentication, PasswordDigest},
    comment::{Comment, CommentContent},
    like::LikeState,
    post::{Post, PostContent},
    user::{DisplayName, User, UserHandle, UserProfile},
};
use agora_common::util::PositiveDuration;
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub password_digest: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ProfileRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_snowflake: i64,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: OffsetDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
    pub likes_count: i64,
    pub is_liked: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullCommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub parent_snowflake: Option<i64>,
    pub content: String,
    pub created_at: OffsetDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentLikeRecord {
    pub comment_snowflake: i64,
    pub likes_count: i64,
    pub is_liked: bool,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
            display_name: DisplayName::new(value.display_name)?,
            bio: value.bio,
            avatar_url: value.avatar_url,
        })
    }
}

impl TryFrom<CredentialsRecord> for (User, PasswordDigest) {
    type Error = ModelValidationError;

    fn try_from(value: CredentialsRecord) -> Result<Self, Self::Error> {
        Ok((value.user.try_into()?, PasswordDigest(value.password_digest)))
    }
}

impl TryFrom<ProfileRecord> for UserProfile {
    type Error = ModelValidationError;

    fn try_from(value: ProfileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user.try_into()?,
            followers_count: value.followers_count,
            following_count: value.following_count,
            posts_count: value.posts_count,
            is_following: value.is_following,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(PositiveDuration::from_seconds)
                .transpose()?,
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: value.author.try_into()?,
            content: PostContent::new(value.content)?,
            image_url: value.image_url,
            created_at: value.created_at,
            likes_count: value.likes_count,
            is_liked: value.is_liked,
        })
    }
}

impl TryFrom<FullCommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: FullCommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            author: value.author.try_into()?,
            parent_id: value.parent_snowflake.map(Id::from_db),
            content: CommentContent::new(value.content)?,
            created_at: value.created_at,
        })
    }
}

impl From<CommentLikeRecord> for LikeState {
    fn from(value: CommentLikeRecord) -> Self {
        Self {
            liked: value.is_liked,
            likes_count: value.likes_count,
        }
    }
}

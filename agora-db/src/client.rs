use crate::{
    record::{
        AuthenticationRecord, CommentLikeRecord, CredentialsRecord,
        FullCommentRecord, FullPostRecord, ProfileRecord, UserRecord,
    },
    store::{
        AuthStore, AuthorWrite, CommentStore, CreateCommentOutcome, PostStore, Result, UserStore,
    },
};
use agora_common::model::{
    AgoraSnowflakeGenerator, Id,
    auth::{AuthTokenHash, Authentication, PasswordDigest},
    comment::{Comment, CommentMarker, CreateComment},
    like::LikeState,
    post::{CreatePost, Post, PostBody, PostMarker},
    user::{
        CreateUser, FollowState, ProfileUpdate, User, UserHandle, UserMarker, UserProfile,
    },
};
use agora_common::snowflake::{ProcessId, WorkerId};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgPool, migrate::Migrator, query, query_as, query_scalar};
use std::collections::HashMap;
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!();

macro_rules! user_columns {
    () => {
        "
        users.user_snowflake,
        users.handle,
        users.display_name,
        users.bio,
        users.avatar_url
        "
    };
}

/// Selects full posts; `$1` must be the viewing user.
macro_rules! post_select {
    ($($rest:literal)*) => {
        concat!(
            "
            SELECT
                posts.post_snowflake,
                posts.content,
                posts.image_url,
                posts.created_at,
                (
                    SELECT COUNT(*) FROM posts.likes
                    WHERE likes.post_snowflake = posts.post_snowflake
                ) AS likes_count,
                EXISTS (
                    SELECT 1 FROM posts.likes
                    WHERE likes.post_snowflake = posts.post_snowflake
                        AND likes.user_snowflake = $1
                ) AS is_liked,
            ",
            user_columns!(),
            "
            FROM
                posts.posts
                JOIN users.users ON users.user_snowflake = posts.user_snowflake
            ",
            $(" ", $rest,)*
        )
    };
}

macro_rules! comment_select {
    ($($rest:literal)*) => {
        concat!(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.parent_snowflake,
                comments.content,
                comments.created_at,
            ",
            user_columns!(),
            "
            FROM
                comments.comments
                JOIN users.users ON users.user_snowflake = comments.user_snowflake
            ",
            $(" ", $rest,)*
        )
    };
}

/// The PostgreSQL backed store.
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<AgoraSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(AgoraSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    fn next_snowflake(&self) -> Result<i64> {
        let snowflake = self.snowflake_generator.lock().generate()?;
        Ok(snowflake.get().cast_signed())
    }

    async fn fetch_comments(&self, sql: &'static str, id: i64) -> Result<Vec<Comment>> {
        let records = query_as::<_, FullCommentRecord>(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }
}

#[async_trait]
impl UserStore for DbClient {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(concat!(
            "SELECT",
            user_columns!(),
            "FROM users.users WHERE users.user_snowflake = $1"
        ))
        .bind(user_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn create_user(
        &self,
        user: &CreateUser,
        password: &PasswordDigest,
    ) -> Result<Option<User>> {
        let user_snowflake = self.next_snowflake()?;

        let result = query_as::<_, UserRecord>(concat!(
            "
            INSERT INTO users.users
                (user_snowflake, handle, display_name, avatar_url, password_digest)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING",
            user_columns!()
        ))
        .bind(user_snowflake)
        .bind(user.handle.get())
        .bind(user.display_name.get())
        .bind(user.avatar_url.as_deref())
        .bind(&password.0)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(Some(record.try_into()?)),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_credentials(
        &self,
        handle: &UserHandle,
    ) -> Result<Option<(User, PasswordDigest)>> {
        let record = query_as::<_, CredentialsRecord>(concat!(
            "SELECT users.password_digest,",
            user_columns!(),
            "FROM users.users WHERE users.handle = $1"
        ))
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record.map(<(User, PasswordDigest)>::try_from).transpose()?;
        Ok(credentials)
    }

    async fn fetch_profile(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<UserProfile>> {
        let record = query_as::<_, ProfileRecord>(concat!(
            "
            SELECT
                (
                    SELECT COUNT(*) FROM users.follows
                    WHERE follows.followee_snowflake = users.user_snowflake
                ) AS followers_count,
                (
                    SELECT COUNT(*) FROM users.follows
                    WHERE follows.follower_snowflake = users.user_snowflake
                ) AS following_count,
                (
                    SELECT COUNT(*) FROM posts.posts
                    WHERE posts.user_snowflake = users.user_snowflake
                ) AS posts_count,
                EXISTS (
                    SELECT 1 FROM users.follows
                    WHERE follows.followee_snowflake = users.user_snowflake
                        AND follows.follower_snowflake = $2
                ) AS is_following,
            ",
            user_columns!(),
            "FROM users.users WHERE users.user_snowflake = $1"
        ))
        .bind(user_id.as_db())
        .bind(viewer.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let profile = record.map(UserProfile::try_from).transpose()?;
        Ok(profile)
    }

    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let mut tx = self.pool.begin().await?;

        let record = query_as::<_, UserRecord>(concat!(
            "SELECT",
            user_columns!(),
            "FROM users.users WHERE users.user_snowflake = $1 FOR UPDATE"
        ))
        .bind(user_id.as_db())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(record) = record else {
            return Ok(None);
        };

        let mut user = User::try_from(record)?;
        update.apply(&mut user);

        let record = query_as::<_, UserRecord>(concat!(
            "
            UPDATE users.users
            SET display_name = $2, bio = $3, avatar_url = $4
            WHERE users.user_snowflake = $1
            RETURNING",
            user_columns!()
        ))
        .bind(user_id.as_db())
        .bind(user.display_name.get())
        .bind(user.bio.as_deref())
        .bind(user.avatar_url.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record.try_into()?))
    }

    async fn toggle_follow(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<Option<FollowState>> {
        let mut tx = self.pool.begin().await?;

        let exists = query_scalar::<_, i64>(
            "SELECT user_snowflake FROM users.users WHERE user_snowflake = $1 FOR UPDATE",
        )
        .bind(followee.as_db())
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if !exists {
            return Ok(None);
        }

        let removed = query(
            "
            DELETE FROM users.follows
            WHERE follower_snowflake = $1 AND followee_snowflake = $2
            ",
        )
        .bind(follower.as_db())
        .bind(followee.as_db())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            query(
                "
                INSERT INTO users.follows (follower_snowflake, followee_snowflake)
                VALUES ($1, $2)
                ",
            )
            .bind(follower.as_db())
            .bind(followee.as_db())
            .execute(&mut *tx)
            .await?;
        }

        let followers_count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users.follows WHERE followee_snowflake = $1",
        )
        .bind(followee.as_db())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(FollowState {
            following: removed == 0,
            followers_count,
        }))
    }
}

#[async_trait]
impl AuthStore for DbClient {
    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        query(
            "
            INSERT INTO users.authentications
                (token_hash, user_snowflake, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&authentication.token_hash.0[..])
        .bind(authentication.user.as_db())
        .bind(authentication.created_at)
        .bind(
            authentication
                .expires_after
                .map(|duration| duration.whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                user_snowflake,
                token_hash,
                created_at,
                expires_after_seconds
            FROM
                users.authentications
            WHERE
                token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<bool> {
        let removed = query("DELETE FROM users.authentications WHERE token_hash = $1")
            .bind(&token_hash.0[..])
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }
}

#[async_trait]
impl PostStore for DbClient {
    async fn fetch_posts(&self, viewer: Id<UserMarker>) -> Result<Vec<Post>> {
        let records = query_as::<_, FullPostRecord>(post_select!(
            "ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .bind(viewer.as_db())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn fetch_post(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Post>> {
        let record = query_as::<_, FullPostRecord>(post_select!("WHERE posts.post_snowflake = $2"))
            .bind(viewer.as_db())
            .bind(post_id.as_db())
            .fetch_optional(&self.pool)
            .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn fetch_user_posts(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Vec<Post>>> {
        let user_exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users.users WHERE user_snowflake = $1)",
        )
        .bind(user_id.as_db())
        .fetch_one(&self.pool)
        .await?;
        if !user_exists {
            return Ok(None);
        }

        let records = query_as::<_, FullPostRecord>(post_select!(
            "WHERE posts.user_snowflake = $2"
            "ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .bind(viewer.as_db())
        .bind(user_id.as_db())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(posts))
    }

    async fn post_exists(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM posts.posts WHERE post_snowflake = $1)",
        )
        .bind(post_id.as_db())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let post_snowflake = self.next_snowflake()?;
        let mut tx = self.pool.begin().await?;

        query(
            "
            INSERT INTO posts.posts (post_snowflake, user_snowflake, content, image_url)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(post_snowflake)
        .bind(post.author.as_db())
        .bind(post.body.content.get())
        .bind(post.body.image_url.as_deref())
        .execute(&mut *tx)
        .await?;

        let record = query_as::<_, FullPostRecord>(post_select!("WHERE posts.post_snowflake = $2"))
            .bind(post.author.as_db())
            .bind(post_snowflake)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record.try_into()?)
    }

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
        body: &PostBody,
    ) -> Result<AuthorWrite<Post>> {
        let mut tx = self.pool.begin().await?;

        let author = query_scalar::<_, i64>(
            "SELECT user_snowflake FROM posts.posts WHERE post_snowflake = $1 FOR UPDATE",
        )
        .bind(post_id.as_db())
        .fetch_optional(&mut *tx)
        .await?;
        match author {
            None => return Ok(AuthorWrite::NotFound),
            Some(author) if author != requester.as_db() => return Ok(AuthorWrite::NotAuthor),
            Some(_) => {}
        }

        query("UPDATE posts.posts SET content = $2, image_url = $3 WHERE post_snowflake = $1")
            .bind(post_id.as_db())
            .bind(body.content.get())
            .bind(body.image_url.as_deref())
            .execute(&mut *tx)
            .await?;

        let record = query_as::<_, FullPostRecord>(post_select!("WHERE posts.post_snowflake = $2"))
            .bind(requester.as_db())
            .bind(post_id.as_db())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AuthorWrite::Applied(record.try_into()?))
    }

    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<()>> {
        let mut tx = self.pool.begin().await?;

        let author = query_scalar::<_, i64>(
            "SELECT user_snowflake FROM posts.posts WHERE post_snowflake = $1 FOR UPDATE",
        )
        .bind(post_id.as_db())
        .fetch_optional(&mut *tx)
        .await?;
        match author {
            None => return Ok(AuthorWrite::NotFound),
            Some(author) if author != requester.as_db() => return Ok(AuthorWrite::NotAuthor),
            Some(_) => {}
        }

        // Comments, comment likes and post likes go with the post.
        query("DELETE FROM posts.posts WHERE post_snowflake = $1")
            .bind(post_id.as_db())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AuthorWrite::Applied(()))
    }

    async fn toggle_post_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>> {
        let mut tx = self.pool.begin().await?;

        let exists = query_scalar::<_, i64>(
            "SELECT post_snowflake FROM posts.posts WHERE post_snowflake = $1 FOR UPDATE",
        )
        .bind(post_id.as_db())
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if !exists {
            return Ok(None);
        }

        let removed = query(
            "DELETE FROM posts.likes WHERE post_snowflake = $1 AND user_snowflake = $2",
        )
        .bind(post_id.as_db())
        .bind(user_id.as_db())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            query("INSERT INTO posts.likes (post_snowflake, user_snowflake) VALUES ($1, $2)")
                .bind(post_id.as_db())
                .bind(user_id.as_db())
                .execute(&mut *tx)
                .await?;
        }

        let likes_count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts.likes WHERE post_snowflake = $1",
        )
        .bind(post_id.as_db())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(LikeState {
            liked: removed == 0,
            likes_count,
        }))
    }
}

#[async_trait]
impl CommentStore for DbClient {
    async fn create_comment(&self, comment: &CreateComment) -> Result<CreateCommentOutcome> {
        let comment_snowflake = self.next_snowflake()?;
        let mut tx = self.pool.begin().await?;

        // Shared locks keep the post and parent alive until the insert commits.
        let post_exists = query_scalar::<_, i64>(
            "SELECT post_snowflake FROM posts.posts WHERE post_snowflake = $1 FOR SHARE",
        )
        .bind(comment.post_id.as_db())
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if !post_exists {
            return Ok(CreateCommentOutcome::PostNotFound);
        }

        if let Some(parent_id) = comment.body.parent_id {
            let parent_post = query_scalar::<_, i64>(
                "
                SELECT post_snowflake FROM comments.comments
                WHERE comment_snowflake = $1
                FOR SHARE
                ",
            )
            .bind(parent_id.as_db())
            .fetch_optional(&mut *tx)
            .await?;
            if parent_post != Some(comment.post_id.as_db()) {
                return Ok(CreateCommentOutcome::ParentNotFound);
            }
        }

        query(
            "
            INSERT INTO comments.comments
                (comment_snowflake, post_snowflake, user_snowflake, parent_snowflake, content)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(comment_snowflake)
        .bind(comment.post_id.as_db())
        .bind(comment.author.as_db())
        .bind(comment.body.parent_id.map(Id::as_db))
        .bind(comment.body.content.get())
        .execute(&mut *tx)
        .await?;

        let record = query_as::<_, FullCommentRecord>(comment_select!(
            "WHERE comments.comment_snowflake = $1"
        ))
        .bind(comment_snowflake)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreateCommentOutcome::Created(record.try_into()?))
    }

    async fn fetch_comment(&self, comment_id: Id<CommentMarker>) -> Result<Option<Comment>> {
        let record = query_as::<_, FullCommentRecord>(comment_select!(
            "WHERE comments.comment_snowflake = $1"
        ))
        .bind(comment_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let comment = record.map(Comment::try_from).transpose()?;
        Ok(comment)
    }

    async fn list_top_level(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let sql = comment_select!(
            "WHERE comments.post_snowflake = $1 AND comments.parent_snowflake IS NULL"
            "ORDER BY comments.created_at DESC, comments.comment_snowflake DESC"
        );
        self.fetch_comments(sql, post_id.as_db()).await
    }

    async fn list_replies(&self, parent_id: Id<CommentMarker>) -> Result<Vec<Comment>> {
        let sql = comment_select!(
            "WHERE comments.parent_snowflake = $1"
            "ORDER BY comments.created_at DESC, comments.comment_snowflake DESC"
        );
        self.fetch_comments(sql, parent_id.as_db()).await
    }

    async fn list_post_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let sql = comment_select!(
            "WHERE comments.post_snowflake = $1"
            "ORDER BY comments.created_at DESC, comments.comment_snowflake DESC"
        );
        self.fetch_comments(sql, post_id.as_db()).await
    }

    async fn delete_comment(
        &self,
        comment_id: Id<CommentMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<u64>> {
        let mut tx = self.pool.begin().await?;

        let author = query_scalar::<_, i64>(
            "SELECT user_snowflake FROM comments.comments WHERE comment_snowflake = $1 FOR UPDATE",
        )
        .bind(comment_id.as_db())
        .fetch_optional(&mut *tx)
        .await?;
        match author {
            None => return Ok(AuthorWrite::NotFound),
            Some(author) if author != requester.as_db() => return Ok(AuthorWrite::NotAuthor),
            Some(_) => {}
        }

        // One statement removes the comment and every reply below it.
        let removed = query(
            "
            WITH RECURSIVE subtree AS (
                SELECT comment_snowflake FROM comments.comments
                WHERE comment_snowflake = $1
                UNION
                SELECT comments.comment_snowflake
                FROM comments.comments
                    JOIN subtree ON comments.parent_snowflake = subtree.comment_snowflake
            )
            DELETE FROM comments.comments
            WHERE comment_snowflake IN (SELECT comment_snowflake FROM subtree)
            ",
        )
        .bind(comment_id.as_db())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        debug!(%comment_id, removed, "Deleted comment thread");
        Ok(AuthorWrite::Applied(removed))
    }

    async fn toggle_comment_like(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>> {
        let mut tx = self.pool.begin().await?;

        // Locking the comment serializes toggles on it.
        let exists = query_scalar::<_, i64>(
            "SELECT comment_snowflake FROM comments.comments WHERE comment_snowflake = $1 FOR UPDATE",
        )
        .bind(comment_id.as_db())
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if !exists {
            return Ok(None);
        }

        let removed = query(
            "DELETE FROM comments.likes WHERE comment_snowflake = $1 AND user_snowflake = $2",
        )
        .bind(comment_id.as_db())
        .bind(user_id.as_db())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            query("INSERT INTO comments.likes (comment_snowflake, user_snowflake) VALUES ($1, $2)")
                .bind(comment_id.as_db())
                .bind(user_id.as_db())
                .execute(&mut *tx)
                .await?;
        }

        let likes_count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM comments.likes WHERE comment_snowflake = $1",
        )
        .bind(comment_id.as_db())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(LikeState {
            liked: removed == 0,
            likes_count,
        }))
    }

    async fn like_count(&self, comment_id: Id<CommentMarker>) -> Result<i64> {
        let count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM comments.likes WHERE comment_snowflake = $1",
        )
        .bind(comment_id.as_db())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn has_liked(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<bool> {
        let liked = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM comments.likes
                WHERE comment_snowflake = $1 AND user_snowflake = $2
            )
            ",
        )
        .bind(comment_id.as_db())
        .bind(user_id.as_db())
        .fetch_one(&self.pool)
        .await?;

        Ok(liked)
    }

    async fn post_comment_likes(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<HashMap<Id<CommentMarker>, LikeState>> {
        let records = query_as::<_, CommentLikeRecord>(
            "
            SELECT
                likes.comment_snowflake,
                COUNT(*) AS likes_count,
                BOOL_OR(likes.user_snowflake = $2) AS is_liked
            FROM
                comments.likes
                JOIN comments.comments USING (comment_snowflake)
            WHERE
                comments.post_snowflake = $1
            GROUP BY
                likes.comment_snowflake
            ",
        )
        .bind(post_id.as_db())
        .bind(viewer.as_db())
        .fetch_all(&self.pool)
        .await?;

        let likes = records
            .into_iter()
            .map(|record| (Id::from_db(record.comment_snowflake), record.into()))
            .collect();
        Ok(likes)
    }
}

#[cfg(all(test, database_tests))]
mod tests {
    use crate::{
        client::DbClient,
        store::{AuthStore, AuthorWrite, CommentStore, CreateCommentOutcome, PostStore, UserStore},
        thread::ThreadMode,
    };
    use agora_common::{
        model::{
            Id,
            auth::{AuthToken, Authentication, PasswordDigest},
            comment::{Comment, CommentBody, CommentContent, CommentMarker, CreateComment},
            like::LikeState,
            post::{CreatePost, PostBody, PostContent, PostMarker},
            user::{CreateUser, DisplayName, ProfileUpdate, UserHandle, UserMarker},
        },
        snowflake::{ProcessId, WorkerId},
        util::PositiveDuration,
    };
    use sqlx::PgPool;
    use time::OffsetDateTime;

    fn client(pool: PgPool) -> DbClient {
        DbClient::new(pool, WorkerId::default(), ProcessId::default())
    }

    fn create_user(handle: &str) -> CreateUser {
        CreateUser {
            handle: UserHandle::new(handle.to_owned()).unwrap(),
            display_name: DisplayName::new(handle.to_uppercase()).unwrap(),
            avatar_url: Some(format!("https://avatars.example/{handle}.png")),
        }
    }

    async fn user(client: &DbClient, handle: &str) -> Id<UserMarker> {
        client
            .create_user(&create_user(handle), &PasswordDigest("digest".to_owned()))
            .await
            .unwrap()
            .unwrap()
            .id
    }

    async fn post(client: &DbClient, author: Id<UserMarker>) -> Id<PostMarker> {
        let create = CreatePost {
            author,
            body: PostBody {
                content: PostContent::new("a post".to_owned()).unwrap(),
                image_url: None,
            },
        };
        client.create_post(&create).await.unwrap().id
    }

    fn create_comment(
        post_id: Id<PostMarker>,
        author: Id<UserMarker>,
        parent_id: Option<Id<CommentMarker>>,
    ) -> CreateComment {
        CreateComment {
            post_id,
            author,
            body: CommentBody {
                content: CommentContent::new("some words".to_owned()).unwrap(),
                parent_id,
            },
        }
    }

    async fn comment(
        client: &DbClient,
        post_id: Id<PostMarker>,
        author: Id<UserMarker>,
        parent_id: Option<Id<CommentMarker>>,
    ) -> Comment {
        let create = create_comment(post_id, author, parent_id);
        match client.create_comment(&create).await.unwrap() {
            CreateCommentOutcome::Created(comment) => comment,
            outcome => panic!("comment was not created: {outcome:?}"),
        }
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn users_round_trip(pool: PgPool) {
        let client = client(pool);
        let create = create_user("alice");
        let alice = client
            .create_user(&create, &PasswordDigest("digest".to_owned()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(alice.handle, create.handle);
        assert_eq!(alice.bio, None);
        assert_eq!(client.fetch_user(alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(
            client.fetch_credentials(&create.handle).await.unwrap(),
            Some((alice.clone(), PasswordDigest("digest".to_owned())))
        );

        // A taken handle is reported as `None` rather than as an error.
        assert_eq!(
            client
                .create_user(&create, &PasswordDigest(String::new()))
                .await
                .unwrap(),
            None
        );
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn profile_counts_and_updates(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        post(&client, alice).await;
        post(&client, alice).await;

        let state = client.toggle_follow(bob, alice).await.unwrap().unwrap();
        assert!(state.following);
        assert_eq!(state.followers_count, 1);

        let profile = client.fetch_profile(alice, bob).await.unwrap().unwrap();
        assert_eq!(profile.followers_count, 1);
        assert_eq!(profile.following_count, 0);
        assert_eq!(profile.posts_count, 2);
        assert!(profile.is_following);

        let update = ProfileUpdate {
            bio: Some("Writes things".to_owned()),
            avatar_url: Some(String::new()),
            ..ProfileUpdate::default()
        };
        let updated = client.update_profile(alice, &update).await.unwrap().unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Writes things"));
        assert_eq!(updated.avatar_url, None);
        assert_eq!(updated.display_name.get(), "ALICE");
        assert_eq!(client.fetch_user(alice).await.unwrap(), Some(updated));
        assert_eq!(
            client.update_profile(999.into(), &update).await.unwrap(),
            None
        );

        let state = client.toggle_follow(bob, alice).await.unwrap().unwrap();
        assert!(!state.following);
        assert_eq!(state.followers_count, 0);
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn authentications_are_stored_and_revoked(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let token = AuthToken::generate_random(alice);
        let authentication = Authentication {
            user: alice,
            token_hash: token.hash().unwrap(),
            created_at: OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap(),
            expires_after: Some(PositiveDuration::from_seconds(3600).unwrap()),
        };

        client.create_auth(&authentication).await.unwrap();
        assert_eq!(
            client.fetch_auth(&authentication.token_hash).await.unwrap(),
            Some(authentication.clone())
        );

        assert!(client.delete_auth(&authentication.token_hash).await.unwrap());
        assert_eq!(client.fetch_auth(&authentication.token_hash).await.unwrap(), None);
        assert!(!client.delete_auth(&authentication.token_hash).await.unwrap());
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn comments_round_trip(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post_id = post(&client, alice).await;

        let top = comment(&client, post_id, alice, None).await;
        let reply = comment(&client, post_id, alice, Some(top.id)).await;
        let newer = comment(&client, post_id, alice, None).await;

        assert_eq!(top.post_id, post_id);
        assert_eq!(top.author.id, alice);
        assert_eq!(reply.parent_id, Some(top.id));
        assert_eq!(client.fetch_comment(reply.id).await.unwrap(), Some(reply.clone()));
        assert_eq!(
            client.list_top_level(post_id).await.unwrap(),
            vec![newer.clone(), top.clone()]
        );
        assert_eq!(client.list_replies(top.id).await.unwrap(), vec![reply.clone()]);
        assert_eq!(
            client.list_post_comments(post_id).await.unwrap(),
            vec![newer, reply, top]
        );
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn parent_must_belong_to_the_same_post(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post_id = post(&client, alice).await;
        let other_post = post(&client, alice).await;
        let elsewhere = comment(&client, other_post, alice, None).await;

        assert_eq!(
            client
                .create_comment(&create_comment(post_id, alice, Some(elsewhere.id)))
                .await
                .unwrap(),
            CreateCommentOutcome::ParentNotFound
        );
        assert_eq!(
            client
                .create_comment(&create_comment(post_id, alice, Some(999.into())))
                .await
                .unwrap(),
            CreateCommentOutcome::ParentNotFound
        );
        assert_eq!(
            client
                .create_comment(&create_comment(999.into(), alice, None))
                .await
                .unwrap(),
            CreateCommentOutcome::PostNotFound
        );
        assert!(client.list_post_comments(post_id).await.unwrap().is_empty());
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn like_toggle_flips_back(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post_id = post(&client, alice).await;
        let target = comment(&client, post_id, alice, None).await;

        assert_eq!(
            client.toggle_comment_like(target.id, alice).await.unwrap(),
            Some(LikeState {
                liked: true,
                likes_count: 1
            })
        );
        assert!(client.has_liked(target.id, alice).await.unwrap());

        assert_eq!(
            client.toggle_comment_like(target.id, alice).await.unwrap(),
            Some(LikeState {
                liked: false,
                likes_count: 0
            })
        );
        assert!(!client.has_liked(target.id, alice).await.unwrap());
        assert_eq!(client.like_count(target.id).await.unwrap(), 0);
        assert_eq!(
            client.toggle_comment_like(999.into(), alice).await.unwrap(),
            None
        );
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn post_comment_likes_mark_the_viewer(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let carol = user(&client, "carol").await;
        let post_id = post(&client, alice).await;
        let both = comment(&client, post_id, alice, None).await;
        let only_bob = comment(&client, post_id, alice, Some(both.id)).await;
        let unliked = comment(&client, post_id, alice, None).await;

        client.toggle_comment_like(both.id, alice).await.unwrap();
        client.toggle_comment_like(both.id, bob).await.unwrap();
        client.toggle_comment_like(only_bob.id, bob).await.unwrap();

        let as_alice = client.post_comment_likes(post_id, alice).await.unwrap();
        assert_eq!(
            as_alice[&both.id],
            LikeState {
                liked: true,
                likes_count: 2
            }
        );
        assert_eq!(
            as_alice[&only_bob.id],
            LikeState {
                liked: false,
                likes_count: 1
            }
        );
        assert!(!as_alice.contains_key(&unliked.id));

        let as_carol = client.post_comment_likes(post_id, carol).await.unwrap();
        assert!(as_carol.values().all(|like| !like.liked));
        assert_eq!(as_carol.len(), 2);
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn delete_removes_whole_subtree_and_its_likes(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post_id = post(&client, alice).await;

        let root = comment(&client, post_id, alice, None).await;
        let reply = comment(&client, post_id, bob, Some(root.id)).await;
        let nested = comment(&client, post_id, alice, Some(reply.id)).await;
        let sibling = comment(&client, post_id, bob, None).await;
        client.toggle_comment_like(nested.id, bob).await.unwrap();

        assert_eq!(
            client.delete_comment(root.id, bob).await.unwrap(),
            AuthorWrite::NotAuthor
        );
        assert_eq!(
            client.delete_comment(root.id, alice).await.unwrap(),
            AuthorWrite::Applied(3)
        );
        assert_eq!(
            client.delete_comment(root.id, alice).await.unwrap(),
            AuthorWrite::NotFound
        );
        for gone in [root.id, reply.id, nested.id] {
            assert_eq!(client.fetch_comment(gone).await.unwrap(), None);
        }
        assert_eq!(client.like_count(nested.id).await.unwrap(), 0);
        assert!(client.post_comment_likes(post_id, bob).await.unwrap().is_empty());
        assert_eq!(
            client.list_post_comments(post_id).await.unwrap(),
            vec![sibling]
        );
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn reply_racing_parent_delete_leaves_no_orphan(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post_id = post(&client, alice).await;

        for _ in 0..20 {
            let parent = comment(&client, post_id, alice, None).await;
            let reply = create_comment(post_id, alice, Some(parent.id));

            let (created, deleted) = tokio::join!(
                client.create_comment(&reply),
                client.delete_comment(parent.id, alice),
            );

            // Either the reply commits first and is deleted with its parent,
            // or the parent is already gone when the reply checks for it.
            match (created.unwrap(), deleted.unwrap()) {
                (CreateCommentOutcome::Created(_), AuthorWrite::Applied(2))
                | (CreateCommentOutcome::ParentNotFound, AuthorWrite::Applied(1)) => {}
                outcome => panic!("inconsistent outcome: {outcome:?}"),
            }
            assert!(client.list_post_comments(post_id).await.unwrap().is_empty());
        }
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn deleting_a_post_removes_its_comments(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post_id = post(&client, alice).await;
        let top = comment(&client, post_id, alice, None).await;
        comment(&client, post_id, alice, Some(top.id)).await;

        assert_eq!(
            client.delete_post(post_id, alice).await.unwrap(),
            AuthorWrite::Applied(())
        );
        assert!(client.list_post_comments(post_id).await.unwrap().is_empty());
        assert_eq!(client.fetch_comment(top.id).await.unwrap(), None);
    }

    #[sqlx::test(migrator = "crate::client::MIGRATOR")]
    async fn both_thread_modes_agree(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post_id = post(&client, alice).await;

        let a = comment(&client, post_id, alice, None).await;
        let a1 = comment(&client, post_id, bob, Some(a.id)).await;
        comment(&client, post_id, alice, Some(a1.id)).await;
        comment(&client, post_id, bob, None).await;
        client.toggle_comment_like(a1.id, alice).await.unwrap();

        for viewer in [alice, bob] {
            let recursive = ThreadMode::Recursive.build(&client, post_id, viewer).await.unwrap();
            let batched = ThreadMode::Batched.build(&client, post_id, viewer).await.unwrap();
            assert_eq!(recursive, batched);
            assert_eq!(recursive.len(), 2);
            assert_eq!(recursive[1].replies[0].is_liked, viewer == alice);
        }
    }
}

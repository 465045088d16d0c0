//! A store that keeps everything in process memory.
//!
//! Every operation runs under a single lock, so multi-step writes such as the
//! delete cascade and the like toggles are atomic. Data does not survive a
//! restart.

use crate::store::{
    AuthStore, AuthorWrite, CommentStore, CreateCommentOutcome, DbError, PostStore, Result,
    UserStore,
};
use agora_common::{
    model::{
        AgoraSnowflakeGenerator, Id,
        auth::{AuthTokenHash, Authentication, PasswordDigest},
        comment::{Comment, CommentContent, CommentMarker, CreateComment},
        like::LikeState,
        post::{CreatePost, Post, PostBody, PostMarker},
        user::{
            CreateUser, FollowState, ProfileUpdate, User, UserHandle, UserMarker, UserProfile,
        },
    },
    snowflake::{ProcessId, WorkerId},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    snowflake_generator: AgoraSnowflakeGenerator,
    users: HashMap<Id<UserMarker>, (User, PasswordDigest)>,
    authentications: HashMap<AuthTokenHash, Authentication>,
    follows: HashSet<(Id<UserMarker>, Id<UserMarker>)>,
    posts: HashMap<Id<PostMarker>, PostEntry>,
    post_likes: HashSet<(Id<PostMarker>, Id<UserMarker>)>,
    comments: HashMap<Id<CommentMarker>, CommentEntry>,
    comment_likes: HashSet<(Id<CommentMarker>, Id<UserMarker>)>,
}

struct PostEntry {
    author: Id<UserMarker>,
    body: PostBody,
    created_at: OffsetDateTime,
}

#[derive(Clone)]
struct CommentEntry {
    post_id: Id<PostMarker>,
    author: Id<UserMarker>,
    parent_id: Option<Id<CommentMarker>>,
    content: CommentContent,
    created_at: OffsetDateTime,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                snowflake_generator: AgoraSnowflakeGenerator::new(worker_id, process_id),
                users: HashMap::new(),
                authentications: HashMap::new(),
                follows: HashSet::new(),
                posts: HashMap::new(),
                post_likes: HashSet::new(),
                comments: HashMap::new(),
                comment_likes: HashSet::new(),
            }),
        }
    }

    /// Points `comment_id` at another parent without any checks, the way a
    /// corrupted or hand-edited database could.
    #[cfg(test)]
    pub(crate) fn force_parent(
        &self,
        comment_id: Id<CommentMarker>,
        parent_id: Option<Id<CommentMarker>>,
    ) {
        if let Some(entry) = self.state.lock().comments.get_mut(&comment_id) {
            entry.parent_id = parent_id;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(WorkerId::default(), ProcessId::default())
    }
}

impl MemoryState {
    fn user(&self, user_id: Id<UserMarker>) -> Option<User> {
        self.users.get(&user_id).map(|(user, _)| user.clone())
    }

    fn post(&self, post_id: Id<PostMarker>, viewer: Id<UserMarker>) -> Option<Post> {
        let entry = self.posts.get(&post_id)?;
        let likes_count = self
            .post_likes
            .iter()
            .filter(|(liked_post, _)| *liked_post == post_id)
            .count();

        Some(Post {
            id: post_id,
            author: self.user(entry.author)?,
            content: entry.body.content.clone(),
            image_url: entry.body.image_url.clone(),
            created_at: entry.created_at,
            likes_count: count(likes_count),
            is_liked: self.post_likes.contains(&(post_id, viewer)),
        })
    }

    fn posts_where(
        &self,
        viewer: Id<UserMarker>,
        filter: impl Fn(&PostEntry) -> bool,
    ) -> Vec<Post> {
        let mut posts: Vec<Post> = self
            .posts
            .iter()
            .filter(|(_, entry)| filter(entry))
            .filter_map(|(id, _)| self.post(*id, viewer))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts
    }

    fn comment(&self, comment_id: Id<CommentMarker>) -> Option<Comment> {
        let entry = self.comments.get(&comment_id)?;

        Some(Comment {
            id: comment_id,
            post_id: entry.post_id,
            author: self.user(entry.author)?,
            parent_id: entry.parent_id,
            content: entry.content.clone(),
            created_at: entry.created_at,
        })
    }

    fn comments_where(&self, filter: impl Fn(&CommentEntry) -> bool) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .comments
            .iter()
            .filter(|(_, entry)| filter(entry))
            .filter_map(|(id, _)| self.comment(*id))
            .collect();
        comments.sort_by(Comment::thread_order);
        comments
    }

    fn comment_like_count(&self, comment_id: Id<CommentMarker>) -> i64 {
        count(
            self.comment_likes
                .iter()
                .filter(|(liked_comment, _)| *liked_comment == comment_id)
                .count(),
        )
    }

    /// `comment_id` and everything below it, parents before their replies.
    fn subtree(&self, comment_id: Id<CommentMarker>) -> Vec<Id<CommentMarker>> {
        let mut subtree = vec![comment_id];
        let mut seen = HashSet::from([comment_id]);
        let mut next = 0;
        while let Some(&current) = subtree.get(next) {
            next += 1;
            for (id, entry) in &self.comments {
                if entry.parent_id == Some(current) && seen.insert(*id) {
                    subtree.push(*id);
                }
            }
        }
        subtree
    }

    fn remove_comments(&mut self, ids: &[Id<CommentMarker>]) {
        let ids: HashSet<_> = ids.iter().copied().collect();
        self.comments.retain(|id, _| !ids.contains(id));
        self.comment_likes
            .retain(|(comment_id, _)| !ids.contains(comment_id));
    }
}

#[allow(clippy::cast_possible_wrap)]
fn count(count: usize) -> i64 {
    count as i64
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.state.lock().user(user_id))
    }

    async fn create_user(
        &self,
        user: &CreateUser,
        password: &PasswordDigest,
    ) -> Result<Option<User>> {
        let mut state = self.state.lock();
        if state.users.values().any(|(existing, _)| existing.handle == user.handle) {
            return Ok(None);
        }

        let id = state.snowflake_generator.generate()?.into();
        let created = User {
            id,
            handle: user.handle.clone(),
            display_name: user.display_name.clone(),
            bio: None,
            avatar_url: user.avatar_url.clone(),
        };
        state.users.insert(id, (created.clone(), password.clone()));
        Ok(Some(created))
    }

    async fn fetch_credentials(
        &self,
        handle: &UserHandle,
    ) -> Result<Option<(User, PasswordDigest)>> {
        let state = self.state.lock();
        let credentials = state
            .users
            .values()
            .find(|(user, _)| &user.handle == handle)
            .cloned();
        Ok(credentials)
    }

    async fn fetch_profile(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<UserProfile>> {
        let state = self.state.lock();
        let profile = state.user(user_id).map(|user| UserProfile {
            user,
            followers_count: count(
                state
                    .follows
                    .iter()
                    .filter(|(_, followee)| *followee == user_id)
                    .count(),
            ),
            following_count: count(
                state
                    .follows
                    .iter()
                    .filter(|(follower, _)| *follower == user_id)
                    .count(),
            ),
            posts_count: count(
                state
                    .posts
                    .values()
                    .filter(|entry| entry.author == user_id)
                    .count(),
            ),
            is_following: state.follows.contains(&(viewer, user_id)),
        });
        Ok(profile)
    }

    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let mut state = self.state.lock();
        let updated = state.users.get_mut(&user_id).map(|(user, _)| {
            update.apply(user);
            user.clone()
        });
        Ok(updated)
    }

    async fn toggle_follow(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<Option<FollowState>> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&followee) {
            return Ok(None);
        }

        let following = if state.follows.remove(&(follower, followee)) {
            false
        } else {
            state.follows.insert((follower, followee));
            true
        };
        let followers_count = count(
            state
                .follows
                .iter()
                .filter(|(_, followed)| *followed == followee)
                .count(),
        );

        Ok(Some(FollowState {
            following,
            followers_count,
        }))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        self.state
            .lock()
            .authentications
            .insert(authentication.token_hash.clone(), authentication.clone());
        Ok(())
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        Ok(self.state.lock().authentications.get(token_hash).cloned())
    }

    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<bool> {
        Ok(self.state.lock().authentications.remove(token_hash).is_some())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn fetch_posts(&self, viewer: Id<UserMarker>) -> Result<Vec<Post>> {
        Ok(self.state.lock().posts_where(viewer, |_| true))
    }

    async fn fetch_post(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Post>> {
        Ok(self.state.lock().post(post_id, viewer))
    }

    async fn fetch_user_posts(
        &self,
        user_id: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Option<Vec<Post>>> {
        let state = self.state.lock();
        if !state.users.contains_key(&user_id) {
            return Ok(None);
        }
        Ok(Some(state.posts_where(viewer, |entry| entry.author == user_id)))
    }

    async fn post_exists(&self, post_id: Id<PostMarker>) -> Result<bool> {
        Ok(self.state.lock().posts.contains_key(&post_id))
    }

    async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&post.author) {
            return Err(DbError::UnknownUser(post.author));
        }

        let id = state.snowflake_generator.generate()?.into();
        state.posts.insert(
            id,
            PostEntry {
                author: post.author,
                body: post.body.clone(),
                created_at: OffsetDateTime::now_utc(),
            },
        );

        state
            .post(id, post.author)
            .ok_or(DbError::UnknownUser(post.author))
    }

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
        body: &PostBody,
    ) -> Result<AuthorWrite<Post>> {
        let mut state = self.state.lock();
        let Some(entry) = state.posts.get_mut(&post_id) else {
            return Ok(AuthorWrite::NotFound);
        };
        if entry.author != requester {
            return Ok(AuthorWrite::NotAuthor);
        }
        entry.body = body.clone();

        Ok(state
            .post(post_id, requester)
            .map_or(AuthorWrite::NotFound, AuthorWrite::Applied))
    }

    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<()>> {
        let mut state = self.state.lock();
        match state.posts.get(&post_id) {
            None => return Ok(AuthorWrite::NotFound),
            Some(entry) if entry.author != requester => return Ok(AuthorWrite::NotAuthor),
            Some(_) => {}
        }

        state.posts.remove(&post_id);
        state.post_likes.retain(|(liked_post, _)| *liked_post != post_id);
        let comments: Vec<_> = state
            .comments
            .iter()
            .filter(|(_, entry)| entry.post_id == post_id)
            .map(|(id, _)| *id)
            .collect();
        state.remove_comments(&comments);

        Ok(AuthorWrite::Applied(()))
    }

    async fn toggle_post_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>> {
        let mut state = self.state.lock();
        if !state.posts.contains_key(&post_id) {
            return Ok(None);
        }

        let liked = if state.post_likes.remove(&(post_id, user_id)) {
            false
        } else {
            state.post_likes.insert((post_id, user_id));
            true
        };
        let likes_count = count(
            state
                .post_likes
                .iter()
                .filter(|(liked_post, _)| *liked_post == post_id)
                .count(),
        );

        Ok(Some(LikeState { liked, likes_count }))
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn create_comment(&self, comment: &CreateComment) -> Result<CreateCommentOutcome> {
        let mut state = self.state.lock();
        if !state.posts.contains_key(&comment.post_id) {
            return Ok(CreateCommentOutcome::PostNotFound);
        }
        if let Some(parent_id) = comment.body.parent_id {
            let parent_post = state.comments.get(&parent_id).map(|parent| parent.post_id);
            if parent_post != Some(comment.post_id) {
                return Ok(CreateCommentOutcome::ParentNotFound);
            }
        }

        if !state.users.contains_key(&comment.author) {
            return Err(DbError::UnknownUser(comment.author));
        }

        let id = state.snowflake_generator.generate()?.into();
        state.comments.insert(
            id,
            CommentEntry {
                post_id: comment.post_id,
                author: comment.author,
                parent_id: comment.body.parent_id,
                content: comment.body.content.clone(),
                created_at: OffsetDateTime::now_utc(),
            },
        );

        let created = state
            .comment(id)
            .ok_or(DbError::UnknownUser(comment.author))?;
        Ok(CreateCommentOutcome::Created(created))
    }

    async fn fetch_comment(&self, comment_id: Id<CommentMarker>) -> Result<Option<Comment>> {
        Ok(self.state.lock().comment(comment_id))
    }

    async fn list_top_level(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        Ok(self
            .state
            .lock()
            .comments_where(|entry| entry.post_id == post_id && entry.parent_id.is_none()))
    }

    async fn list_replies(&self, parent_id: Id<CommentMarker>) -> Result<Vec<Comment>> {
        Ok(self
            .state
            .lock()
            .comments_where(|entry| entry.parent_id == Some(parent_id)))
    }

    async fn list_post_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        Ok(self
            .state
            .lock()
            .comments_where(|entry| entry.post_id == post_id))
    }

    async fn delete_comment(
        &self,
        comment_id: Id<CommentMarker>,
        requester: Id<UserMarker>,
    ) -> Result<AuthorWrite<u64>> {
        let mut state = self.state.lock();
        match state.comments.get(&comment_id) {
            None => return Ok(AuthorWrite::NotFound),
            Some(entry) if entry.author != requester => return Ok(AuthorWrite::NotAuthor),
            Some(_) => {}
        }

        let subtree = state.subtree(comment_id);
        state.remove_comments(&subtree);
        Ok(AuthorWrite::Applied(subtree.len() as u64))
    }

    async fn toggle_comment_like(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<LikeState>> {
        let mut state = self.state.lock();
        if !state.comments.contains_key(&comment_id) {
            return Ok(None);
        }

        let liked = if state.comment_likes.remove(&(comment_id, user_id)) {
            false
        } else {
            state.comment_likes.insert((comment_id, user_id));
            true
        };

        Ok(Some(LikeState {
            liked,
            likes_count: state.comment_like_count(comment_id),
        }))
    }

    async fn like_count(&self, comment_id: Id<CommentMarker>) -> Result<i64> {
        Ok(self.state.lock().comment_like_count(comment_id))
    }

    async fn has_liked(
        &self,
        comment_id: Id<CommentMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<bool> {
        Ok(self.state.lock().comment_likes.contains(&(comment_id, user_id)))
    }

    async fn post_comment_likes(
        &self,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<HashMap<Id<CommentMarker>, LikeState>> {
        let state = self.state.lock();
        let mut likes: HashMap<Id<CommentMarker>, LikeState> = HashMap::new();
        for (comment_id, user_id) in &state.comment_likes {
            let on_post = state
                .comments
                .get(comment_id)
                .is_some_and(|entry| entry.post_id == post_id);
            if on_post {
                let like = likes.entry(*comment_id).or_default();
                like.likes_count += 1;
                like.liked |= *user_id == viewer;
            }
        }
        Ok(likes)
    }
}

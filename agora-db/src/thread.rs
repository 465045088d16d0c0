//! Assembles a post's comments into the nested thread shown to a viewer.

use crate::store::{CommentStore, DbError, Result};
use agora_common::model::{
    Id,
    comment::{Comment, CommentMarker, CommentNode},
    like::LikeState,
    post::PostMarker,
    user::UserMarker,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::vec;

/// How a thread is read from the store. Both produce the same tree.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadMode {
    /// One query per comment for its likes and one for its replies.
    #[default]
    Recursive,
    /// Two queries for the whole post; the tree is built in memory.
    Batched,
}

impl ThreadMode {
    pub async fn build<S>(
        self,
        store: &S,
        post_id: Id<PostMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Vec<CommentNode>>
    where
        S: CommentStore + ?Sized,
    {
        match self {
            ThreadMode::Recursive => build_thread(store, post_id, viewer).await,
            ThreadMode::Batched => build_thread_batched(store, post_id, viewer).await,
        }
    }
}

/// A comment whose replies are still being built.
struct Frame {
    comment: Comment,
    like: LikeState,
    pending: vec::IntoIter<Comment>,
    replies: Vec<CommentNode>,
}

impl Frame {
    fn into_node(self) -> CommentNode {
        CommentNode {
            comment: self.comment,
            likes_count: self.like.likes_count,
            is_liked: self.like.liked,
            replies: self.replies,
        }
    }
}

/// Walks a thread depth first on an explicit stack of open comments, so reply
/// chains of any length are built without nested calls.
///
/// Callers take comments from [`next_comment`](Self::next_comment) and hand each
/// one back through [`push`](Self::push) together with its replies. Siblings
/// keep the order they were pushed in.
struct ThreadBuilder {
    top_level: vec::IntoIter<Comment>,
    path: Vec<Frame>,
    roots: Vec<CommentNode>,
}

impl ThreadBuilder {
    fn new(top_level: Vec<Comment>) -> Self {
        Self {
            top_level: top_level.into_iter(),
            path: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// The next comment to expand. Comments whose replies are all built are
    /// closed on the way and attached to their parent.
    fn next_comment(&mut self) -> Option<Comment> {
        while let Some(frame) = self.path.last_mut() {
            if let Some(comment) = frame.pending.next() {
                return Some(comment);
            }

            if let Some(done) = self.path.pop() {
                let node = done.into_node();
                match self.path.last_mut() {
                    Some(parent) => parent.replies.push(node),
                    None => self.roots.push(node),
                }
            }
        }

        self.top_level.next()
    }

    fn push(&mut self, comment: Comment, like: LikeState, replies: Vec<Comment>) {
        self.path.push(Frame {
            comment,
            like,
            replies: Vec::with_capacity(replies.len()),
            pending: replies.into_iter(),
        });
    }

    /// Only complete once [`next_comment`](Self::next_comment) returned `None`.
    fn finish(self) -> Vec<CommentNode> {
        self.roots
    }
}

/// Builds the thread of `post_id` by walking replies one comment at a time.
///
/// Top-level comments and every list of replies are ordered newest first.
pub async fn build_thread<S>(
    store: &S,
    post_id: Id<PostMarker>,
    viewer: Id<UserMarker>,
) -> Result<Vec<CommentNode>>
where
    S: CommentStore + ?Sized,
{
    let mut builder = ThreadBuilder::new(store.list_top_level(post_id).await?);

    // A comment has a single parent, so it is only reached twice when a
    // store's reply lists disagree with its parent links.
    let mut visited = HashSet::new();
    while let Some(comment) = builder.next_comment() {
        if !visited.insert(comment.id) {
            return Err(DbError::CommentCycle(comment.id));
        }

        let like = LikeState {
            likes_count: store.like_count(comment.id).await?,
            liked: store.has_liked(comment.id, viewer).await?,
        };
        let replies = store.list_replies(comment.id).await?;
        builder.push(comment, like, replies);
    }

    Ok(builder.finish())
}

/// Builds the same thread as [`build_thread`] from all of the post's comments
/// and likes at once.
pub async fn build_thread_batched<S>(
    store: &S,
    post_id: Id<PostMarker>,
    viewer: Id<UserMarker>,
) -> Result<Vec<CommentNode>>
where
    S: CommentStore + ?Sized,
{
    let comments = store.list_post_comments(post_id).await?;
    let likes = store.post_comment_likes(post_id, viewer).await?;

    // Pushing in thread order keeps every sibling list newest first.
    let mut children: HashMap<Option<Id<CommentMarker>>, Vec<Comment>> = HashMap::new();
    for comment in comments {
        children.entry(comment.parent_id).or_default().push(comment);
    }

    // Each list is removed once it is used, so a node cannot be expanded twice.
    let mut builder = ThreadBuilder::new(children.remove(&None).unwrap_or_default());
    while let Some(comment) = builder.next_comment() {
        let replies = children.remove(&Some(comment.id)).unwrap_or_default();
        let like = likes.get(&comment.id).copied().unwrap_or_default();
        builder.push(comment, like, replies);
    }

    Ok(builder.finish())
}

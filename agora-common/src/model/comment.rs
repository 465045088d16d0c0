use crate::model::{
    Id,
    post::PostMarker,
    user::{User, UserMarker},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// A stored comment. `parent_id` is `None` for top-level comments.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: User,
    pub parent_id: Option<Id<CommentMarker>>,
    pub content: CommentContent,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Comment {
    /// Newest first, ties broken by the larger id.
    #[must_use]
    pub fn thread_order(&self, other: &Self) -> std::cmp::Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// What a client sends to create a comment.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CommentBody {
    pub content: CommentContent,
    #[serde(default)]
    pub parent_id: Option<Id<CommentMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateComment {
    pub post_id: Id<PostMarker>,
    pub author: Id<UserMarker>,
    pub body: CommentBody,
}

/// One comment of a thread as seen by a particular viewer, with its replies.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub likes_count: i64,
    pub is_liked: bool,
    pub replies: Vec<CommentNode>,
}

impl From<Comment> for CommentNode {
    /// A node without likes or replies, as for a freshly created comment.
    fn from(comment: Comment) -> Self {
        Self {
            comment,
            likes_count: 0,
            is_liked: false,
            replies: Vec::new(),
        }
    }
}

impl CommentNode {
    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(&node.replies);
        }
        count
    }

    /// Length of the longest parent chain in this subtree, `1` for a leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            pending.extend(node.replies.iter().map(|reply| (reply, depth + 1)));
        }
        deepest
    }
}

impl Drop for CommentNode {
    // Reply chains can be arbitrarily long, so descendants are detached and
    // dropped one at a time instead of through nested drop calls.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

validated_string!(
    CommentContent,
    InvalidCommentContentError,
    "Comment content must not be empty",
    |content| !content.trim().is_empty()
);

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        comment::{Comment, CommentBody, CommentContent, CommentNode},
        user::{DisplayName, User, UserHandle},
    };
    use time::macros::datetime;

    fn comment(id: u64, parent: Option<u64>) -> Comment {
        Comment {
            id: id.into(),
            post_id: 5.into(),
            author: User {
                id: 1.into(),
                handle: UserHandle::new("alice".to_owned()).unwrap(),
                display_name: DisplayName::new("Alice".to_owned()).unwrap(),
                bio: None,
                avatar_url: None,
            },
            parent_id: parent.map(Id::from),
            content: CommentContent::new(format!("comment {id}")).unwrap(),
            created_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    fn node(comment: Comment, replies: Vec<CommentNode>) -> CommentNode {
        CommentNode {
            comment,
            likes_count: 0,
            is_liked: false,
            replies,
        }
    }

    #[test]
    fn content_must_not_be_blank() {
        assert!(CommentContent::new("hello".to_owned()).is_ok());
        assert!(CommentContent::new(String::new()).is_err());
        assert!(CommentContent::new(" \n\t".to_owned()).is_err());
    }

    #[test]
    fn body_parent_is_optional() {
        let body: CommentBody = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(body.parent_id, None);

        let body: CommentBody =
            serde_json::from_str(r#"{"content":"hi","parent_id":42}"#).unwrap();
        assert_eq!(body.parent_id, Some(42.into()));

        assert!(serde_json::from_str::<CommentBody>(r#"{"content":""}"#).is_err());
    }

    #[test]
    fn thread_order_is_newest_first() {
        let older = comment(1, None);
        let mut newer = comment(2, None);
        newer.created_at += time::Duration::seconds(1);
        let same_time_larger_id = comment(3, None);

        assert!(newer.thread_order(&older).is_lt());
        assert!(same_time_larger_id.thread_order(&older).is_lt());
    }

    #[test]
    fn node_serializes_flat_with_replies() {
        let tree = node(comment(1, None), vec![node(comment(2, Some(1)), vec![])]);
        let json = serde_json::to_value(&tree).unwrap();

        assert_eq!(json["id"], 1);
        assert_eq!(json["post_id"], 5);
        assert_eq!(json["parent_id"], serde_json::Value::Null);
        assert_eq!(json["author"]["handle"], "alice");
        assert_eq!(json["created_at"], "2025-06-01T12:00:00Z");
        assert_eq!(json["replies"][0]["id"], 2);
        assert_eq!(json["replies"][0]["parent_id"], 1);
        assert_eq!(json["replies"][0]["replies"], serde_json::json!([]));
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn long_reply_chain_is_measured_and_dropped() {
        let mut chain = node(comment(0, None), vec![]);
        for id in 1..50_000 {
            chain = node(comment(id, Some(id - 1)), vec![chain]);
        }

        assert_eq!(chain.depth(), 50_000);
        assert_eq!(chain.node_count(), 50_000);
        drop(chain);
    }
}

use serde::{Deserialize, Serialize};

/// The outcome of a like toggle, or the like state of one item for a viewer.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes_count: i64,
}

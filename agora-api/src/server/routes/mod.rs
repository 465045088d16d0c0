use crate::server::ServerRouter;
use axum::Router;
use serde::{Deserialize, Serialize};

mod auth;
mod comments;
mod posts;
mod users;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(posts::routes())
        .merge(comments::routes())
}

/// Body of responses that only confirm an action.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

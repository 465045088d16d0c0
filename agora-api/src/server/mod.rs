use agora_common::{
    model::{
        Id,
        auth::{AuthTokenDecodeError, AuthTokenHashError, PasswordHashError},
        comment::CommentMarker,
        post::PostMarker,
        user::{UserHandle, UserMarker},
    },
    util::PositiveDuration,
};
use agora_db::{
    store::{DbError, Store},
    thread::ThreadMode,
};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod auth;
mod json;
mod routes;
#[cfg(test)]
mod test_util;

pub type ServerRouter = Router<ServerState>;

/// How long newly issued auth tokens stay valid. `None` means forever.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct TokenLifetime(pub Option<PositiveDuration>);

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub thread_mode: ThreadMode,
    pub token_lifetime: TokenLifetime,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("The password could not be hashed: {0}")]
    PasswordHash(#[from] PasswordHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("Handle or password was incorrect")]
    InvalidCredentials,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentByIdNotFound(Id<CommentMarker>),
    #[error("Parent comment with id {0} was not found on this post.")]
    ParentCommentNotFound(Id<CommentMarker>),
    #[error("Only the author may modify post {0}.")]
    NotPostAuthor(Id<PostMarker>),
    #[error("Only the author may delete comment {0}.")]
    NotCommentAuthor(Id<CommentMarker>),
    #[error("Users cannot follow themselves.")]
    SelfFollow,
    #[error("The handle {} is already taken.", .0.get())]
    HandleTaken(UserHandle),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::CommentByIdNotFound(_)
            | ServerError::ParentCommentNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::InvalidToken
            | ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::NotPostAuthor(_) | ServerError::NotCommentAuthor(_) => {
                StatusCode::FORBIDDEN
            }
            ServerError::PathRejection(_)
            | ServerError::JsonRejection(_)
            | ServerError::SelfFollow => StatusCode::BAD_REQUEST,
            ServerError::HandleTaken(_) => StatusCode::CONFLICT,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error = if status.is_server_error() {
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

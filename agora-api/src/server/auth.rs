use crate::server::ServerError;
use agora_common::model::{
    Id,
    auth::{AuthToken, AuthTokenHash},
    user::UserMarker,
};
use agora_db::store::Store;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// The caller identified by a valid, unexpired bearer token.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
    token_hash: AuthTokenHash,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.id
    }

    /// The hash the request's token is stored under.
    #[must_use]
    pub fn token_hash(&self) -> &AuthTokenHash {
        &self.token_hash
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;

        let authentication = Arc::<dyn Store>::from_ref(state)
            .fetch_auth(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if authentication.user != request_token.user_id {
            debug!(token_user = %request_token.user_id, "Token user does not match its record");
            return Err(ServerError::InvalidToken);
        }

        if authentication.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(ServerError::InvalidToken);
        }

        Ok(Self {
            id: authentication.user,
            token_hash,
        })
    }
}

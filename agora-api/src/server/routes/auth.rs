use crate::server::{
    Result, ServerError, ServerRouter, TokenLifetime,
    auth::AuthenticatedUser,
    json::{Created, Json},
    routes::MessageResponse,
};
use agora_common::model::{
    Id,
    auth::{AuthToken, Authentication, Password},
    user::{CreateUser, User, UserHandle, UserMarker},
};
use agora_db::store::Store;
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_post(register)
        .typed_post(login)
        .typed_post(logout)
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
struct Registration {
    #[serde(flatten)]
    user: CreateUser,
    password: Password,
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
struct Credentials {
    handle: UserHandle,
    password: String,
}

/// A user together with a freshly issued bearer token.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
struct Session {
    user: User,
    token: String,
}

async fn issue_token(
    store: &dyn Store,
    user_id: Id<UserMarker>,
    TokenLifetime(expires_after): TokenLifetime,
) -> Result<String> {
    let token = AuthToken::generate_random(user_id);
    let authentication = Authentication {
        user: user_id,
        token_hash: token.hash()?,
        created_at: OffsetDateTime::now_utc(),
        expires_after,
    };
    store.create_auth(&authentication).await?;

    Ok(token.as_token_str())
}

#[derive(TypedPath)]
#[typed_path("/users")]
struct RegisterPath;

async fn register(
    _: RegisterPath,
    State(store): State<Arc<dyn Store>>,
    State(token_lifetime): State<TokenLifetime>,
    Json(registration): Json<Registration>,
) -> Result<Created<Session>> {
    let digest = registration.password.hash()?;
    let user = store
        .create_user(&registration.user, &digest)
        .await?
        .ok_or_else(|| ServerError::HandleTaken(registration.user.handle.clone()))?;

    info!(user = %user.id, handle = user.handle.get(), "Registered user");

    let token = issue_token(&*store, user.id, token_lifetime).await?;
    Ok(Created(Session { user, token }))
}

#[derive(TypedPath)]
#[typed_path("/auth/login")]
struct LoginPath;

async fn login(
    _: LoginPath,
    State(store): State<Arc<dyn Store>>,
    State(token_lifetime): State<TokenLifetime>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>> {
    let (user, digest) = store
        .fetch_credentials(&credentials.handle)
        .await?
        .ok_or(ServerError::InvalidCredentials)?;

    // Passwords too short to have been registered can never match.
    let matches =
        Password::new(credentials.password).is_ok_and(|password| password.verify(&digest));
    if !matches {
        return Err(ServerError::InvalidCredentials);
    }

    let token = issue_token(&*store, user.id, token_lifetime).await?;
    Ok(Json(Session { user, token }))
}

#[derive(TypedPath)]
#[typed_path("/logout")]
struct LogoutPath;

/// Revokes the token the request was made with. Other sessions stay valid.
async fn logout(
    _: LogoutPath,
    user: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<MessageResponse>> {
    let revoked = store.delete_auth(user.token_hash()).await?;
    debug!(user = %user.user_id(), revoked, "Logged out");

    Ok(Json(MessageResponse::new("Logged out")))
}

use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Json};
use agora_common::model::{
    Id,
    post::Post,
    user::{FollowState, ProfileUpdate, User, UserMarker, UserProfile},
};
use agora_db::store::Store;
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(get_me)
        .typed_get(get_user)
        .typed_get(get_user_posts)
        .typed_post(toggle_follow)
        .typed_put(update_profile)
        .typed_post(update_profile)
}

#[derive(TypedPath)]
#[typed_path("/users/me")]
struct MePath;

async fn get_me(
    _: MePath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
) -> Result<Json<UserProfile>> {
    let id = user.user_id();
    let profile = store
        .fetch_profile(id, id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(profile))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct UserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    path: Result<UserPath, ServerError>,
    viewer: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<UserProfile>> {
    let UserPath { id } = path?;
    let profile = store
        .fetch_profile(id, viewer.user_id())
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(profile))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/posts", rejection(ServerError))]
struct UserPostsPath {
    id: Id<UserMarker>,
}

async fn get_user_posts(
    path: Result<UserPostsPath, ServerError>,
    viewer: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<Vec<Post>>> {
    let UserPostsPath { id } = path?;
    let posts = store
        .fetch_user_posts(id, viewer.user_id())
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/follow", rejection(ServerError))]
struct FollowPath {
    id: Id<UserMarker>,
}

async fn toggle_follow(
    path: Result<FollowPath, ServerError>,
    follower: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<FollowState>> {
    let FollowPath { id } = path?;
    let follower = follower.user_id();
    if follower == id {
        return Err(ServerError::SelfFollow);
    }

    let state = store
        .toggle_follow(follower, id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    debug!(%follower, followee = %id, following = state.following, "Toggled follow");
    Ok(Json(state))
}

#[derive(TypedPath)]
#[typed_path("/profile")]
struct ProfilePath;

/// Edits the caller's own profile. Fields missing from the body are kept.
async fn update_profile(
    _: ProfilePath,
    user: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>> {
    let id = user.user_id();
    let user = store
        .update_profile(id, &update)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    debug!(user = %id, "Updated profile");
    Ok(Json(user))
}

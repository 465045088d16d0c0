use super::MessageResponse;
use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use agora_common::model::{
    Id,
    like::LikeState,
    post::{CreatePost, Post, PostBody, PostMarker},
};
use agora_db::store::{AuthorWrite, Store};
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(get_posts)
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_post(toggle_like)
}

#[derive(TypedPath)]
#[typed_path("/posts")]
struct PostsPath;

async fn get_posts(
    _: PostsPath,
    State(store): State<Arc<dyn Store>>,
    viewer: AuthenticatedUser,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(store.fetch_posts(viewer.user_id()).await?))
}

async fn create_post(
    _: PostsPath,
    State(store): State<Arc<dyn Store>>,
    author: AuthenticatedUser,
    Json(body): Json<PostBody>,
) -> Result<Created<Post>> {
    let post = store
        .create_post(&CreatePost {
            author: author.user_id(),
            body,
        })
        .await?;

    info!(post = %post.id, author = %post.author.id, "Created post");
    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    path: Result<PostPath, ServerError>,
    viewer: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<Post>> {
    let PostPath { id } = path?;
    let post = store
        .fetch_post(id, viewer.user_id())
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn update_post(
    path: Result<PostPath, ServerError>,
    requester: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
    Json(body): Json<PostBody>,
) -> Result<Json<Post>> {
    let PostPath { id } = path?;
    match store.update_post(id, requester.user_id(), &body).await? {
        AuthorWrite::Applied(post) => Ok(Json(post)),
        AuthorWrite::NotFound => Err(ServerError::PostByIdNotFound(id)),
        AuthorWrite::NotAuthor => Err(ServerError::NotPostAuthor(id)),
    }
}

async fn delete_post(
    path: Result<PostPath, ServerError>,
    requester: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<MessageResponse>> {
    let PostPath { id } = path?;
    match store.delete_post(id, requester.user_id()).await? {
        AuthorWrite::Applied(()) => {
            info!(post = %id, "Deleted post");
            Ok(Json(MessageResponse::new("Post deleted")))
        }
        AuthorWrite::NotFound => Err(ServerError::PostByIdNotFound(id)),
        AuthorWrite::NotAuthor => Err(ServerError::NotPostAuthor(id)),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/like", rejection(ServerError))]
struct PostLikePath {
    id: Id<PostMarker>,
}

async fn toggle_like(
    path: Result<PostLikePath, ServerError>,
    user: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<LikeState>> {
    let PostLikePath { id } = path?;
    let state = store
        .toggle_post_like(id, user.user_id())
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(state))
}

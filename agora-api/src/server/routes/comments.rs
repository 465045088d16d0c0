use super::MessageResponse;
use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json, ThreadJson},
};
use agora_common::model::{
    Id,
    comment::{CommentBody, CommentMarker, CommentNode, CreateComment},
    like::LikeState,
    post::PostMarker,
};
use agora_db::{
    store::{AuthorWrite, CreateCommentOutcome, Store},
    thread::ThreadMode,
};
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(get_thread)
        .typed_post(create_comment)
        .typed_delete(delete_comment)
        .typed_post(toggle_like)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct PostCommentsPath {
    id: Id<PostMarker>,
}

async fn get_thread(
    path: Result<PostCommentsPath, ServerError>,
    viewer: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
    State(thread_mode): State<ThreadMode>,
) -> Result<ThreadJson> {
    let PostCommentsPath { id } = path?;
    if !store.post_exists(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    let thread = thread_mode.build(&*store, id, viewer.user_id()).await?;
    Ok(ThreadJson(thread))
}

async fn create_comment(
    path: Result<PostCommentsPath, ServerError>,
    author: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
    Json(body): Json<CommentBody>,
) -> Result<Created<CommentNode>> {
    let PostCommentsPath { id } = path?;
    let create = CreateComment {
        post_id: id,
        author: author.user_id(),
        body,
    };

    match store.create_comment(&create).await? {
        CreateCommentOutcome::Created(comment) => {
            info!(
                comment = %comment.id,
                post = %id,
                parent = ?comment.parent_id,
                "Created comment",
            );
            Ok(Created(comment.into()))
        }
        CreateCommentOutcome::PostNotFound => Err(ServerError::PostByIdNotFound(id)),
        CreateCommentOutcome::ParentNotFound => match create.body.parent_id {
            Some(parent_id) => Err(ServerError::ParentCommentNotFound(parent_id)),
            None => Err(ServerError::PostByIdNotFound(id)),
        },
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}", rejection(ServerError))]
struct CommentPath {
    id: Id<CommentMarker>,
}

async fn delete_comment(
    path: Result<CommentPath, ServerError>,
    requester: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<MessageResponse>> {
    let CommentPath { id } = path?;
    match store.delete_comment(id, requester.user_id()).await? {
        AuthorWrite::Applied(removed) => {
            info!(comment = %id, removed, "Deleted comment");
            Ok(Json(MessageResponse::new("Comment deleted")))
        }
        AuthorWrite::NotFound => Err(ServerError::CommentByIdNotFound(id)),
        AuthorWrite::NotAuthor => Err(ServerError::NotCommentAuthor(id)),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}/like", rejection(ServerError))]
struct CommentLikePath {
    id: Id<CommentMarker>,
}

async fn toggle_like(
    path: Result<CommentLikePath, ServerError>,
    user: AuthenticatedUser,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<LikeState>> {
    let CommentLikePath { id } = path?;
    let state = store
        .toggle_comment_like(id, user.user_id())
        .await?
        .ok_or(ServerError::CommentByIdNotFound(id))?;

    Ok(Json(state))
}

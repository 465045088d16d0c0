use crate::server::ServerError;
use agora_common::model::comment::{Comment, CommentNode};
use axum::{
    Json as AxumJson,
    extract::FromRequest,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;

/// JSON extractor and response whose failures surface as [`ServerError`].
#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        serialize(&self.0)
    }
}

/// A JSON body answered with `201 Created`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, serialize(&self.0)).into_response()
    }
}

/// A comment thread, written out level by level instead of through nested
/// `Serialize` calls so that reply chains of any depth can be sent.
///
/// The output is the same as serializing the nodes directly.
#[derive(Debug, Clone, Default)]
pub struct ThreadJson(pub Vec<CommentNode>);

impl IntoResponse for ThreadJson {
    fn into_response(self) -> Response {
        json_response(write_thread(&self.0))
    }
}

/// Everything of a node except its replies.
#[derive(Serialize)]
struct NodeHead<'a> {
    #[serde(flatten)]
    comment: &'a Comment,
    likes_count: i64,
    is_liked: bool,
}

fn write_thread(roots: &[CommentNode]) -> serde_json::Result<Vec<u8>> {
    let mut json = vec![b'['];
    let mut levels = vec![roots.iter()];

    while let Some(level) = levels.last_mut() {
        let Some(node) = level.next() else {
            levels.pop();
            json.push(b']');
            // Every level but the outermost is the replies of an open node.
            if !levels.is_empty() {
                json.push(b'}');
            }
            continue;
        };

        if json.last() != Some(&b'[') {
            json.push(b',');
        }
        serde_json::to_writer(
            &mut json,
            &NodeHead {
                comment: &node.comment,
                likes_count: node.likes_count,
                is_liked: node.is_liked,
            },
        )?;
        // Reopen the object to append the replies.
        json.pop();
        json.extend_from_slice(br#","replies":["#);
        levels.push(node.replies.iter());
    }

    Ok(json)
}

fn serialize<T: Serialize>(value: &T) -> Response {
    json_response(serde_json::to_vec(value))
}

fn json_response(json: serde_json::Result<Vec<u8>>) -> Response {
    match json {
        Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
        Err(err) => ServerError::JsonResponse(err).into_response(),
    }
}

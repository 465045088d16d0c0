use crate::server::{ServerState, TokenLifetime, routes};
use agora_common::model::{
    Id,
    comment::CommentMarker,
    post::PostMarker,
    user::UserMarker,
};
use agora_db::{memory::MemoryStore, thread::ThreadMode};
use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

/// A router over a fresh [`MemoryStore`], driven one request at a time.
pub struct TestServer {
    router: Router,
    store: Arc<MemoryStore>,
}

impl TestServer {
    pub const PASSWORD: &str = "correct horse battery staple";

    pub fn new() -> Self {
        Self::with_thread_mode(ThreadMode::default())
    }

    pub fn with_thread_mode(thread_mode: ThreadMode) -> Self {
        let store = Arc::new(MemoryStore::default());
        let state = ServerState {
            store: store.clone(),
            thread_mode,
            token_lifetime: TokenLifetime::default(),
        };

        Self {
            router: routes().with_state(state),
            store,
        }
    }

    /// The store behind the router, for seeding data the API has no shortcut for.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.request_raw(method, uri, token, body).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body)
    }

    /// Like [`Self::request`], but leaves the response body unparsed.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Bytes) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, bytes)
    }

    /// Registers `handle` with [`Self::PASSWORD`] and returns its id and token.
    pub async fn register(&self, handle: &str) -> (Id<UserMarker>, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/users",
                None,
                Some(json!({
                    "handle": handle,
                    "display_name": handle,
                    "password": Self::PASSWORD,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        let id = serde_json::from_value(body["user"]["id"].clone()).unwrap();
        let token = body["token"].as_str().unwrap().to_owned();
        (id, token)
    }

    pub async fn create_post(&self, token: &str, content: &str) -> Id<PostMarker> {
        let (status, body) = self
            .request(
                Method::POST,
                "/posts",
                Some(token),
                Some(json!({"content": content})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        serde_json::from_value(body["id"].clone()).unwrap()
    }

    pub async fn comment(
        &self,
        token: &str,
        post_id: Id<PostMarker>,
        content: &str,
        parent_id: Option<Id<CommentMarker>>,
    ) -> Id<CommentMarker> {
        let (status, body) = self
            .request(
                Method::POST,
                &format!("/posts/{post_id}/comments"),
                Some(token),
                Some(json!({"content": content, "parent_id": parent_id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        serde_json::from_value(body["id"].clone()).unwrap()
    }
}

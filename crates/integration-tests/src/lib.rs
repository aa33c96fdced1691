//! Test harness: the real router over the in-memory store, with a hook into
//! the room hub so tests can observe what each room receives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use api_adapters::{router, AppState, RoomHub, RouterOptions};
use async_trait::async_trait;
use auth_adapters::JwtTokenService;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use domains::{PasswordHasher, Result, Room, TokenService, User, UserRepository};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use services::{Ports, Services};
use storage_adapters::{LocalMediaStorage, MemoryStore};
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "agora-test-boundary";

/// Argon2 is slow in debug builds; the flows under test do not depend on it.
struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash_password(&self, password: &str) -> Result<String> {
        Ok(format!("plain${password}"))
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        Ok(hash.strip_prefix("plain$") == Some(password))
    }
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub router: Router,
    pub hub: Arc<RoomHub>,
    pub store: MemoryStore,
    tokens: Arc<JwtTokenService>,
    uploads: PathBuf,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let hub = Arc::new(RoomHub::new());
        let tokens = Arc::new(JwtTokenService::new(b"integration-secret", 1));
        let uploads = std::env::temp_dir().join(format!("agora-it-{}", Uuid::new_v4()));
        let shared = Arc::new(store.clone());
        let ports = Ports {
            users: shared.clone(),
            posts: shared.clone(),
            comments: shared.clone(),
            votes: shared.clone(),
            media: shared.clone(),
            conversations: shared.clone(),
            messages: shared.clone(),
            notifications: shared,
            storage: Arc::new(LocalMediaStorage::new(&uploads, "/uploads")),
            hasher: Arc::new(PlainHasher),
            tokens: tokens.clone(),
            events: hub.clone(),
        };
        let router = router(
            AppState::new(Services::new(ports), hub.clone()),
            &RouterOptions::default(),
        );
        Self {
            router,
            hub,
            store,
            tokens,
            uploads,
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        user: Option<&TestUser>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", user.token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.call(request.unwrap()).await
    }

    pub async fn get(&self, uri: &str, user: Option<&TestUser>) -> (StatusCode, Value) {
        self.json(Method::GET, uri, user, None).await
    }

    pub async fn multipart(
        &self,
        method: Method,
        uri: &str,
        user: &TestUser,
        form: MultipartForm,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(form.finish()))
            .unwrap();
        self.call(request).await
    }

    pub async fn register(&self, username: &str) -> TestUser {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "secret1",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {username}: {body}");
        TestUser {
            id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Admins cannot be created over HTTP.
    pub async fn admin(&self, username: &str) -> TestUser {
        let mut user = User::new(username.into(), format!("{username}@example.com"), String::new());
        user.is_admin = true;
        let user = self.store.create_user(user).await.unwrap();
        TestUser {
            id: user.id,
            token: self.tokens.issue(user.id).unwrap(),
        }
    }

    pub async fn create_post(&self, author: &TestUser, title: &str) -> Uuid {
        let form = MultipartForm::new()
            .text("title", title)
            .text("content", "body text");
        let (status, body) = self.multipart(Method::POST, "/api/posts", author, form).await;
        assert_eq!(status, StatusCode::CREATED, "create post: {body}");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn comment(
        &self,
        author: &TestUser,
        post_id: Uuid,
        parent: Option<Uuid>,
        content: &str,
    ) -> Value {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/comments",
                Some(author),
                Some(json!({ "postId": post_id, "parentCommentId": parent, "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "comment: {body}");
        body
    }

    pub async fn vote(&self, voter: &TestUser, target: Value) -> (StatusCode, Value) {
        self.json(Method::POST, "/api/votes", Some(voter), Some(target)).await
    }

    /// Opens a fake socket and places it in `room`.
    pub fn listen(&self, room: Room) -> Listener {
        let id = Uuid::new_v4();
        let rx = self.hub.connect(id);
        self.hub.join(id, room);
        Listener { rx }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.uploads);
    }
}

pub struct Listener {
    rx: UnboundedReceiver<String>,
}

impl Listener {
    /// Every frame received so far, oldest first.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Payloads of the frames named `event`, oldest first.
    pub fn events(&mut self, event: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| f["event"] == event)
            .map(|f| f["data"].clone())
            .collect()
    }
}

/// Hand-rolled `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                 filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

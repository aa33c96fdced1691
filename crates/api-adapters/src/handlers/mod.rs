//! Request handlers, one module per resource.
//!
//! Handlers only translate between HTTP and the services: they parse the
//! request, pass the principal along and serialise what comes back.

pub mod auth;
pub mod chat;
pub mod comments;
pub mod media;
pub mod notifications;
pub mod posts;
pub mod users;
pub mod votes;

use axum::{extract::State, Json};
use domains::{FileUpload, PageRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use services::UploadedFile;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageParams {
    pub fn request(&self, default_limit: u64) -> PageRequest {
        PageRequest::new(self.page, self.limit, default_limit)
    }
}

/// Pairs uploads with their captions by position; missing captions are blank.
pub(crate) fn with_captions(files: Vec<FileUpload>, captions: Vec<String>) -> Vec<UploadedFile> {
    let mut captions = captions.into_iter();
    files
        .into_iter()
        .map(|file| UploadedFile {
            file,
            caption: captions.next().unwrap_or_default(),
        })
        .collect()
}

pub(crate) fn done(message: &str) -> Json<Value> {
    Json(json!({ "message": message }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "connections": state.hub.connection_count() }))
}

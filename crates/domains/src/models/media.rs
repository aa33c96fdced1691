use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// `video/*` maps to Video, `image/*` to Image, anything else is rejected.
    pub fn from_mime(mime: &Mime) -> Option<Self> {
        match mime.type_() {
            mime::VIDEO => Some(Self::Video),
            mime::IMAGE => Some(Self::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A file attached to exactly one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: Uuid,
    pub post_id: Uuid,
    pub filename: String,
    pub filepath: String,
    pub mimetype: String,
    pub media_type: MediaType,
    pub size: i64,
    pub caption: String,
    /// Explicit sequencing within the post
    pub order: i32,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Raw upload handed to the MediaStorage port.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: Mime,
    pub bytes: Bytes,
}

/// Where the MediaStorage port put an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    /// Stable public path, e.g. `/uploads/ab/cd/<name>.png`
    pub path: String,
    pub size: i64,
}

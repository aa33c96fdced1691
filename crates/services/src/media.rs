use std::sync::Arc;

use chrono::Utc;
use domains::{
    DomainError, FileUpload, Media, MediaRepository, MediaStorage, PostRepository, Principal,
    Result,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::lookup;
use crate::validation::{self, MAX_CAPTION_LEN};

/// One uploaded file and the caption submitted with it.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file: FileUpload,
    pub caption: String,
}

/// Writes every file through the storage port and builds the matching media
/// rows, ordered from `first_order`. Nothing is left on disk if any file
/// fails.
pub(crate) async fn store_uploads(
    storage: &dyn MediaStorage,
    files: Vec<UploadedFile>,
    post_id: Uuid,
    uploader: Uuid,
    first_order: i32,
) -> Result<Vec<Media>> {
    let mut checked = Vec::with_capacity(files.len());
    for UploadedFile { file, caption } in files {
        let media_type = validation::media_type(&file.content_type)?;
        let caption = validation::bounded_text("caption", caption.trim(), MAX_CAPTION_LEN)?;
        checked.push((file, caption, media_type));
    }

    let mut media = Vec::with_capacity(checked.len());
    for (order, (file, caption, media_type)) in (first_order..).zip(checked) {
        let mimetype = file.content_type.to_string();
        let stored = match storage.store(file).await {
            Ok(stored) => stored,
            Err(err) => {
                let written = media.iter().map(|m: &Media| m.filepath.clone()).collect();
                unlink_all(storage, written).await;
                return Err(err);
            }
        };
        media.push(Media {
            id: Uuid::new_v4(),
            post_id,
            filename: stored.filename,
            filepath: stored.path,
            mimetype,
            media_type,
            size: stored.size,
            caption,
            order,
            uploaded_by: uploader,
            created_at: Utc::now(),
        });
    }
    Ok(media)
}

/// Best-effort removal; the rows are already gone when this runs.
pub(crate) async fn unlink_all(storage: &dyn MediaStorage, paths: Vec<String>) {
    for path in paths {
        if let Err(err) = storage.remove(&path).await {
            warn!(path = %path, error = %err, "failed to unlink media file");
        }
    }
}

pub struct MediaService {
    media: Arc<dyn MediaRepository>,
    posts: Arc<dyn PostRepository>,
    storage: Arc<dyn MediaStorage>,
}

impl MediaService {
    pub fn new(
        media: Arc<dyn MediaRepository>,
        posts: Arc<dyn PostRepository>,
        storage: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            media,
            posts,
            storage,
        }
    }

    /// Appends files after the post's current highest order.
    pub async fn upload_media(
        &self,
        principal: Principal,
        post_id: Uuid,
        files: Vec<UploadedFile>,
    ) -> Result<Vec<Media>> {
        if files.is_empty() {
            return Err(DomainError::validation("no files uploaded"));
        }
        let post = lookup::live_post(self.posts.as_ref(), post_id).await?;
        principal.ensure_can_modify(post.author_id, "post")?;

        let next_order = self
            .media
            .list_post_media(post_id)
            .await?
            .iter()
            .map(|m| m.order + 1)
            .max()
            .unwrap_or(0);
        let media =
            store_uploads(self.storage.as_ref(), files, post_id, principal.id, next_order).await?;
        let paths: Vec<String> = media.iter().map(|m| m.filepath.clone()).collect();

        match self.media.attach_media(post_id, media).await {
            Ok(attached) => {
                info!(post_id = %post_id, count = attached.len(), "media attached");
                Ok(attached)
            }
            Err(err) => {
                unlink_all(self.storage.as_ref(), paths).await;
                Err(err)
            }
        }
    }

    pub async fn list_media(&self, post_id: Uuid) -> Result<Vec<Media>> {
        lookup::live_post(self.posts.as_ref(), post_id).await?;
        let mut media = self.media.list_post_media(post_id).await?;
        media.sort_by_key(|m| (m.order, m.created_at));
        Ok(media)
    }

    pub async fn update_caption(
        &self,
        principal: Principal,
        id: Uuid,
        caption: &str,
    ) -> Result<Media> {
        let caption = validation::bounded_text("caption", caption.trim(), MAX_CAPTION_LEN)?;
        let existing = self.find(id).await?;
        principal.ensure_can_modify(existing.uploaded_by, "media")?;
        self.media.update_caption(id, caption).await
    }

    pub async fn delete_media(&self, principal: Principal, id: Uuid) -> Result<()> {
        let existing = self.find(id).await?;
        principal.ensure_can_modify(existing.uploaded_by, "media")?;

        let removed = self.media.delete_media(id).await?;
        info!(media_id = %id, post_id = %removed.post_id, "media deleted");
        unlink_all(self.storage.as_ref(), vec![removed.filepath.clone()]).await;
        Ok(())
    }

    /// Listed ids get `order = position`. Ids that are not on the post, or
    /// were uploaded by someone else (unless the caller is an admin), are
    /// ignored.
    pub async fn reorder_media(
        &self,
        principal: Principal,
        post_id: Uuid,
        ids: Vec<Uuid>,
    ) -> Result<Vec<Media>> {
        lookup::live_post(self.posts.as_ref(), post_id).await?;
        let current = self.media.list_post_media(post_id).await?;
        let ordering: Vec<(Uuid, i32)> = ids
            .into_iter()
            .zip(0..)
            .filter(|(id, _)| {
                current
                    .iter()
                    .any(|m| m.id == *id && principal.can_modify(m.uploaded_by))
            })
            .collect();

        let updated = self.media.reorder_media(post_id, ordering).await?;
        info!(post_id = %post_id, updated, "media reordered");
        self.list_media(post_id).await
    }

    async fn find(&self, id: Uuid) -> Result<Media> {
        self.media
            .find_media(id)
            .await?
            .ok_or_else(|| DomainError::not_found("media", id))
    }
}

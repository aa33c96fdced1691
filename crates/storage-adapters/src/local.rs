//! # Local Media Storage
//!
//! Filesystem implementation of `MediaStorage`.
//! Uploads get a random id as their filename and are sharded two levels deep
//! by its leading hex characters: `<root>/ab/cd/abcd….png`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use domains::{DomainError, FileUpload, MediaStorage, Result, StoredFile};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

pub struct LocalMediaStorage {
    /// Root directory for all uploads (e.g. "./uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g. "/uploads")
    url_prefix: String,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root_path: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn sharded_relative(name: &str) -> String {
        format!("{}/{}/{}", &name[0..2], &name[2..4], name)
    }

    /// Extension from the declared type, falling back to the client's filename.
    fn extension(upload: &FileUpload) -> Option<String> {
        mime_guess::get_mime_extensions(&upload.content_type)
            .and_then(|exts| exts.first())
            .map(|e| e.to_string())
            .or_else(|| {
                Path::new(&upload.filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
                    .map(str::to_ascii_lowercase)
            })
    }

    /// Maps a public path back onto the filesystem. Anything outside the
    /// prefix or escaping the root is rejected.
    fn resolve(&self, public_path: &str) -> Result<PathBuf> {
        let relative = public_path
            .strip_prefix(&self.url_prefix)
            .map(|p| p.trim_start_matches('/'))
            .ok_or_else(|| DomainError::validation(format!("not a stored upload: {public_path}")))?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(DomainError::validation(format!("invalid upload path: {public_path}")));
        }
        Ok(self.root_path.join(relative))
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn store(&self, upload: FileUpload) -> Result<StoredFile> {
        let id = Uuid::new_v4().simple().to_string();
        let filename = match Self::extension(&upload) {
            Some(ext) => format!("{id}.{ext}"),
            None => id,
        };
        let relative = Self::sharded_relative(&filename);
        let target = self.root_path.join(&relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(DomainError::internal)?;
        }
        fs::write(&target, &upload.bytes)
            .await
            .map_err(DomainError::internal)?;
        debug!(path = %target.display(), size = upload.bytes.len(), "upload written");

        Ok(StoredFile {
            filename,
            path: format!("{}/{}", self.url_prefix, relative),
            size: upload.bytes.len() as i64,
        })
    }

    /// Missing files count as removed.
    async fn remove(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "upload removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::internal(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("agora-uploads-{}", Uuid::new_v4()))
    }

    fn png(bytes: &'static [u8]) -> FileUpload {
        FileUpload {
            filename: "Holiday Photo.PNG".into(),
            content_type: mime::IMAGE_PNG,
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn stores_under_a_sharded_public_path() {
        let root = scratch();
        let storage = LocalMediaStorage::new(&root, "/uploads/");

        let stored = storage.store(png(b"\x89PNG")).await.unwrap();
        assert!(stored.filename.ends_with(".png"));
        assert_eq!(stored.size, 4);
        let expected = format!(
            "/uploads/{}/{}/{}",
            &stored.filename[0..2],
            &stored.filename[2..4],
            stored.filename
        );
        assert_eq!(stored.path, expected);

        let on_disk = storage.resolve(&stored.path).unwrap();
        assert_eq!(fs::read(&on_disk).await.unwrap(), b"\x89PNG");

        storage.remove(&stored.path).await.unwrap();
        assert!(!on_disk.exists());
        // Second removal is a no-op.
        storage.remove(&stored.path).await.unwrap();

        let _ = fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_root() {
        let storage = LocalMediaStorage::new(scratch(), "/uploads");
        assert!(storage.remove("/uploads/../etc/passwd").await.is_err());
        assert!(storage.remove("/elsewhere/file.png").await.is_err());
    }
}

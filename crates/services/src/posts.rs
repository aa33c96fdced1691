use std::collections::HashMap;
use std::sync::Arc;

use domains::realtime::names;
use domains::{
    Category, Media, MediaRepository, MediaStorage, MediaType, Pagination, Post, PostFlags,
    PostQuery, PostRepository, PostUpdate, Principal, Result, Room, UserRepository, UserSummary,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::fanout::Fanout;
use crate::lookup;
use crate::media::{self, UploadedFile};
use crate::validation::{self, MAX_POST_CONTENT_LEN, MAX_TITLE_LEN};

pub const DEFAULT_POST_LIMIT: u64 = 10;

static BLOB_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"src=["']blob:[^"']+["']"#).expect("valid blob pattern"));

/// Replaces each `src="blob:…"` in order with the next stored path. Extra
/// references beyond the number of paths are left as they are.
pub fn replace_blob_sources(content: &str, paths: &[String]) -> String {
    let mut next = paths.iter();
    BLOB_SRC
        .replace_all(content, |caps: &Captures| match next.next() {
            Some(path) => format!("src=\"{path}\""),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// A post as returned to clients: author resolved, media ordered, and the
/// first media item mirrored into `image` / `mediaType` for older clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    post: Post,
    author: Option<UserSummary>,
    media: Vec<Media>,
    image: Option<String>,
    media_type: Option<MediaType>,
}

impl PostView {
    pub fn new(post: Post, author: Option<UserSummary>, mut media: Vec<Media>) -> Self {
        media.sort_by_key(|m| (m.order, m.created_at));
        let image = media.first().map(|m| m.filepath.clone());
        let media_type = media.first().map(|m| m.media_type);
        Self {
            post,
            author,
            media,
            image,
            media_type,
        }
    }

    pub fn post(&self) -> &Post {
        &self.post
    }

    pub fn author(&self) -> Option<&UserSummary> {
        self.author.as_ref()
    }

    pub fn media(&self) -> &[Media] {
        &self.media
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn media_type(&self) -> Option<MediaType> {
        self.media_type
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub posts: Vec<PostView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub files: Vec<UploadedFile>,
}

pub struct PostService {
    posts: Arc<dyn PostRepository>,
    media: Arc<dyn MediaRepository>,
    users: Arc<dyn UserRepository>,
    storage: Arc<dyn MediaStorage>,
    fanout: Fanout,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        media: Arc<dyn MediaRepository>,
        users: Arc<dyn UserRepository>,
        storage: Arc<dyn MediaStorage>,
        fanout: Fanout,
    ) -> Self {
        Self {
            posts,
            media,
            users,
            storage,
            fanout,
        }
    }

    pub async fn create_post(&self, principal: Principal, new: NewPost) -> Result<PostView> {
        let title = validation::required_text("title", &new.title, MAX_TITLE_LEN)?;
        let content = validation::bounded_text("content", &new.content, MAX_POST_CONTENT_LEN)?;
        let tags = validation::tags(new.tags)?;

        let mut post = Post::new(principal.id, title, content, new.category, tags);
        let media =
            media::store_uploads(self.storage.as_ref(), new.files, post.id, principal.id, 0).await?;
        let paths: Vec<String> = media.iter().map(|m| m.filepath.clone()).collect();
        post.content = replace_blob_sources(&post.content, &paths);

        let post = match self.posts.create_post(post, media.clone()).await {
            Ok(post) => post,
            Err(err) => {
                media::unlink_all(self.storage.as_ref(), paths).await;
                return Err(err);
            }
        };
        info!(post_id = %post.id, author_id = %post.author_id, media = media.len(), "post created");

        let view = self.view(post, media).await;
        self.fanout.global(names::POST_NEW, &view);
        Ok(view)
    }

    /// Counts a view for authenticated viewers other than the author.
    pub async fn get_post(&self, id: Uuid, viewer: Option<Principal>) -> Result<PostView> {
        let mut post = lookup::live_post(self.posts.as_ref(), id).await?;

        if let Some(viewer) = viewer.filter(|v| v.id != post.author_id) {
            if let Some(views) = self.posts.record_view(id, viewer.id).await? {
                post.views = views;
                self.fanout.to_room_and_global(
                    Room::Post(id),
                    names::POST_VIEWED,
                    &json!({ "postId": id, "views": views }),
                );
            }
        }

        let media = self.media.list_post_media(id).await?;
        Ok(self.view(post, media).await)
    }

    pub async fn list_posts(&self, query: PostQuery) -> Result<PostPage> {
        let (posts, total) = self.posts.list_posts(&query).await?;
        let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();
        let mut media_by_post: HashMap<Uuid, Vec<Media>> = HashMap::new();
        for m in self.media.list_media_for_posts(&ids).await? {
            media_by_post.entry(m.post_id).or_default().push(m);
        }
        let authors =
            lookup::summaries(self.users.as_ref(), posts.iter().map(|p| p.author_id)).await?;

        let posts = posts
            .into_iter()
            .map(|post| {
                let author = authors.get(&post.author_id).cloned();
                let media = media_by_post.remove(&post.id).unwrap_or_default();
                PostView::new(post, author, media)
            })
            .collect();
        Ok(PostPage {
            posts,
            pagination: Pagination::new(query.page, total),
        })
    }

    pub async fn update_post(
        &self,
        principal: Principal,
        id: Uuid,
        update: PostUpdate,
    ) -> Result<PostView> {
        let update = PostUpdate {
            title: update
                .title
                .map(|t| validation::required_text("title", &t, MAX_TITLE_LEN))
                .transpose()?,
            content: update
                .content
                .map(|c| validation::bounded_text("content", &c, MAX_POST_CONTENT_LEN))
                .transpose()?,
            category: update.category,
            tags: update.tags.map(validation::tags).transpose()?,
        };
        let existing = lookup::live_post(self.posts.as_ref(), id).await?;
        principal.ensure_can_modify(existing.author_id, "post")?;

        let post = self.posts.update_post(id, update).await?;
        info!(post_id = %id, "post updated");
        self.publish_updated(post).await
    }

    pub async fn set_flags(
        &self,
        principal: Principal,
        id: Uuid,
        flags: PostFlags,
    ) -> Result<PostView> {
        principal.ensure_admin()?;
        lookup::live_post(self.posts.as_ref(), id).await?;

        let post = self.posts.set_post_flags(id, flags).await?;
        info!(post_id = %id, pinned = post.is_pinned, locked = post.is_locked, "post flags set");
        self.publish_updated(post).await
    }

    /// Soft-deletes the post with its cascades, then unlinks its files.
    pub async fn delete_post(&self, principal: Principal, id: Uuid) -> Result<()> {
        let existing = lookup::live_post(self.posts.as_ref(), id).await?;
        principal.ensure_can_modify(existing.author_id, "post")?;

        let deletion = self.posts.soft_delete_post(id).await?;
        info!(
            post_id = %id,
            comments = deletion.comments_removed,
            votes = deletion.votes_removed,
            media = deletion.media.len(),
            "post deleted"
        );
        let paths = deletion.media.iter().map(|m| m.filepath.clone()).collect();
        media::unlink_all(self.storage.as_ref(), paths).await;
        self.fanout
            .to_room_and_global(Room::Post(id), names::POST_DELETED, &json!({ "postId": id }));
        Ok(())
    }

    async fn publish_updated(&self, post: Post) -> Result<PostView> {
        let media = self.media.list_post_media(post.id).await?;
        let view = self.view(post, media).await;
        self.fanout
            .to_room_and_global(Room::Post(view.post.id), names::POST_UPDATED, &view);
        Ok(view)
    }

    async fn view(&self, post: Post, media: Vec<Media>) -> PostView {
        let author = lookup::summary_of(self.users.as_ref(), post.author_id).await;
        PostView::new(post, author, media)
    }
}

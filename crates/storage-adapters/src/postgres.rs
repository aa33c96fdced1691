//! # PostgreSQL Entity Store
//!
//! Maps the relational schema in `migrations/` onto the domain models.
//!
//! Every counter change is a relative update executed inside the same
//! transaction as the record change it belongs to. Vote uniqueness is held by
//! the partial unique indexes on `votes`, so a duplicate insert surfaces as
//! `Conflict` and the vote engine re-resolves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Category, Comment, CommentDeletion, CommentRepository, Conversation, ConversationRepository,
    DomainError, Media, MediaRepository, MediaType, Message, MessageRepository, Notification,
    NotificationKind, NotificationRepository, Post, PostDeletion, PostFlags, PostQuery,
    PostRepository, PostSort, PostUpdate, ProfileUpdate, Result, User, UserRepository, Vote,
    VoteRepository, VoteTally, VoteTarget, VoteTransition, VoteType,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, password_hash, avatar, bio, reputation, \
     is_active, is_admin, created_at, updated_at";
const POST_COLUMNS: &str = "id, title, content, author_id, category, tags, media_count, \
     upvotes, downvotes, net_votes, views, comment_count, last_activity_at, is_pinned, \
     is_locked, is_deleted, deleted_at, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, post_id, author_id, parent_comment_id, content, depth, \
     reply_count, upvotes, downvotes, net_votes, is_edited, edited_at, is_deleted, deleted_at, \
     created_at, updated_at";
const VOTE_COLUMNS: &str = "id, user_id, post_id, comment_id, vote_type, created_at, updated_at";
const MEDIA_COLUMNS: &str = "id, post_id, filename, filepath, mimetype, media_type, size, \
     caption, sort_order, uploaded_by, created_at";
const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, is_read, created_at";
const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, kind, post_id, comment_id, message, is_read, created_at";

/// Translates driver errors at the port boundary.
fn db(err: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(ref e) = err {
        let constraint = e.constraint().unwrap_or("unknown").to_string();
        match e.code().as_deref() {
            Some("23505") => {
                return DomainError::conflict(format!("duplicate value for {constraint}"));
            }
            Some("23503") => return DomainError::not_found("referenced record", constraint),
            _ => {}
        }
    }
    DomainError::internal(err)
}

fn decode(err: DomainError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

/// Escapes LIKE metacharacters and wraps the needle in `%…%`.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn user_from(row: &PgRow) -> sqlx::Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        avatar: row.try_get("avatar")?,
        bio: row.try_get("bio")?,
        reputation: row.try_get("reputation")?,
        is_active: row.try_get("is_active")?,
        is_admin: row.try_get("is_admin")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn post_from(row: &PgRow) -> sqlx::Result<Post> {
    let category: String = row.try_get("category")?;
    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        author_id: row.try_get("author_id")?,
        category: category.parse::<Category>().map_err(decode)?,
        tags: row.try_get("tags")?,
        media_count: row.try_get("media_count")?,
        upvotes: row.try_get("upvotes")?,
        downvotes: row.try_get("downvotes")?,
        net_votes: row.try_get("net_votes")?,
        views: row.try_get("views")?,
        comment_count: row.try_get("comment_count")?,
        last_activity_at: row.try_get("last_activity_at")?,
        is_pinned: row.try_get("is_pinned")?,
        is_locked: row.try_get("is_locked")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn comment_from(row: &PgRow) -> sqlx::Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        author_id: row.try_get("author_id")?,
        parent_comment_id: row.try_get("parent_comment_id")?,
        content: row.try_get("content")?,
        depth: row.try_get("depth")?,
        reply_count: row.try_get("reply_count")?,
        upvotes: row.try_get("upvotes")?,
        downvotes: row.try_get("downvotes")?,
        net_votes: row.try_get("net_votes")?,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vote_from(row: &PgRow) -> sqlx::Result<Vote> {
    let vote_type: String = row.try_get("vote_type")?;
    Ok(Vote {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        target: VoteTarget::from_ids(row.try_get("post_id")?, row.try_get("comment_id")?)
            .map_err(decode)?,
        vote_type: vote_type.parse::<VoteType>().map_err(decode)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn media_from(row: &PgRow) -> sqlx::Result<Media> {
    let media_type = match row.try_get::<String, _>("media_type")?.as_str() {
        "video" => MediaType::Video,
        "image" => MediaType::Image,
        other => return Err(decode(DomainError::internal(format!("unknown media type {other}")))),
    };
    Ok(Media {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        filename: row.try_get("filename")?,
        filepath: row.try_get("filepath")?,
        mimetype: row.try_get("mimetype")?,
        media_type,
        size: row.try_get("size")?,
        caption: row.try_get("caption")?,
        order: row.try_get("sort_order")?,
        uploaded_by: row.try_get("uploaded_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn conversation_from(row: &PgRow) -> sqlx::Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        participants: [row.try_get("participant_a")?, row.try_get("participant_b")?],
        last_message_id: row.try_get("last_message_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from(row: &PgRow) -> sqlx::Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from(row: &PgRow) -> sqlx::Result<Notification> {
    let kind: String = row.try_get("kind")?;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        sender_id: row.try_get("sender_id")?,
        kind: kind.parse::<NotificationKind>().map_err(decode)?,
        post_id: row.try_get("post_id")?,
        comment_id: row.try_get("comment_id")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn all<T>(rows: Vec<PgRow>, map: fn(&PgRow) -> sqlx::Result<T>) -> Result<Vec<T>> {
    rows.iter().map(|r| map(r).map_err(db)).collect()
}

fn one<T>(row: Option<PgRow>, map: fn(&PgRow) -> sqlx::Result<T>) -> Result<Option<T>> {
    row.as_ref().map(|r| map(r).map_err(db)).transpose()
}

/// `(table, column)` for a vote target.
fn target_columns(target: VoteTarget) -> (&'static str, &'static str, Uuid) {
    match target {
        VoteTarget::Post(id) => ("posts", "post_id", id),
        VoteTarget::Comment(id) => ("comments", "comment_id", id),
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db)?;
        Ok(Self { pool })
    }

    /// Applies pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(DomainError::internal)?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Grants or revokes admin rights. Used by the seeding tool.
    pub async fn set_admin(&self, user_id: Uuid, is_admin: bool) -> Result<()> {
        let done = sqlx::query("UPDATE users SET is_admin = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(is_admin)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found("user", user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let sql = format!(
            "INSERT INTO users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.avatar)
            .bind(&user.bio)
            .bind(user.reputation)
            .bind(user.is_active)
            .bind(user.is_admin)
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        user_from(&row).map_err(db)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, user_from)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&sql).bind(email).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, user_from)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&sql).bind(username).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, user_from)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, user_from)
    }

    async fn search_users(&self, needle: &str, limit: u64) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active AND username ILIKE $1 \
             ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(needle))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        all(rows, user_from)
    }

    async fn list_active_users(&self) -> Result<Vec<User>> {
        let sql =
            format!("SELECT {USER_COLUMNS} FROM users WHERE is_active ORDER BY created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, user_from)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        let sql = format!(
            "UPDATE users SET bio = COALESCE($2, bio), avatar = COALESCE($3, avatar), \
             updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.bio)
            .bind(update.avatar)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, user_from)?.ok_or_else(|| DomainError::not_found("user", id))
    }

    async fn deactivate_user(&self, id: Uuid) -> Result<()> {
        let sql = "UPDATE users SET is_active = FALSE, updated_at = now() WHERE id = $1";
        let done = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found("user", id));
        }
        Ok(())
    }
}

fn push_post_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &PostQuery) {
    if let Some(category) = query.category {
        qb.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search.trim());
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR content ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR EXISTS (SELECT 1 FROM unnest(tags) AS tag WHERE tag ILIKE ")
            .push_bind(pattern)
            .push("))");
    }
}

fn post_order(sort: PostSort) -> &'static str {
    match sort {
        PostSort::Newest => " ORDER BY is_pinned DESC, created_at DESC",
        PostSort::Oldest => " ORDER BY created_at ASC",
        PostSort::Popular => " ORDER BY is_pinned DESC, net_votes DESC, created_at DESC",
        PostSort::MostViewed => " ORDER BY is_pinned DESC, views DESC, created_at DESC",
        PostSort::Hot => " ORDER BY is_pinned DESC, last_activity_at DESC",
    }
}

async fn insert_media(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    media: &Media,
) -> std::result::Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO media ({MEDIA_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    );
    sqlx::query(&sql)
        .bind(media.id)
        .bind(media.post_id)
        .bind(&media.filename)
        .bind(&media.filepath)
        .bind(&media.mimetype)
        .bind(media.media_type.as_str())
        .bind(media.size)
        .bind(&media.caption)
        .bind(media.order)
        .bind(media.uploaded_by)
        .bind(media.created_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl PostRepository for PgStore {
    async fn create_post(&self, post: Post, media: Vec<Media>) -> Result<Post> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let sql = format!(
            "INSERT INTO posts (id, title, content, author_id, category, tags, media_count, \
             last_activity_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(post.id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.author_id)
            .bind(post.category.as_str())
            .bind(&post.tags)
            .bind(media.len() as i64)
            .bind(post.last_activity_at)
            .bind(post.created_at)
            .bind(post.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        for m in &media {
            insert_media(&mut tx, m).await.map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        post_from(&row).map_err(db)
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, post_from)
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<(Vec<Post>, u64)> {
        let mut count =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM posts WHERE NOT is_deleted");
        push_post_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE NOT is_deleted"
        ));
        push_post_filters(&mut select, query);
        select
            .push(post_order(query.sort))
            .push(" LIMIT ")
            .push_bind(query.page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(query.page.offset() as i64);
        let rows = select.build().fetch_all(&self.pool).await.map_err(db)?;

        Ok((all(rows, post_from)?, total as u64))
    }

    async fn update_post(&self, id: Uuid, update: PostUpdate) -> Result<Post> {
        let sql = format!(
            "UPDATE posts SET title = COALESCE($2, title), content = COALESCE($3, content), \
             category = COALESCE($4, category), tags = COALESCE($5, tags), updated_at = now() \
             WHERE id = $1 AND NOT is_deleted RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.title)
            .bind(update.content)
            .bind(update.category.map(|c| c.as_str()))
            .bind(update.tags)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, post_from)?.ok_or_else(|| DomainError::not_found("post", id))
    }

    async fn set_post_flags(&self, id: Uuid, flags: PostFlags) -> Result<Post> {
        let sql = format!(
            "UPDATE posts SET is_pinned = COALESCE($2, is_pinned), \
             is_locked = COALESCE($3, is_locked), updated_at = now() \
             WHERE id = $1 AND NOT is_deleted RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(flags.is_pinned)
            .bind(flags.is_locked)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, post_from)?.ok_or_else(|| DomainError::not_found("post", id))
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<PostDeletion> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let now = Utc::now();

        let flagged = sqlx::query(
            "UPDATE posts SET is_deleted = TRUE, deleted_at = $2, comment_count = 0, \
             media_count = 0, updated_at = $2 WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if flagged.rows_affected() == 0 {
            return Err(DomainError::not_found("post", id));
        }

        let comments = sqlx::query(
            "UPDATE comments SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 \
             WHERE post_id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let votes = sqlx::query(
            "DELETE FROM votes WHERE post_id = $1 \
             OR comment_id IN (SELECT id FROM comments WHERE post_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let sql = format!("DELETE FROM media WHERE post_id = $1 RETURNING {MEDIA_COLUMNS}");
        let media_rows = sqlx::query(&sql).bind(id).fetch_all(&mut *tx).await.map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(PostDeletion {
            post_id: id,
            media: all(media_rows, media_from)?,
            comments_removed: comments.rows_affected(),
            votes_removed: votes.rows_affected(),
        })
    }

    async fn record_view(&self, post_id: Uuid, viewer_id: Uuid) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let live = sqlx::query("SELECT 1 FROM posts WHERE id = $1 AND NOT is_deleted FOR UPDATE")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        if live.is_none() {
            return Err(DomainError::not_found("post", post_id));
        }

        let inserted = sqlx::query(
            "INSERT INTO post_views (post_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(viewer_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if inserted.rows_affected() == 0 {
            tx.commit().await.map_err(db)?;
            return Ok(None);
        }

        let bump = "UPDATE posts SET views = views + 1 WHERE id = $1 RETURNING views";
        let views: i64 = sqlx::query_scalar(bump)
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(Some(views))
    }
}

#[async_trait]
impl CommentRepository for PgStore {
    async fn create_comment(&self, comment: Comment) -> Result<Comment> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let bumped = sqlx::query(
            "UPDATE posts SET comment_count = comment_count + 1, last_activity_at = $2 \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(comment.post_id)
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if bumped.rows_affected() == 0 {
            return Err(DomainError::not_found("post", comment.post_id));
        }

        if let Some(parent) = comment.parent_comment_id {
            let replied = sqlx::query(
                "UPDATE comments SET reply_count = reply_count + 1 \
                 WHERE id = $1 AND post_id = $2 AND NOT is_deleted",
            )
            .bind(parent)
            .bind(comment.post_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            if replied.rows_affected() == 0 {
                return Err(DomainError::not_found("comment", parent));
            }
        }

        let sql = format!(
            "INSERT INTO comments (id, post_id, author_id, parent_comment_id, content, depth, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COMMENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(comment.id)
            .bind(comment.post_id)
            .bind(comment.author_id)
            .bind(comment.parent_comment_id)
            .bind(&comment.content)
            .bind(comment.depth)
            .bind(comment.created_at)
            .bind(comment.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        comment_from(&row).map_err(db)
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, comment_from)
    }

    async fn list_post_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 AND NOT is_deleted \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(post_id).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, comment_from)
    }

    async fn update_comment_content(
        &self,
        id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    ) -> Result<Comment> {
        let sql = format!(
            "UPDATE comments SET content = $2, is_edited = TRUE, edited_at = $3, updated_at = $3 \
             WHERE id = $1 AND NOT is_deleted RETURNING {COMMENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(content)
            .bind(edited_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, comment_from)?.ok_or_else(|| DomainError::not_found("comment", id))
    }

    async fn soft_delete_comment(&self, id: Uuid) -> Result<CommentDeletion> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let root = sqlx::query(
            "SELECT post_id, parent_comment_id FROM comments \
             WHERE id = $1 AND NOT is_deleted FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?
        .ok_or_else(|| DomainError::not_found("comment", id))?;
        let post_id: Uuid = root.try_get("post_id").map_err(db)?;
        let parent_comment_id: Option<Uuid> = root.try_get("parent_comment_id").map_err(db)?;

        let removed_ids: Vec<Uuid> = sqlx::query_scalar(
            "WITH RECURSIVE subtree AS ( \
                 SELECT id FROM comments WHERE id = $1 \
                 UNION ALL \
                 SELECT c.id FROM comments c JOIN subtree s ON c.parent_comment_id = s.id \
                 WHERE NOT c.is_deleted \
             ) \
             UPDATE comments SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 \
             WHERE id IN (SELECT id FROM subtree) AND NOT is_deleted RETURNING id",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query(
            "UPDATE posts SET comment_count = GREATEST(comment_count - $2, 0) WHERE id = $1",
        )
        .bind(post_id)
        .bind(removed_ids.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if let Some(parent) = parent_comment_id {
            sqlx::query(
                "UPDATE comments SET reply_count = GREATEST(reply_count - 1, 0) WHERE id = $1",
            )
            .bind(parent)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(CommentDeletion {
            comment_id: id,
            post_id,
            parent_comment_id,
            removed_ids,
        })
    }
}

#[async_trait]
impl VoteRepository for PgStore {
    async fn find_vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<Vote>> {
        let (_, column, target_id) = target_columns(target);
        let sql = format!("SELECT {VOTE_COLUMNS} FROM votes WHERE user_id = $1 AND {column} = $2");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, vote_from)
    }

    async fn find_vote_by_id(&self, id: Uuid) -> Result<Option<Vote>> {
        let sql = format!("SELECT {VOTE_COLUMNS} FROM votes WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, vote_from)
    }

    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: VoteTarget,
        transition: VoteTransition,
    ) -> Result<VoteTally> {
        let (table, column, target_id) = target_columns(target);
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Serialises submissions on the same target.
        let lock = format!("SELECT 1 FROM {table} WHERE id = $1 AND NOT is_deleted FOR UPDATE");
        if sqlx::query(&lock)
            .bind(target_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .is_none()
        {
            let entity = if table == "posts" { "post" } else { "comment" };
            return Err(DomainError::not_found(entity, target_id));
        }

        let now = Utc::now();
        let changed = match transition {
            VoteTransition::Create(vote_type) => {
                let sql = format!(
                    "INSERT INTO votes (id, user_id, {column}, vote_type, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $5)"
                );
                sqlx::query(&sql)
                    .bind(Uuid::new_v4())
                    .bind(user_id)
                    .bind(target_id)
                    .bind(vote_type.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await
            }
            VoteTransition::Remove(vote_type) => {
                let sql = format!(
                    "DELETE FROM votes WHERE user_id = $1 AND {column} = $2 AND vote_type = $3"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(target_id)
                    .bind(vote_type.as_str())
                    .execute(&mut *tx)
                    .await
            }
            VoteTransition::Flip { from, to } => {
                let sql = format!(
                    "UPDATE votes SET vote_type = $4, updated_at = $5 \
                     WHERE user_id = $1 AND {column} = $2 AND vote_type = $3"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(target_id)
                    .bind(from.as_str())
                    .bind(to.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await
            }
        }
        .map_err(db)?;
        if changed.rows_affected() == 0 {
            return Err(DomainError::conflict("vote changed concurrently"));
        }

        let delta = transition.delta();
        let sql = format!(
            "UPDATE {table} \
             SET upvotes = upvotes + $2, downvotes = downvotes + $3, updated_at = $4 \
             WHERE id = $1 RETURNING upvotes, downvotes"
        );
        let row = sqlx::query(&sql)
            .bind(target_id)
            .bind(delta.upvotes)
            .bind(delta.downvotes)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        let tally = VoteTally {
            upvotes: row.try_get("upvotes").map_err(db)?,
            downvotes: row.try_get("downvotes").map_err(db)?,
        };

        tx.commit().await.map_err(db)?;
        Ok(tally)
    }
}

#[async_trait]
impl MediaRepository for PgStore {
    async fn list_post_media(&self, post_id: Uuid) -> Result<Vec<Media>> {
        let sql = format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE post_id = $1 ORDER BY sort_order, created_at"
        );
        let rows = sqlx::query(&sql).bind(post_id).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, media_from)
    }

    async fn list_media_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Media>> {
        let sql = format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE post_id = ANY($1) \
             ORDER BY sort_order, created_at"
        );
        let rows = sqlx::query(&sql).bind(post_ids).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, media_from)
    }

    async fn find_media(&self, id: Uuid) -> Result<Option<Media>> {
        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, media_from)
    }

    async fn attach_media(&self, post_id: Uuid, media: Vec<Media>) -> Result<Vec<Media>> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let bumped = sqlx::query(
            "UPDATE posts SET media_count = media_count + $2 WHERE id = $1 AND NOT is_deleted",
        )
        .bind(post_id)
        .bind(media.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if bumped.rows_affected() == 0 {
            return Err(DomainError::not_found("post", post_id));
        }
        for m in &media {
            insert_media(&mut tx, m).await.map_err(db)?;
        }
        tx.commit().await.map_err(db)?;
        Ok(media)
    }

    async fn update_caption(&self, id: Uuid, caption: String) -> Result<Media> {
        let sql = format!("UPDATE media SET caption = $2 WHERE id = $1 RETURNING {MEDIA_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(caption)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, media_from)?.ok_or_else(|| DomainError::not_found("media", id))
    }

    async fn delete_media(&self, id: Uuid) -> Result<Media> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let sql = format!("DELETE FROM media WHERE id = $1 RETURNING {MEDIA_COLUMNS}");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await.map_err(db)?;
        let media = one(row, media_from)?.ok_or_else(|| DomainError::not_found("media", id))?;

        sqlx::query("UPDATE posts SET media_count = GREATEST(media_count - 1, 0) WHERE id = $1")
            .bind(media.post_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(media)
    }

    async fn reorder_media(&self, post_id: Uuid, ordering: Vec<(Uuid, i32)>) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut updated = 0;
        for (id, order) in ordering {
            let sql = "UPDATE media SET sort_order = $3 WHERE id = $1 AND post_id = $2";
            updated += sqlx::query(sql)
                .bind(id)
                .bind(post_id)
                .bind(order)
                .execute(&mut *tx)
                .await
                .map_err(db)?
                .rows_affected();
        }
        tx.commit().await.map_err(db)?;
        Ok(updated)
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn find_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let [first, second] = Conversation::pair_key(a, b);
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_a = $1 AND participant_b = $2"
        );
        let row = sqlx::query(&sql)
            .bind(first)
            .bind(second)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, conversation_from)
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let sql = format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(conversation.id)
            .bind(conversation.participants[0])
            .bind(conversation.participants[1])
            .bind(conversation.last_message_id)
            .bind(conversation.created_at)
            .bind(conversation.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        conversation_from(&row).map_err(db)
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db)?;
        one(row, conversation_from)
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_a = $1 OR participant_b = $1 ORDER BY updated_at DESC"
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, conversation_from)
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn create_message(&self, message: Message) -> Result<Message> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let sql = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(message.id)
            .bind(message.conversation_id)
            .bind(message.sender_id)
            .bind(&message.content)
            .bind(message.is_read)
            .bind(message.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;

        sqlx::query("UPDATE conversations SET last_message_id = $2, updated_at = $3 WHERE id = $1")
            .bind(message.conversation_id)
            .bind(message.id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        message_from(&row).map_err(db)
    }

    async fn find_messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)");
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await.map_err(db)?;
        all(rows, message_from)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        all(rows, message_from)
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        let done = sqlx::query(
            "UPDATE messages SET is_read = TRUE \
             WHERE conversation_id = $1 AND sender_id <> $2 AND NOT is_read",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(done.rows_affected())
    }

    async fn count_unread_messages(&self, user_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m JOIN conversations c ON c.id = m.conversation_id \
             WHERE (c.participant_a = $1 OR c.participant_b = $1) \
             AND m.sender_id <> $1 AND NOT m.is_read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn create_notification(&self, n: Notification) -> Result<Notification> {
        let sql = format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(n.id)
            .bind(n.recipient_id)
            .bind(n.sender_id)
            .bind(n.kind.as_str())
            .bind(n.post_id)
            .bind(n.comment_id)
            .bind(&n.message)
            .bind(n.is_read)
            .bind(n.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        notification_from(&row).map_err(db)
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(recipient_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        all(rows, notification_from)
    }

    async fn count_notifications(&self, recipient_id: Uuid) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE recipient_id = $1")
                .bind(recipient_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db)?;
        Ok(count as u64)
    }

    async fn count_unread_notifications(&self, recipient_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(count as u64)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<Notification>> {
        let sql = format!(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient_id = $2 \
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(recipient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        one(row, notification_from)
    }

    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> Result<u64> {
        let done = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(done.rows_affected())
    }

    async fn delete_notification(&self, id: Uuid, recipient_id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
            .bind(id)
            .bind(recipient_id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(done.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_metacharacters() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let store = PgStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn user(store: &PgStore) -> User {
        let tag = Uuid::new_v4().simple().to_string();
        store
            .create_user(User::new(
                format!("u{}", &tag[..12]),
                format!("{tag}@test.io"),
                "x".into(),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn vote_toggle_sequence_against_postgres() {
        let store = store().await;
        let author = user(&store).await;
        let voter = user(&store).await;
        let post = store
            .create_post(
                Post::new(author.id, "t".into(), "c".into(), Category::General, vec![]),
                vec![],
            )
            .await
            .unwrap();
        let target = VoteTarget::Post(post.id);

        let up = VoteTransition::Create(VoteType::Upvote);
        assert_eq!(store.apply_vote(voter.id, target, up).await.unwrap().upvotes, 1);
        assert!(store.apply_vote(voter.id, target, up).await.unwrap_err().is_conflict());

        let off = VoteTransition::Remove(VoteType::Upvote);
        assert_eq!(store.apply_vote(voter.id, target, off).await.unwrap(), VoteTally::default());
        assert!(store.find_vote(voter.id, target).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn comment_cascade_against_postgres() {
        let store = store().await;
        let author = user(&store).await;
        let post = store
            .create_post(
                Post::new(author.id, "t".into(), "c".into(), Category::General, vec![]),
                vec![],
            )
            .await
            .unwrap();
        let root = store
            .create_comment(Comment::new(post.id, author.id, "root".into(), None))
            .await
            .unwrap();
        for reply in ["a", "b"] {
            store
                .create_comment(Comment::new(post.id, author.id, reply.into(), Some(&root)))
                .await
                .unwrap();
        }

        let deletion = store.soft_delete_comment(root.id).await.unwrap();
        assert_eq!(deletion.removed(), 3);
        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert_eq!(post.comment_count, 0);
    }
}

//! # Core Traits (Ports)
//!
//! Every collaborator the services talk to is reached through one of these
//! traits. Storage adapters implement the repositories; the transport layer
//! implements [`EventPublisher`].
//!
//! Repository methods that touch counters are atomic with respect to the
//! counter they change: implementations apply deltas in the store
//! (`SET x = x + $1`) or under a single lock, never a read-modify-write of a
//! cached copy. Methods documented as transactional either apply every write
//! or none.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Comment, CommentDeletion, Conversation, FileUpload, Media, Message, Notification, Post,
    PostDeletion, PostFlags, PostQuery, PostUpdate, ProfileUpdate, StoredFile, User, Vote,
    VoteTally, VoteTarget, VoteTransition,
};
use crate::realtime::{RealtimeEvent, Room};

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email or username is taken.
    async fn create_user(&self, user: User) -> Result<User>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>>;
    /// Case-insensitive username substring match over active users, newest first.
    async fn search_users(&self, needle: &str, limit: u64) -> Result<Vec<User>>;
    async fn list_active_users(&self) -> Result<Vec<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User>;
    async fn deactivate_user(&self, id: Uuid) -> Result<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Transactional: inserts the post and its media, `media_count` set to `media.len()`.
    async fn create_post(&self, post: Post, media: Vec<Media>) -> Result<Post>;
    /// Returns soft-deleted posts too; callers decide how to treat them.
    async fn find_post(&self, id: Uuid) -> Result<Option<Post>>;
    /// One page of live posts plus the total number matching the filters.
    async fn list_posts(&self, query: &PostQuery) -> Result<(Vec<Post>, u64)>;
    async fn update_post(&self, id: Uuid, update: PostUpdate) -> Result<Post>;
    async fn set_post_flags(&self, id: Uuid, flags: PostFlags) -> Result<Post>;
    /// Transactional cascade: flags the post, soft-deletes its comments and
    /// resets `comment_count`, removes its votes and media rows.
    async fn soft_delete_post(&self, id: Uuid) -> Result<PostDeletion>;
    /// Counts a view once per viewer. Returns the new total when this call
    /// counted it, `None` when the viewer was already recorded.
    async fn record_view(&self, post_id: Uuid, viewer_id: Uuid) -> Result<Option<i64>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Transactional: inserts the comment, bumps the post's `comment_count`
    /// and `last_activity_at`, and the parent's `reply_count` if any.
    async fn create_comment(&self, comment: Comment) -> Result<Comment>;
    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>>;
    /// Every live comment of the post, oldest first.
    async fn list_post_comments(&self, post_id: Uuid) -> Result<Vec<Comment>>;
    async fn update_comment_content(
        &self,
        id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    ) -> Result<Comment>;
    /// Transactional cascade: flags the comment and all live descendants,
    /// subtracts `1 + descendants` from the post's `comment_count` and one
    /// from the parent's `reply_count`.
    async fn soft_delete_comment(&self, id: Uuid) -> Result<CommentDeletion>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VoteRepository: Send + Sync {
    async fn find_vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<Vote>>;
    async fn find_vote_by_id(&self, id: Uuid) -> Result<Option<Vote>>;
    /// Transactional: applies the vote record change and the matching counter
    /// delta on the target, returning the post-mutation tally.
    ///
    /// Fails with `Conflict` when the stored vote no longer matches what the
    /// transition was resolved against (a concurrent submission won), and with
    /// `NotFound` when the target vanished.
    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: VoteTarget,
        transition: VoteTransition,
    ) -> Result<VoteTally>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn list_post_media(&self, post_id: Uuid) -> Result<Vec<Media>>;
    async fn list_media_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Media>>;
    async fn find_media(&self, id: Uuid) -> Result<Option<Media>>;
    /// Transactional: inserts rows and adds `media.len()` to `media_count`.
    async fn attach_media(&self, post_id: Uuid, media: Vec<Media>) -> Result<Vec<Media>>;
    async fn update_caption(&self, id: Uuid, caption: String) -> Result<Media>;
    /// Transactional: removes the row and decrements `media_count`.
    async fn delete_media(&self, id: Uuid) -> Result<Media>;
    /// Sets `order` for each `(media id, order)` pair belonging to the post.
    async fn reorder_media(&self, post_id: Uuid, ordering: Vec<(Uuid, i32)>) -> Result<u64>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>>;
    /// Fails with `Conflict` when the pair already has a conversation.
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation>;
    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    /// Most recently active first.
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Transactional: inserts the message and points the conversation's
    /// `last_message_id` at it.
    async fn create_message(&self, message: Message) -> Result<Message>;
    async fn find_messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>>;
    /// Newest first.
    async fn list_messages(&self, conversation_id: Uuid, limit: u64, offset: u64)
        -> Result<Vec<Message>>;
    /// Marks every unread message not sent by `reader_id` as read.
    async fn mark_conversation_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64>;
    async fn count_unread_messages(&self, user_id: Uuid) -> Result<u64>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, notification: Notification) -> Result<Notification>;
    /// Newest first.
    async fn list_notifications(&self, recipient_id: Uuid, limit: u64, offset: u64)
        -> Result<Vec<Notification>>;
    async fn count_notifications(&self, recipient_id: Uuid) -> Result<u64>;
    async fn count_unread_notifications(&self, recipient_id: Uuid) -> Result<u64>;
    /// Scoped to the recipient: another user's id yields `None`.
    async fn mark_notification_read(&self, id: Uuid, recipient_id: Uuid)
        -> Result<Option<Notification>>;
    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> Result<u64>;
    async fn delete_notification(&self, id: Uuid, recipient_id: Uuid) -> Result<bool>;
}

/// Blob storage for uploads. Core code only ever keeps the returned path.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn store(&self, upload: FileUpload) -> Result<StoredFile>;
    async fn remove(&self, path: &str) -> Result<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String>;
    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TokenService: Send + Sync {
    fn issue(&self, user_id: Uuid) -> Result<String>;
    /// Returns the user id the token was issued for.
    fn verify(&self, token: &str) -> Result<Uuid>;
}

/// Outbound side of the realtime transport.
///
/// Publishing to a room with no subscribers is a successful no-op.
/// Implementations return the number of subscribers reached.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, room: &Room, event: &RealtimeEvent) -> Result<usize>;
    fn publish_global(&self, event: &RealtimeEvent) -> Result<usize>;
}

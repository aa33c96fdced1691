//! # In-Memory Store
//!
//! Implements every repository port over plain collections behind one
//! `tokio::sync::RwLock`. Each multi-record operation runs under a single
//! write guard, which gives it the same all-or-nothing behaviour the
//! PostgreSQL adapter gets from a transaction.
//!
//! Used by the development backend and by the integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Comment, CommentDeletion, CommentRepository, Conversation, ConversationRepository,
    DomainError, Media, MediaRepository, Message, MessageRepository, Notification,
    NotificationRepository, Post, PostDeletion, PostFlags, PostQuery, PostRepository, PostSort,
    PostUpdate, ProfileUpdate, Result, User, UserRepository, Vote, VoteRepository, VoteTally,
    VoteTarget, VoteTransition,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    posts: HashMap<Uuid, Post>,
    post_views: HashSet<(Uuid, Uuid)>,
    comments: HashMap<Uuid, Comment>,
    votes: HashMap<(Uuid, VoteTarget), Vote>,
    media: HashMap<Uuid, Media>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    notifications: HashMap<Uuid, Notification>,
}

impl State {
    fn live_post_mut(&mut self, id: Uuid) -> Result<&mut Post> {
        self.posts
            .get_mut(&id)
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| DomainError::not_found("post", id))
    }

    fn live_comment_mut(&mut self, id: Uuid) -> Result<&mut Comment> {
        self.comments
            .get_mut(&id)
            .filter(|c| !c.is_deleted)
            .ok_or_else(|| DomainError::not_found("comment", id))
    }
}

/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn window<T>(items: Vec<T>, limit: u64, offset: u64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(DomainError::conflict("user already exists"));
        }
        if state.users.values().any(|u| u.username == user.username) {
            return Err(DomainError::conflict("username already taken"));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn search_users(&self, needle: &str, limit: u64) -> Result<Vec<User>> {
        let needle = needle.to_lowercase();
        let state = self.state.read().await;
        let mut found: Vec<User> = state
            .users
            .values()
            .filter(|u| u.is_active && u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(window(found, limit, 0))
    }

    async fn list_active_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().filter(|u| u.is_active).cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("user", id))?;
        if let Some(bio) = update.bio {
            user.bio = bio;
        }
        if let Some(avatar) = update.avatar {
            user.avatar = Some(avatar);
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn deactivate_user(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("user", id))?;
        user.is_active = false;
        user.updated_at = Utc::now();
        Ok(())
    }
}

fn matches_search(post: &Post, needle: &str) -> bool {
    post.title.to_lowercase().contains(needle)
        || post.content.to_lowercase().contains(needle)
        || post.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

fn sort_posts(posts: &mut [Post], sort: PostSort) {
    match sort {
        PostSort::Newest => posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.created_at.cmp(&a.created_at))
        }),
        PostSort::Oldest => posts.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        PostSort::Popular => posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.net_votes.cmp(&a.net_votes))
                .then(b.created_at.cmp(&a.created_at))
        }),
        PostSort::MostViewed => posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.views.cmp(&a.views))
                .then(b.created_at.cmp(&a.created_at))
        }),
        PostSort::Hot => posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.last_activity_at.cmp(&a.last_activity_at))
        }),
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn create_post(&self, mut post: Post, media: Vec<Media>) -> Result<Post> {
        let mut state = self.state.write().await;
        post.media_count = media.len() as i64;
        for m in media {
            state.media.insert(m.id, m);
        }
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        Ok(self.state.read().await.posts.get(&id).cloned())
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<(Vec<Post>, u64)> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let state = self.state.read().await;
        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|p| !p.is_deleted)
            .filter(|p| query.category.is_none_or(|c| p.category == c))
            .filter(|p| needle.as_deref().is_none_or(|n| matches_search(p, n)))
            .cloned()
            .collect();
        sort_posts(&mut posts, query.sort);
        let total = posts.len() as u64;
        Ok((window(posts, query.page.limit(), query.page.offset()), total))
    }

    async fn update_post(&self, id: Uuid, update: PostUpdate) -> Result<Post> {
        let mut state = self.state.write().await;
        let post = state.live_post_mut(id)?;
        if let Some(title) = update.title {
            post.title = title;
        }
        if let Some(content) = update.content {
            post.content = content;
        }
        if let Some(category) = update.category {
            post.category = category;
        }
        if let Some(tags) = update.tags {
            post.tags = tags;
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn set_post_flags(&self, id: Uuid, flags: PostFlags) -> Result<Post> {
        let mut state = self.state.write().await;
        let post = state.live_post_mut(id)?;
        if let Some(pinned) = flags.is_pinned {
            post.is_pinned = pinned;
        }
        if let Some(locked) = flags.is_locked {
            post.is_locked = locked;
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<PostDeletion> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        {
            let post = state.live_post_mut(id)?;
            post.is_deleted = true;
            post.deleted_at = Some(now);
            post.comment_count = 0;
            post.media_count = 0;
            post.updated_at = now;
        }

        let mut comment_ids = HashSet::new();
        let mut comments_removed = 0;
        for comment in state.comments.values_mut().filter(|c| c.post_id == id) {
            comment_ids.insert(comment.id);
            if !comment.is_deleted {
                comment.is_deleted = true;
                comment.deleted_at = Some(now);
                comments_removed += 1;
            }
        }

        let before = state.votes.len();
        state.votes.retain(|(_, target), _| match target {
            VoteTarget::Post(p) => *p != id,
            VoteTarget::Comment(c) => !comment_ids.contains(c),
        });
        let votes_removed = (before - state.votes.len()) as u64;

        let media_ids: Vec<Uuid> = state
            .media
            .values()
            .filter(|m| m.post_id == id)
            .map(|m| m.id)
            .collect();
        let media = media_ids
            .into_iter()
            .filter_map(|m| state.media.remove(&m))
            .collect();

        Ok(PostDeletion {
            post_id: id,
            media,
            comments_removed,
            votes_removed,
        })
    }

    async fn record_view(&self, post_id: Uuid, viewer_id: Uuid) -> Result<Option<i64>> {
        let mut state = self.state.write().await;
        state.live_post_mut(post_id)?;
        if !state.post_views.insert((post_id, viewer_id)) {
            return Ok(None);
        }
        let post = state.live_post_mut(post_id)?;
        post.views += 1;
        Ok(Some(post.views))
    }
}

#[async_trait]
impl CommentRepository for MemoryStore {
    async fn create_comment(&self, comment: Comment) -> Result<Comment> {
        let mut state = self.state.write().await;
        state.live_post_mut(comment.post_id)?;
        if let Some(parent_id) = comment.parent_comment_id {
            let parent = state.live_comment_mut(parent_id)?;
            if parent.post_id != comment.post_id {
                return Err(DomainError::not_found("comment", parent_id));
            }
            parent.reply_count += 1;
        }
        let post = state.live_post_mut(comment.post_id)?;
        post.comment_count += 1;
        post.last_activity_at = comment.created_at;
        state.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        Ok(self.state.read().await.comments.get(&id).cloned())
    }

    async fn list_post_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let state = self.state.read().await;
        let mut comments: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id && !c.is_deleted)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn update_comment_content(
        &self,
        id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    ) -> Result<Comment> {
        let mut state = self.state.write().await;
        let comment = state.live_comment_mut(id)?;
        comment.content = content;
        comment.is_edited = true;
        comment.edited_at = Some(edited_at);
        comment.updated_at = edited_at;
        Ok(comment.clone())
    }

    async fn soft_delete_comment(&self, id: Uuid) -> Result<CommentDeletion> {
        let mut state = self.state.write().await;
        let (post_id, parent_comment_id) = {
            let root = state.live_comment_mut(id)?;
            (root.post_id, root.parent_comment_id)
        };

        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for c in state.comments.values().filter(|c| c.post_id == post_id && !c.is_deleted) {
            if let Some(parent) = c.parent_comment_id {
                children.entry(parent).or_default().push(c.id);
            }
        }
        let mut removed_ids = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            removed_ids.push(next);
            if let Some(kids) = children.get(&next) {
                stack.extend(kids);
            }
        }

        let now = Utc::now();
        for removed in &removed_ids {
            if let Some(c) = state.comments.get_mut(removed) {
                c.is_deleted = true;
                c.deleted_at = Some(now);
            }
        }
        if let Some(post) = state.posts.get_mut(&post_id) {
            post.comment_count = (post.comment_count - removed_ids.len() as i64).max(0);
        }
        if let Some(parent) = parent_comment_id.and_then(|p| state.comments.get_mut(&p)) {
            parent.reply_count = (parent.reply_count - 1).max(0);
        }

        Ok(CommentDeletion {
            comment_id: id,
            post_id,
            parent_comment_id,
            removed_ids,
        })
    }
}

#[async_trait]
impl VoteRepository for MemoryStore {
    async fn find_vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<Vote>> {
        Ok(self.state.read().await.votes.get(&(user_id, target)).cloned())
    }

    async fn find_vote_by_id(&self, id: Uuid) -> Result<Option<Vote>> {
        let state = self.state.read().await;
        Ok(state.votes.values().find(|v| v.id == id).cloned())
    }

    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: VoteTarget,
        transition: VoteTransition,
    ) -> Result<VoteTally> {
        let mut state = self.state.write().await;
        match target {
            VoteTarget::Post(id) => {
                state.live_post_mut(id)?;
            }
            VoteTarget::Comment(id) => {
                state.live_comment_mut(id)?;
            }
        }

        let key = (user_id, target);
        let current = state.votes.get(&key).map(|v| v.vote_type);
        let expected = match transition {
            VoteTransition::Create(_) => None,
            VoteTransition::Remove(t) => Some(t),
            VoteTransition::Flip { from, .. } => Some(from),
        };
        if current != expected {
            return Err(DomainError::conflict("vote changed concurrently"));
        }

        let now = Utc::now();
        match transition {
            VoteTransition::Create(vote_type) => {
                state.votes.insert(
                    key,
                    Vote {
                        id: Uuid::new_v4(),
                        user_id,
                        target,
                        vote_type,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
            VoteTransition::Remove(_) => {
                state.votes.remove(&key);
            }
            VoteTransition::Flip { to, .. } => {
                if let Some(vote) = state.votes.get_mut(&key) {
                    vote.vote_type = to;
                    vote.updated_at = now;
                }
            }
        }

        let delta = transition.delta();
        Ok(match target {
            VoteTarget::Post(id) => {
                let post = state.live_post_mut(id)?;
                post.apply_tally_delta(delta);
                post.tally()
            }
            VoteTarget::Comment(id) => {
                let comment = state.live_comment_mut(id)?;
                comment.apply_tally_delta(delta);
                comment.tally()
            }
        })
    }
}

#[async_trait]
impl MediaRepository for MemoryStore {
    async fn list_post_media(&self, post_id: Uuid) -> Result<Vec<Media>> {
        let state = self.state.read().await;
        let mut media: Vec<Media> = state
            .media
            .values()
            .filter(|m| m.post_id == post_id)
            .cloned()
            .collect();
        media.sort_by_key(|m| (m.order, m.created_at));
        Ok(media)
    }

    async fn list_media_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Media>> {
        let state = self.state.read().await;
        let mut media: Vec<Media> = state
            .media
            .values()
            .filter(|m| post_ids.contains(&m.post_id))
            .cloned()
            .collect();
        media.sort_by_key(|m| (m.order, m.created_at));
        Ok(media)
    }

    async fn find_media(&self, id: Uuid) -> Result<Option<Media>> {
        Ok(self.state.read().await.media.get(&id).cloned())
    }

    async fn attach_media(&self, post_id: Uuid, media: Vec<Media>) -> Result<Vec<Media>> {
        let mut state = self.state.write().await;
        let post = state.live_post_mut(post_id)?;
        post.media_count += media.len() as i64;
        for m in &media {
            state.media.insert(m.id, m.clone());
        }
        Ok(media)
    }

    async fn update_caption(&self, id: Uuid, caption: String) -> Result<Media> {
        let mut state = self.state.write().await;
        let media = state
            .media
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("media", id))?;
        media.caption = caption;
        Ok(media.clone())
    }

    async fn delete_media(&self, id: Uuid) -> Result<Media> {
        let mut state = self.state.write().await;
        let media = state
            .media
            .remove(&id)
            .ok_or_else(|| DomainError::not_found("media", id))?;
        if let Some(post) = state.posts.get_mut(&media.post_id) {
            post.media_count = (post.media_count - 1).max(0);
        }
        Ok(media)
    }

    async fn reorder_media(&self, post_id: Uuid, ordering: Vec<(Uuid, i32)>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for (id, order) in ordering {
            if let Some(m) = state.media.get_mut(&id).filter(|m| m.post_id == post_id) {
                m.order = order;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let key = Conversation::pair_key(a, b);
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .find(|c| c.participants == key)
            .cloned())
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let mut state = self.state.write().await;
        if state
            .conversations
            .values()
            .any(|c| c.participants == conversation.participants)
        {
            return Err(DomainError::conflict("conversation already exists"));
        }
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.includes(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create_message(&self, message: Message) -> Result<Message> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| DomainError::not_found("conversation", message.conversation_id))?;
        conversation.last_message_id = Some(message.id);
        conversation.updated_at = message.created_at;
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.messages.get(id).cloned()).collect())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(window(messages, limit, offset))
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut marked = 0;
        for m in state.messages.values_mut().filter(|m| {
            m.conversation_id == conversation_id && m.sender_id != reader_id && !m.is_read
        }) {
            m.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn count_unread_messages(&self, user_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        let mine: HashSet<Uuid> = state
            .conversations
            .values()
            .filter(|c| c.includes(user_id))
            .map(|c| c.id)
            .collect();
        Ok(state
            .messages
            .values()
            .filter(|m| mine.contains(&m.conversation_id) && m.sender_id != user_id && !m.is_read)
            .count() as u64)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create_notification(&self, notification: Notification) -> Result<Notification> {
        let mut state = self.state.write().await;
        state.notifications.insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut found: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(window(found, limit, offset))
    }

    async fn count_notifications(&self, recipient_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .count() as u64)
    }

    async fn count_unread_notifications(&self, recipient_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
            .count() as u64)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<Notification>> {
        let mut state = self.state.write().await;
        Ok(state
            .notifications
            .get_mut(&id)
            .filter(|n| n.recipient_id == recipient_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }

    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut marked = 0;
        for n in state
            .notifications
            .values_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
        {
            n.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn delete_notification(&self, id: Uuid, recipient_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .notifications
            .get(&id)
            .is_some_and(|n| n.recipient_id == recipient_id);
        if owned {
            state.notifications.remove(&id);
        }
        Ok(owned)
    }
}

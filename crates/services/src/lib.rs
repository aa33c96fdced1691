//! # Forum Services
//!
//! Application logic over the ports defined in `domains`. Every service is
//! constructed from trait objects, so the same code runs against PostgreSQL,
//! the in-memory store, or mockall doubles.

use std::sync::Arc;

use domains::{
    CommentRepository, ConversationRepository, EventPublisher, MediaRepository, MediaStorage,
    MessageRepository, NotificationRepository, PasswordHasher, PostRepository, TokenService,
    UserRepository, VoteRepository,
};

pub mod chat;
pub mod comment_tree;
pub mod comments;
pub mod fanout;
pub mod lookup;
pub mod media;
pub mod notifications;
pub mod posts;
pub mod users;
pub mod validation;
pub mod votes;

pub use chat::{ChatService, MessagePage, DEFAULT_MESSAGE_LIMIT};
pub use comment_tree::{
    build_forest, paginate_threads, CommentNode, CommentPage, MAX_REPLY_NESTING,
};
pub use comments::{CommentService, DEFAULT_THREAD_LIMIT};
pub use fanout::Fanout;
pub use media::{MediaService, UploadedFile};
pub use notifications::{
    NotificationDispatcher, NotificationPage, NotificationService, DEFAULT_NOTIFICATION_LIMIT,
};
pub use posts::{NewPost, PostPage, PostService, PostView, DEFAULT_POST_LIMIT};
pub use users::{AuthSession, PublicProfile, UserService};
pub use votes::{VoteOutcome, VoteService};

/// Every adapter the services need, already type-erased.
#[derive(Clone)]
pub struct Ports {
    pub users: Arc<dyn UserRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub votes: Arc<dyn VoteRepository>,
    pub media: Arc<dyn MediaRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub storage: Arc<dyn MediaStorage>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: Arc<dyn TokenService>,
    pub events: Arc<dyn EventPublisher>,
}

/// The wired service graph shared by every request handler.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<UserService>,
    pub posts: Arc<PostService>,
    pub comments: Arc<CommentService>,
    pub votes: Arc<VoteService>,
    pub media: Arc<MediaService>,
    pub chat: Arc<ChatService>,
    pub notifications: Arc<NotificationService>,
}

impl Services {
    pub fn new(ports: Ports) -> Self {
        let fanout = Fanout::new(ports.events.clone());
        let dispatcher = NotificationDispatcher::new(
            ports.notifications.clone(),
            ports.users.clone(),
            ports.posts.clone(),
            fanout.clone(),
        );

        Self {
            users: Arc::new(UserService::new(
                ports.users.clone(),
                ports.hasher,
                ports.tokens,
                ports.storage.clone(),
            )),
            posts: Arc::new(PostService::new(
                ports.posts.clone(),
                ports.media.clone(),
                ports.users.clone(),
                ports.storage.clone(),
                fanout.clone(),
            )),
            comments: Arc::new(CommentService::new(
                ports.comments.clone(),
                ports.posts.clone(),
                ports.users.clone(),
                dispatcher.clone(),
                fanout.clone(),
            )),
            votes: Arc::new(VoteService::new(
                ports.votes,
                ports.posts.clone(),
                ports.comments,
                dispatcher.clone(),
                fanout.clone(),
            )),
            media: Arc::new(MediaService::new(ports.media, ports.posts, ports.storage)),
            chat: Arc::new(ChatService::new(
                ports.conversations,
                ports.messages,
                ports.users,
                dispatcher.clone(),
                fanout,
            )),
            notifications: Arc::new(NotificationService::new(ports.notifications, dispatcher)),
        }
    }
}

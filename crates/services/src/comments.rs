use std::sync::Arc;

use chrono::Utc;
use domains::realtime::names;
use domains::{
    Comment, CommentRepository, DomainError, NewNotification, NotificationKind, PageRequest,
    PostRepository, Principal, Result, Room, UserRepository,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::comment_tree::{self, CommentNode, CommentPage};
use crate::fanout::Fanout;
use crate::lookup;
use crate::notifications::NotificationDispatcher;
use crate::validation::{self, MAX_COMMENT_LEN};

pub const DEFAULT_THREAD_LIMIT: u64 = 20;

pub struct CommentService {
    comments: Arc<dyn CommentRepository>,
    posts: Arc<dyn PostRepository>,
    users: Arc<dyn UserRepository>,
    dispatcher: NotificationDispatcher,
    fanout: Fanout,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentRepository>,
        posts: Arc<dyn PostRepository>,
        users: Arc<dyn UserRepository>,
        dispatcher: NotificationDispatcher,
        fanout: Fanout,
    ) -> Self {
        Self {
            comments,
            posts,
            users,
            dispatcher,
            fanout,
        }
    }

    /// One page of complete threads for a live post.
    pub async fn list_comments(&self, post_id: Uuid, page: PageRequest) -> Result<CommentPage> {
        lookup::live_post(self.posts.as_ref(), post_id).await?;
        let rows = self.comments.list_post_comments(post_id).await?;
        let authors =
            lookup::summaries(self.users.as_ref(), rows.iter().map(|c| c.author_id)).await?;
        let forest = comment_tree::build_forest(rows, &authors);
        Ok(comment_tree::paginate_threads(forest, page))
    }

    pub async fn create_comment(
        &self,
        principal: Principal,
        post_id: Uuid,
        parent_comment_id: Option<Uuid>,
        content: &str,
    ) -> Result<CommentNode> {
        let content = validation::required_text("content", content, MAX_COMMENT_LEN)?;
        let post = lookup::live_post(self.posts.as_ref(), post_id).await?;
        if post.is_locked {
            return Err(DomainError::conflict("post is locked"));
        }
        let parent = match parent_comment_id {
            Some(id) => {
                let parent = lookup::live_comment(self.comments.as_ref(), id).await?;
                if parent.post_id != post.id {
                    return Err(DomainError::validation(
                        "parent comment belongs to a different post",
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        let comment = self
            .comments
            .create_comment(Comment::new(post.id, principal.id, content, parent.as_ref()))
            .await?;
        info!(
            comment_id = %comment.id,
            post_id = %post.id,
            depth = comment.depth,
            "comment created"
        );

        let node = CommentNode {
            author: lookup::summary_of(self.users.as_ref(), comment.author_id).await,
            comment,
            replies: Vec::new(),
        };
        self.fanout.to_room(
            Room::Post(post.id),
            names::COMMENT_NEW,
            &json!({ "postId": post.id, "comment": &node }),
        );

        let request = match &parent {
            Some(parent) => {
                NewNotification::new(parent.author_id, principal.id, NotificationKind::Reply)
                    .with_message("replied to your comment")
            }
            None => NewNotification::new(post.author_id, principal.id, NotificationKind::Comment)
                .with_message("commented on your post"),
        };
        self.dispatcher
            .notify(request.on_post(post.id).on_comment(node.comment.id))
            .await;

        Ok(node)
    }

    pub async fn update_comment(
        &self,
        principal: Principal,
        id: Uuid,
        content: &str,
    ) -> Result<Comment> {
        let content = validation::required_text("content", content, MAX_COMMENT_LEN)?;
        let existing = lookup::live_comment(self.comments.as_ref(), id).await?;
        principal.ensure_can_modify(existing.author_id, "comment")?;

        let comment = self
            .comments
            .update_comment_content(id, content, Utc::now())
            .await?;
        info!(comment_id = %id, "comment updated");
        self.fanout.to_room(
            Room::Post(comment.post_id),
            names::COMMENT_UPDATED,
            &json!({ "postId": comment.post_id, "comment": &comment }),
        );
        Ok(comment)
    }

    /// Soft-deletes the comment and every live descendant.
    pub async fn delete_comment(&self, principal: Principal, id: Uuid) -> Result<u64> {
        let existing = lookup::live_comment(self.comments.as_ref(), id).await?;
        principal.ensure_can_modify(existing.author_id, "comment")?;

        let deletion = self.comments.soft_delete_comment(id).await?;
        let removed = deletion.removed();
        info!(comment_id = %id, post_id = %deletion.post_id, removed, "comment deleted");
        self.fanout.to_room(
            Room::Post(deletion.post_id),
            names::COMMENT_DELETED,
            &json!({
                "postId": deletion.post_id,
                "commentId": deletion.comment_id,
                "parentCommentId": deletion.parent_comment_id,
                "removed": removed,
            }),
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{
        Category, CommentDeletion, MockCommentRepository, MockEventPublisher,
        MockNotificationRepository, MockPostRepository, MockUserRepository, Post,
    };

    fn principal(id: Uuid) -> Principal {
        Principal { id, is_admin: false }
    }

    fn service(
        comments: MockCommentRepository,
        posts: MockPostRepository,
        notifications: MockNotificationRepository,
        publisher: MockEventPublisher,
    ) -> CommentService {
        let posts: Arc<dyn PostRepository> = Arc::new(posts);
        let mut users = MockUserRepository::new();
        users.expect_find_user().returning(|_| Ok(None));
        users.expect_find_users().returning(|_| Ok(vec![]));
        let users: Arc<dyn UserRepository> = Arc::new(users);
        let fanout = Fanout::new(Arc::new(publisher));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(notifications),
            users.clone(),
            posts.clone(),
            fanout.clone(),
        );
        CommentService::new(Arc::new(comments), posts, users, dispatcher, fanout)
    }

    fn post_by(author: Uuid) -> Post {
        Post::new(author, "title".into(), "body".into(), Category::General, vec![])
    }

    #[tokio::test]
    async fn locked_post_rejects_comments() {
        let mut post = post_by(Uuid::new_v4());
        post.is_locked = true;
        let post_id = post.id;
        let mut posts = MockPostRepository::new();
        posts.expect_find_post().returning(move |_| Ok(Some(post.clone())));
        let mut comments = MockCommentRepository::new();
        comments.expect_create_comment().never();

        let svc = service(
            comments,
            posts,
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc
            .create_comment(principal(Uuid::new_v4()), post_id, None, "hello")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn blank_content_is_rejected_before_the_store() {
        let svc = service(
            MockCommentRepository::new(),
            MockPostRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc
            .create_comment(principal(Uuid::new_v4()), Uuid::new_v4(), None, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[tokio::test]
    async fn reply_notifies_parent_author_and_emits_comment_new() {
        let post_author = Uuid::new_v4();
        let parent_author = Uuid::new_v4();
        let replier = Uuid::new_v4();
        let post = post_by(post_author);
        let post_id = post.id;
        let parent = Comment::new(post_id, parent_author, "parent".into(), None);
        let parent_id = parent.id;

        let mut posts = MockPostRepository::new();
        posts.expect_find_post().returning(move |_| Ok(Some(post.clone())));
        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_comment()
            .returning(move |_| Ok(Some(parent.clone())));
        comments.expect_create_comment().times(1).returning(|c| Ok(c));
        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create_notification()
            .withf(move |n| n.recipient_id == parent_author && n.kind == NotificationKind::Reply)
            .times(1)
            .returning(|n| Ok(n));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(move |room, e| *room == Room::Post(post_id) && e.event == names::COMMENT_NEW)
            .times(1)
            .returning(|_, _| Ok(2));
        publisher
            .expect_publish()
            .withf(move |room, _| *room == Room::User(parent_author))
            .times(1)
            .returning(|_, _| Ok(1));

        let svc = service(comments, posts, notifications, publisher);
        let node = svc
            .create_comment(principal(replier), post_id, Some(parent_id), " a reply ")
            .await
            .unwrap();
        assert_eq!(node.comment.depth, 1);
        assert_eq!(node.comment.content, "a reply");
        assert_eq!(node.comment.parent_comment_id, Some(parent_id));
    }

    #[tokio::test]
    async fn strangers_cannot_delete() {
        let comment = Comment::new(Uuid::new_v4(), Uuid::new_v4(), "c".into(), None);
        let id = comment.id;
        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_comment()
            .returning(move |_| Ok(Some(comment.clone())));
        comments.expect_soft_delete_comment().never();

        let svc = service(
            comments,
            MockPostRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc.delete_comment(principal(Uuid::new_v4()), id).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn delete_reports_cascade_size() {
        let author = Uuid::new_v4();
        let comment = Comment::new(Uuid::new_v4(), author, "c".into(), None);
        let (id, post_id) = (comment.id, comment.post_id);
        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_comment()
            .returning(move |_| Ok(Some(comment.clone())));
        comments.expect_soft_delete_comment().returning(move |_| {
            Ok(CommentDeletion {
                comment_id: id,
                post_id,
                parent_comment_id: None,
                removed_ids: vec![id, Uuid::new_v4(), Uuid::new_v4()],
            })
        });
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, e| e.event == names::COMMENT_DELETED && e.data["removed"] == 3)
            .times(1)
            .returning(|_, _| Ok(0));

        let svc = service(
            comments,
            MockPostRepository::new(),
            MockNotificationRepository::new(),
            publisher,
        );
        assert_eq!(svc.delete_comment(principal(author), id).await.unwrap(), 3);
    }
}

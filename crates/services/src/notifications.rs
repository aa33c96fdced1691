//! # Notification Dispatcher
//!
//! Persists a notification, resolves its sender and post, then pushes the
//! populated record to the recipient's personal room. Self-actions never
//! produce a notification.

use std::sync::Arc;

use domains::realtime::names;
use domains::{
    DomainError, NewNotification, Notification, NotificationRepository, PageRequest, Pagination,
    PopulatedNotification, PostRepository, PostSummary, Principal, Result, Room, UserRepository,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fanout::Fanout;
use crate::lookup;

pub const DEFAULT_NOTIFICATION_LIMIT: u64 = 20;

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    fanout: Fanout,
}

impl NotificationDispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        fanout: Fanout,
    ) -> Self {
        Self {
            notifications,
            users,
            posts,
            fanout,
        }
    }

    /// Returns `None` when the request was a self-action and nothing was stored.
    pub async fn dispatch(
        &self,
        request: NewNotification,
    ) -> Result<Option<PopulatedNotification>> {
        if request.is_self_action() {
            return Ok(None);
        }
        let stored = self
            .notifications
            .create_notification(request.into_notification())
            .await?;
        info!(
            notification_id = %stored.id,
            recipient_id = %stored.recipient_id,
            kind = stored.kind.as_str(),
            "notification created"
        );

        let populated = self.populate(stored).await;
        self.fanout.to_room(
            Room::User(populated.notification.recipient_id),
            names::NOTIFICATION_NEW,
            &populated,
        );
        Ok(Some(populated))
    }

    /// Dispatch as a side effect of another mutation: failures are logged only.
    pub async fn notify(&self, request: NewNotification) {
        let kind = request.kind.as_str();
        if let Err(err) = self.dispatch(request).await {
            warn!(kind, error = %err, "notification dispatch failed");
        }
    }

    async fn populate(&self, notification: Notification) -> PopulatedNotification {
        let sender = lookup::summary_of(self.users.as_ref(), notification.sender_id).await;
        let post = match notification.post_id {
            Some(id) => match self.posts.find_post(id).await {
                Ok(post) => post.map(|p| PostSummary {
                    id: p.id,
                    title: p.title,
                }),
                Err(err) => {
                    warn!(post_id = %id, error = %err, "notification post lookup failed");
                    None
                }
            },
            None => None,
        };
        PopulatedNotification {
            notification,
            sender,
            post,
        }
    }

    async fn populate_all(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<PopulatedNotification>> {
        let senders =
            lookup::summaries(self.users.as_ref(), notifications.iter().map(|n| n.sender_id))
                .await?;
        let mut out = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let post = match notification.post_id {
                Some(id) => self.posts.find_post(id).await?.map(|p| PostSummary {
                    id: p.id,
                    title: p.title,
                }),
                None => None,
            };
            out.push(PopulatedNotification {
                sender: senders.get(&notification.sender_id).cloned(),
                notification,
                post,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<PopulatedNotification>,
    pub unread_count: u64,
    pub pagination: Pagination,
}

/// Recipient-facing reads and read-state changes.
pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
    dispatcher: NotificationDispatcher,
}

impl NotificationService {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            notifications,
            dispatcher,
        }
    }

    pub async fn list(&self, principal: Principal, page: PageRequest) -> Result<NotificationPage> {
        let rows = self
            .notifications
            .list_notifications(principal.id, page.limit(), page.offset())
            .await?;
        let total = self.notifications.count_notifications(principal.id).await?;
        let unread_count = self.notifications.count_unread_notifications(principal.id).await?;
        Ok(NotificationPage {
            notifications: self.dispatcher.populate_all(rows).await?,
            unread_count,
            pagination: Pagination::new(page, total),
        })
    }

    pub async fn unread_count(&self, principal: Principal) -> Result<u64> {
        self.notifications.count_unread_notifications(principal.id).await
    }

    pub async fn mark_read(&self, principal: Principal, id: Uuid) -> Result<Notification> {
        self.notifications
            .mark_notification_read(id, principal.id)
            .await?
            .ok_or_else(|| DomainError::not_found("notification", id))
    }

    pub async fn mark_all_read(&self, principal: Principal) -> Result<u64> {
        let updated = self.notifications.mark_all_notifications_read(principal.id).await?;
        info!(recipient_id = %principal.id, updated, "notifications marked read");
        Ok(updated)
    }

    pub async fn delete(&self, principal: Principal, id: Uuid) -> Result<()> {
        if self.notifications.delete_notification(id, principal.id).await? {
            Ok(())
        } else {
            Err(DomainError::not_found("notification", id))
        }
    }
}

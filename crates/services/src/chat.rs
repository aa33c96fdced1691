//! Direct messages between two users.

use std::collections::HashMap;
use std::sync::Arc;

use domains::realtime::names;
use domains::{
    Conversation, ConversationRepository, ConversationView, DomainError, Message,
    MessageRepository, MessageView, NewNotification, NotificationKind, PageRequest, Principal,
    Result, Room, UserRepository,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fanout::Fanout;
use crate::lookup;
use crate::notifications::NotificationDispatcher;
use crate::validation::{self, MAX_MESSAGE_LEN};

pub const DEFAULT_MESSAGE_LIMIT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// Oldest first within the page
    pub messages: Vec<MessageView>,
    pub page: u64,
    pub has_more: bool,
}

pub struct ChatService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    dispatcher: NotificationDispatcher,
    fanout: Fanout,
}

impl ChatService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        dispatcher: NotificationDispatcher,
        fanout: Fanout,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            dispatcher,
            fanout,
        }
    }

    pub async fn list_conversations(&self, principal: Principal) -> Result<Vec<ConversationView>> {
        let conversations = self.conversations.list_conversations(principal.id).await?;
        let last_ids: Vec<Uuid> = conversations.iter().filter_map(|c| c.last_message_id).collect();
        let mut last: HashMap<Uuid, Message> = self
            .messages
            .find_messages_by_ids(&last_ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        let users = lookup::summaries(
            self.users.as_ref(),
            conversations.iter().flat_map(|c| c.participants),
        )
        .await?;

        Ok(conversations
            .into_iter()
            .map(|c| ConversationView {
                id: c.id,
                participants: c.participants.iter().filter_map(|p| users.get(p).cloned()).collect(),
                last_message: c.last_message_id.and_then(|id| last.remove(&id)),
                updated_at: c.updated_at,
            })
            .collect())
    }

    pub async fn get_or_create_conversation(
        &self,
        principal: Principal,
        other_user_id: Uuid,
    ) -> Result<ConversationView> {
        if other_user_id == principal.id {
            return Err(DomainError::validation("cannot start a conversation with yourself"));
        }
        self.users
            .find_user(other_user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| DomainError::not_found("user", other_user_id))?;

        let conversation = match self
            .conversations
            .find_conversation_between(principal.id, other_user_id)
            .await?
        {
            Some(existing) => existing,
            None => match self
                .conversations
                .create_conversation(Conversation::between(principal.id, other_user_id))
                .await
            {
                Ok(created) => {
                    info!(conversation_id = %created.id, "conversation created");
                    created
                }
                // Lost a race against the other participant opening it first.
                Err(err) if err.is_conflict() => self
                    .conversations
                    .find_conversation_between(principal.id, other_user_id)
                    .await?
                    .ok_or(err)?,
                Err(err) => return Err(err),
            },
        };
        self.view(conversation).await
    }

    /// Marks the other participant's messages read as a side effect.
    pub async fn get_messages(
        &self,
        principal: Principal,
        conversation_id: Uuid,
        page: PageRequest,
    ) -> Result<MessagePage> {
        let conversation = self.participant_conversation(principal, conversation_id).await?;

        let mut messages = self
            .messages
            .list_messages(conversation.id, page.limit() + 1, page.offset())
            .await?;
        let has_more = messages.len() as u64 > page.limit();
        messages.truncate(page.limit() as usize);
        messages.reverse();

        let marked = self
            .messages
            .mark_conversation_read(conversation.id, principal.id)
            .await?;
        debug!(conversation_id = %conversation.id, marked, "messages marked read");

        let senders =
            lookup::summaries(self.users.as_ref(), messages.iter().map(|m| m.sender_id)).await?;
        Ok(MessagePage {
            messages: messages
                .into_iter()
                .map(|message| MessageView {
                    sender: senders.get(&message.sender_id).cloned(),
                    message,
                })
                .collect(),
            page: page.page(),
            has_more,
        })
    }

    pub async fn send_message(
        &self,
        principal: Principal,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<MessageView> {
        let content = validation::required_text("content", content, MAX_MESSAGE_LEN)?;
        let conversation = self.participant_conversation(principal, conversation_id).await?;
        let recipient = conversation
            .other_participant(principal.id)
            .ok_or_else(|| DomainError::not_found("conversation", conversation_id))?;

        let message = self
            .messages
            .create_message(Message::new(conversation.id, principal.id, content))
            .await?;
        info!(message_id = %message.id, conversation_id = %conversation.id, "message sent");

        let sender = lookup::summary_of(self.users.as_ref(), principal.id).await;
        let from = sender.as_ref().map_or("someone", |s| s.username.as_str());
        self.dispatcher
            .notify(
                NewNotification::new(recipient, principal.id, NotificationKind::Message)
                    .with_message(format!("New message from {from}")),
            )
            .await;

        let view = MessageView { message, sender };
        self.fanout.to_room(
            Room::User(recipient),
            names::MESSAGE_NEW,
            &json!({ "conversationId": conversation.id, "message": &view }),
        );
        Ok(view)
    }

    pub async fn unread_count(&self, principal: Principal) -> Result<u64> {
        self.messages.count_unread_messages(principal.id).await
    }

    /// Non-participants get `NotFound`, not `Unauthorized`.
    async fn participant_conversation(
        &self,
        principal: Principal,
        id: Uuid,
    ) -> Result<Conversation> {
        self.conversations
            .find_conversation(id)
            .await?
            .filter(|c| c.includes(principal.id))
            .ok_or_else(|| DomainError::not_found("conversation", id))
    }

    async fn view(&self, conversation: Conversation) -> Result<ConversationView> {
        let users = lookup::summaries(self.users.as_ref(), conversation.participants).await?;
        let last_message = match conversation.last_message_id {
            Some(id) => self.messages.find_messages_by_ids(&[id]).await?.pop(),
            None => None,
        };
        Ok(ConversationView {
            id: conversation.id,
            participants: conversation
                .participants
                .iter()
                .filter_map(|p| users.get(p).cloned())
                .collect(),
            last_message,
            updated_at: conversation.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{
        MockConversationRepository, MockEventPublisher, MockMessageRepository,
        MockNotificationRepository, MockPostRepository, MockUserRepository, User,
    };

    fn principal(id: Uuid) -> Principal {
        Principal { id, is_admin: false }
    }

    fn service(
        conversations: MockConversationRepository,
        messages: MockMessageRepository,
        users: MockUserRepository,
        notifications: MockNotificationRepository,
        publisher: MockEventPublisher,
    ) -> ChatService {
        let users: Arc<dyn UserRepository> = Arc::new(users);
        let fanout = Fanout::new(Arc::new(publisher));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(notifications),
            users.clone(),
            Arc::new(MockPostRepository::new()),
            fanout.clone(),
        );
        ChatService::new(Arc::new(conversations), Arc::new(messages), users, dispatcher, fanout)
    }

    #[tokio::test]
    async fn cannot_message_yourself() {
        let me = Uuid::new_v4();
        let svc = service(
            MockConversationRepository::new(),
            MockMessageRepository::new(),
            MockUserRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc.get_or_create_conversation(principal(me), me).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[tokio::test]
    async fn outsiders_cannot_read_a_conversation() {
        let conv = Conversation::between(Uuid::new_v4(), Uuid::new_v4());
        let id = conv.id;
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        let mut messages = MockMessageRepository::new();
        messages.expect_list_messages().never();

        let svc = service(
            conversations,
            messages,
            MockUserRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let first_page = PageRequest::new(None, None, DEFAULT_MESSAGE_LIMIT);
        let err = svc
            .get_messages(principal(Uuid::new_v4()), id, first_page)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(..)));
    }

    #[tokio::test]
    async fn messages_come_back_oldest_first_with_has_more() {
        let me = Uuid::new_v4();
        let conv = Conversation::between(me, Uuid::new_v4());
        let conv_id = conv.id;
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        let mut messages = MockMessageRepository::new();
        messages
            .expect_list_messages()
            .withf(|_, limit, offset| *limit == 3 && *offset == 0)
            .returning(move |c, _, _| {
                Ok(vec![
                    Message::new(c, me, "third".into()),
                    Message::new(c, me, "second".into()),
                    Message::new(c, me, "first".into()),
                ])
            });
        messages
            .expect_mark_conversation_read()
            .times(1)
            .returning(|_, _| Ok(2));
        let mut users = MockUserRepository::new();
        users.expect_find_users().returning(|_| Ok(vec![]));

        let svc = service(
            conversations,
            messages,
            users,
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let newest_two = PageRequest::new(None, Some(2), DEFAULT_MESSAGE_LIMIT);
        let page = svc
            .get_messages(principal(me), conv_id, newest_two)
            .await
            .unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, ["second", "third"]);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn sending_notifies_and_pushes_to_the_recipient() {
        let sender = User::new("alice".into(), "a@x.io".into(), String::new());
        let me = sender.id;
        let other = Uuid::new_v4();
        let conv = Conversation::between(me, other);
        let conv_id = conv.id;

        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        let mut messages = MockMessageRepository::new();
        messages.expect_create_message().times(1).returning(|m| Ok(m));
        let mut users = MockUserRepository::new();
        users
            .expect_find_user()
            .returning(move |_| Ok(Some(sender.clone())));
        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create_notification()
            .withf(move |n| {
                n.recipient_id == other && n.message.as_deref() == Some("New message from alice")
            })
            .times(1)
            .returning(|n| Ok(n));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(move |room, e| *room == Room::User(other) && e.event == names::NOTIFICATION_NEW)
            .times(1)
            .returning(|_, _| Ok(1));
        publisher
            .expect_publish()
            .withf(move |room, e| {
                *room == Room::User(other)
                    && e.event == names::MESSAGE_NEW
                    && e.data["conversationId"] == conv_id.to_string()
            })
            .times(1)
            .returning(|_, _| Ok(1));

        let svc = service(conversations, messages, users, notifications, publisher);
        let view = svc.send_message(principal(me), conv_id, " hi ").await.unwrap();
        assert_eq!(view.message.content, "hi");
        assert_eq!(view.sender.unwrap().username, "alice");
    }
}

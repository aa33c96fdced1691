//! # Vote Toggle Engine
//!
//! Resolves a submission against the user's current vote into one of three
//! transitions (create, remove, flip) and lets the repository apply the
//! record change and counter delta together. A submission that loses a race
//! against a concurrent one by the same user is re-resolved against the new
//! state, so the result is always one of the three transitions.

use std::sync::Arc;

use domains::realtime::names;
use domains::{
    CommentRepository, DomainError, NewNotification, NotificationKind, PostRepository, Principal,
    Result, Room, Vote, VoteRepository, VoteTally, VoteTarget, VoteTransition, VoteType,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fanout::Fanout;
use crate::lookup;
use crate::notifications::NotificationDispatcher;

pub const MAX_VOTE_ATTEMPTS: usize = 3;

/// Post-mutation tally plus the caller's resulting vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub upvotes: i64,
    pub downvotes: i64,
    pub net_votes: i64,
    pub user_vote: Option<VoteType>,
}

pub struct VoteService {
    votes: Arc<dyn VoteRepository>,
    posts: Arc<dyn PostRepository>,
    comments: Arc<dyn CommentRepository>,
    dispatcher: NotificationDispatcher,
    fanout: Fanout,
}

struct ResolvedTarget {
    post_id: Uuid,
    owner_id: Uuid,
    /// Counters as read before any change
    tally: VoteTally,
}

impl VoteService {
    pub fn new(
        votes: Arc<dyn VoteRepository>,
        posts: Arc<dyn PostRepository>,
        comments: Arc<dyn CommentRepository>,
        dispatcher: NotificationDispatcher,
        fanout: Fanout,
    ) -> Self {
        Self {
            votes,
            posts,
            comments,
            dispatcher,
            fanout,
        }
    }

    pub async fn cast_vote(
        &self,
        principal: Principal,
        target: VoteTarget,
        vote_type: VoteType,
    ) -> Result<VoteOutcome> {
        let resolved = self.resolve_target(target).await?;

        let mut attempt = 0;
        let (transition, tally) = loop {
            attempt += 1;
            let existing = self
                .votes
                .find_vote(principal.id, target)
                .await?
                .map(|v| v.vote_type);
            let transition = VoteTransition::resolve(existing, vote_type);
            match self.votes.apply_vote(principal.id, target, transition).await {
                Ok(tally) => break (transition, tally),
                Err(err) if err.is_conflict() && attempt < MAX_VOTE_ATTEMPTS => {
                    debug!(user_id = %principal.id, ?target, attempt, "vote raced, re-resolving");
                }
                Err(err) => return Err(err),
            }
        };
        info!(user_id = %principal.id, ?target, ?transition, "vote applied");

        Ok(self.announce(principal, target, resolved, transition, tally).await)
    }

    /// Moves an existing vote to `vote_type` by id. Only the voter may do
    /// this; asking for the type it already has changes nothing.
    pub async fn change_vote(
        &self,
        principal: Principal,
        vote_id: Uuid,
        vote_type: VoteType,
    ) -> Result<VoteOutcome> {
        let vote = self.owned_vote(principal, vote_id).await?;
        let resolved = self.resolve_target(vote.target).await?;
        if vote.vote_type == vote_type {
            return Ok(VoteOutcome {
                upvotes: resolved.tally.upvotes,
                downvotes: resolved.tally.downvotes,
                net_votes: resolved.tally.net(),
                user_vote: Some(vote_type),
            });
        }

        let transition = VoteTransition::Flip { from: vote.vote_type, to: vote_type };
        let tally = self.votes.apply_vote(principal.id, vote.target, transition).await?;
        info!(user_id = %principal.id, %vote_id, ?transition, "vote changed");
        Ok(self.announce(principal, vote.target, resolved, transition, tally).await)
    }

    /// Withdraws a vote by id. Only the voter may do this.
    pub async fn remove_vote(&self, principal: Principal, vote_id: Uuid) -> Result<VoteOutcome> {
        let vote = self.owned_vote(principal, vote_id).await?;
        let resolved = self.resolve_target(vote.target).await?;

        let transition = VoteTransition::Remove(vote.vote_type);
        let tally = self.votes.apply_vote(principal.id, vote.target, transition).await?;
        info!(user_id = %principal.id, %vote_id, "vote removed");
        Ok(self.announce(principal, vote.target, resolved, transition, tally).await)
    }

    async fn owned_vote(&self, principal: Principal, vote_id: Uuid) -> Result<Vote> {
        let vote = self
            .votes
            .find_vote_by_id(vote_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vote", vote_id))?;
        if vote.user_id != principal.id {
            return Err(DomainError::unauthorized("not authorized to change this vote"));
        }
        Ok(vote)
    }

    /// Broadcasts the new tally and sends the like notification a fresh
    /// upvote on a post earns.
    async fn announce(
        &self,
        principal: Principal,
        target: VoteTarget,
        resolved: ResolvedTarget,
        transition: VoteTransition,
        tally: VoteTally,
    ) -> VoteOutcome {
        let outcome = VoteOutcome {
            upvotes: tally.upvotes,
            downvotes: tally.downvotes,
            net_votes: tally.net(),
            user_vote: transition.resulting_vote(),
        };

        let room = Room::Post(resolved.post_id);
        match target {
            VoteTarget::Post(post_id) => self.fanout.to_room(
                room,
                names::POST_VOTED,
                &json!({
                    "postId": post_id,
                    "upvotes": outcome.upvotes,
                    "downvotes": outcome.downvotes,
                    "netVotes": outcome.net_votes,
                }),
            ),
            VoteTarget::Comment(comment_id) => self.fanout.to_room(
                room,
                names::COMMENT_VOTED,
                &json!({
                    "postId": resolved.post_id,
                    "commentId": comment_id,
                    "upvotes": outcome.upvotes,
                    "downvotes": outcome.downvotes,
                    "netVotes": outcome.net_votes,
                }),
            ),
        }

        if matches!(target, VoteTarget::Post(_))
            && transition == VoteTransition::Create(VoteType::Upvote)
        {
            self.dispatcher
                .notify(
                    NewNotification::new(resolved.owner_id, principal.id, NotificationKind::Like)
                        .on_post(resolved.post_id)
                        .with_message("liked your post"),
                )
                .await;
        }

        outcome
    }

    /// The room a vote is announced in, and who owns the target.
    async fn resolve_target(&self, target: VoteTarget) -> Result<ResolvedTarget> {
        match target {
            VoteTarget::Post(id) => {
                let post = lookup::live_post(self.posts.as_ref(), id).await?;
                Ok(ResolvedTarget {
                    post_id: post.id,
                    owner_id: post.author_id,
                    tally: VoteTally { upvotes: post.upvotes, downvotes: post.downvotes },
                })
            }
            VoteTarget::Comment(id) => {
                let comment = lookup::live_comment(self.comments.as_ref(), id).await?;
                Ok(ResolvedTarget {
                    post_id: comment.post_id,
                    owner_id: comment.author_id,
                    tally: VoteTally { upvotes: comment.upvotes, downvotes: comment.downvotes },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::{
        Category, Comment, MockCommentRepository, MockEventPublisher, MockNotificationRepository,
        MockPostRepository, MockUserRepository, MockVoteRepository, Post, UserRepository,
    };
    use mockall::Sequence;

    fn principal(id: Uuid) -> Principal {
        Principal { id, is_admin: false }
    }

    fn vote(user_id: Uuid, target: VoteTarget, vote_type: VoteType) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            user_id,
            target,
            vote_type,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(
        votes: MockVoteRepository,
        posts: MockPostRepository,
        comments: MockCommentRepository,
        notifications: MockNotificationRepository,
        publisher: MockEventPublisher,
    ) -> VoteService {
        let posts: Arc<dyn PostRepository> = Arc::new(posts);
        let mut users = MockUserRepository::new();
        users.expect_find_user().returning(|_| Ok(None));
        let users: Arc<dyn UserRepository> = Arc::new(users);
        let fanout = Fanout::new(Arc::new(publisher));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(notifications),
            users,
            posts.clone(),
            fanout.clone(),
        );
        VoteService::new(Arc::new(votes), posts, Arc::new(comments), dispatcher, fanout)
    }

    fn posts_returning(post: Post) -> MockPostRepository {
        let mut posts = MockPostRepository::new();
        posts.expect_find_post().returning(move |_| Ok(Some(post.clone())));
        posts
    }

    #[tokio::test]
    async fn first_upvote_on_someone_elses_post_notifies_the_author() {
        let author = Uuid::new_v4();
        let voter = Uuid::new_v4();
        let post = Post::new(author, "t".into(), "c".into(), Category::General, vec![]);
        let post_id = post.id;

        let mut votes = MockVoteRepository::new();
        votes.expect_find_vote().returning(|_, _| Ok(None));
        votes
            .expect_apply_vote()
            .withf(|_, _, t| *t == VoteTransition::Create(VoteType::Upvote))
            .returning(|_, _, _| Ok(VoteTally { upvotes: 1, downvotes: 0 }));
        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_create_notification()
            .withf(move |n| {
                n.recipient_id == author && n.sender_id == voter && n.kind == NotificationKind::Like
            })
            .times(1)
            .returning(|n| Ok(n));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(move |room, e| {
                *room == Room::Post(post_id)
                    && e.event == names::POST_VOTED
                    && e.data["upvotes"] == 1
            })
            .times(1)
            .returning(|_, _| Ok(1));
        publisher
            .expect_publish()
            .withf(move |room, e| *room == Room::User(author) && e.event == names::NOTIFICATION_NEW)
            .times(1)
            .returning(|_, _| Ok(1));

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            notifications,
            publisher,
        );
        let out = svc
            .cast_vote(principal(voter), VoteTarget::Post(post_id), VoteType::Upvote)
            .await
            .unwrap();
        assert_eq!(
            out,
            VoteOutcome {
                upvotes: 1,
                downvotes: 0,
                net_votes: 1,
                user_vote: Some(VoteType::Upvote),
            }
        );
    }

    #[tokio::test]
    async fn upvoting_own_post_creates_no_notification() {
        let author = Uuid::new_v4();
        let post = Post::new(author, "t".into(), "c".into(), Category::General, vec![]);
        let post_id = post.id;

        let mut votes = MockVoteRepository::new();
        votes.expect_find_vote().returning(|_, _| Ok(None));
        votes
            .expect_apply_vote()
            .returning(|_, _, _| Ok(VoteTally { upvotes: 1, downvotes: 0 }));
        let mut notifications = MockNotificationRepository::new();
        notifications.expect_create_notification().never();
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(1).returning(|_, _| Ok(0));

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            notifications,
            publisher,
        );
        svc.cast_vote(principal(author), VoteTarget::Post(post_id), VoteType::Upvote)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn same_type_toggles_off() {
        let voter = Uuid::new_v4();
        let post = Post::new(Uuid::new_v4(), "t".into(), "c".into(), Category::General, vec![]);
        let target = VoteTarget::Post(post.id);

        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote()
            .returning(move |u, t| Ok(Some(vote(u, t, VoteType::Upvote))));
        votes
            .expect_apply_vote()
            .withf(|_, _, t| *t == VoteTransition::Remove(VoteType::Upvote))
            .returning(|_, _, _| Ok(VoteTally::default()));
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(|_, _| Ok(0));

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            publisher,
        );
        let out = svc.cast_vote(principal(voter), target, VoteType::Upvote).await.unwrap();
        assert_eq!(out.user_vote, None);
        assert_eq!((out.upvotes, out.downvotes), (0, 0));
    }

    #[tokio::test]
    async fn conflicting_submission_is_re_resolved() {
        let voter = Uuid::new_v4();
        let post = Post::new(Uuid::new_v4(), "t".into(), "c".into(), Category::General, vec![]);
        let target = VoteTarget::Post(post.id);
        let mut seq = Sequence::new();

        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        votes
            .expect_apply_vote()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(DomainError::conflict("vote already exists")));
        votes
            .expect_find_vote()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |u, t| Ok(Some(vote(u, t, VoteType::Downvote))));
        votes
            .expect_apply_vote()
            .withf(|_, _, t| {
                *t == VoteTransition::Flip { from: VoteType::Downvote, to: VoteType::Upvote }
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(VoteTally { upvotes: 1, downvotes: 0 }));
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(|_, _| Ok(0));

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            publisher,
        );
        let out = svc.cast_vote(principal(voter), target, VoteType::Upvote).await.unwrap();
        assert_eq!(out.user_vote, Some(VoteType::Upvote));
    }

    #[tokio::test]
    async fn comment_votes_are_announced_in_the_owning_post_room() {
        let comment = Comment::new(Uuid::new_v4(), Uuid::new_v4(), "c".into(), None);
        let (comment_id, post_id) = (comment.id, comment.post_id);

        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_comment()
            .returning(move |_| Ok(Some(comment.clone())));
        let mut votes = MockVoteRepository::new();
        votes.expect_find_vote().returning(|_, _| Ok(None));
        votes
            .expect_apply_vote()
            .returning(|_, _, _| Ok(VoteTally { upvotes: 0, downvotes: 1 }));
        let mut notifications = MockNotificationRepository::new();
        notifications.expect_create_notification().never();
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(move |room, e| {
                *room == Room::Post(post_id)
                    && e.event == names::COMMENT_VOTED
                    && e.data["commentId"] == comment_id.to_string()
                    && e.data["netVotes"] == -1
            })
            .times(1)
            .returning(|_, _| Ok(1));

        let svc = service(votes, MockPostRepository::new(), comments, notifications, publisher);
        let out = svc
            .cast_vote(
                principal(Uuid::new_v4()),
                VoteTarget::Comment(comment_id),
                VoteType::Downvote,
            )
            .await
            .unwrap();
        assert_eq!(out.net_votes, -1);
    }

    #[tokio::test]
    async fn votes_on_deleted_posts_are_not_found() {
        let mut post = Post::new(Uuid::new_v4(), "t".into(), "c".into(), Category::General, vec![]);
        post.is_deleted = true;
        let post_id = post.id;
        let mut votes = MockVoteRepository::new();
        votes.expect_apply_vote().never();

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc
            .cast_vote(principal(Uuid::new_v4()), VoteTarget::Post(post_id), VoteType::Upvote)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(..)));
    }

    #[tokio::test]
    async fn changing_a_vote_by_id_flips_it() {
        let voter = Uuid::new_v4();
        let mut post = Post::new(Uuid::new_v4(), "t".into(), "c".into(), Category::General, vec![]);
        post.upvotes = 1;
        let existing = vote(voter, VoteTarget::Post(post.id), VoteType::Upvote);
        let vote_id = existing.id;

        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote_by_id()
            .returning(move |_| Ok(Some(existing.clone())));
        votes
            .expect_apply_vote()
            .withf(|_, _, t| {
                *t == VoteTransition::Flip { from: VoteType::Upvote, to: VoteType::Downvote }
            })
            .times(1)
            .returning(|_, _, _| Ok(VoteTally { upvotes: 0, downvotes: 1 }));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, e| e.event == names::POST_VOTED && e.data["netVotes"] == -1)
            .times(1)
            .returning(|_, _| Ok(1));

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            publisher,
        );
        let out = svc.change_vote(principal(voter), vote_id, VoteType::Downvote).await.unwrap();
        assert_eq!(
            out,
            VoteOutcome {
                upvotes: 0,
                downvotes: 1,
                net_votes: -1,
                user_vote: Some(VoteType::Downvote),
            }
        );
    }

    #[tokio::test]
    async fn changing_to_the_current_type_is_a_no_op() {
        let voter = Uuid::new_v4();
        let mut post = Post::new(Uuid::new_v4(), "t".into(), "c".into(), Category::General, vec![]);
        post.downvotes = 3;
        let existing = vote(voter, VoteTarget::Post(post.id), VoteType::Downvote);
        let vote_id = existing.id;

        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote_by_id()
            .returning(move |_| Ok(Some(existing.clone())));
        votes.expect_apply_vote().never();

        let svc = service(
            votes,
            posts_returning(post),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let out = svc.change_vote(principal(voter), vote_id, VoteType::Downvote).await.unwrap();
        assert_eq!((out.downvotes, out.net_votes), (3, -3));
        assert_eq!(out.user_vote, Some(VoteType::Downvote));
    }

    #[tokio::test]
    async fn removing_a_vote_by_id_withdraws_it() {
        let voter = Uuid::new_v4();
        let comment = Comment::new(Uuid::new_v4(), Uuid::new_v4(), "c".into(), None);
        let existing = vote(voter, VoteTarget::Comment(comment.id), VoteType::Downvote);
        let vote_id = existing.id;

        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_comment()
            .returning(move |_| Ok(Some(comment.clone())));
        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote_by_id()
            .returning(move |_| Ok(Some(existing.clone())));
        votes
            .expect_apply_vote()
            .withf(|_, _, t| *t == VoteTransition::Remove(VoteType::Downvote))
            .times(1)
            .returning(|_, _, _| Ok(VoteTally::default()));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, e| e.event == names::COMMENT_VOTED)
            .times(1)
            .returning(|_, _| Ok(0));

        let svc = service(
            votes,
            MockPostRepository::new(),
            comments,
            MockNotificationRepository::new(),
            publisher,
        );
        let out = svc.remove_vote(principal(voter), vote_id).await.unwrap();
        assert_eq!(out.user_vote, None);
        assert_eq!(out.net_votes, 0);
    }

    #[tokio::test]
    async fn only_the_voter_may_touch_a_vote_by_id() {
        let existing = vote(Uuid::new_v4(), VoteTarget::Post(Uuid::new_v4()), VoteType::Upvote);
        let vote_id = existing.id;

        let mut votes = MockVoteRepository::new();
        votes
            .expect_find_vote_by_id()
            .returning(move |_| Ok(Some(existing.clone())));
        votes.expect_apply_vote().never();

        let svc = service(
            votes,
            MockPostRepository::new(),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let intruder = principal(Uuid::new_v4());
        let err = svc.remove_vote(intruder, vote_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(..)));
        let err = svc.change_vote(intruder, vote_id, VoteType::Downvote).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(..)));
    }

    #[tokio::test]
    async fn unknown_vote_ids_are_not_found() {
        let mut votes = MockVoteRepository::new();
        votes.expect_find_vote_by_id().returning(|_| Ok(None));

        let svc = service(
            votes,
            MockPostRepository::new(),
            MockCommentRepository::new(),
            MockNotificationRepository::new(),
            MockEventPublisher::new(),
        );
        let err = svc.remove_vote(principal(Uuid::new_v4()), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(..)));
    }
}

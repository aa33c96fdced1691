use std::sync::Arc;

use axum::http::{Method, StatusCode};
use domains::{Room, VoteRepository, VoteTarget, VoteType};
use integration_tests::{TestApp, TestUser};
use serde_json::json;
use tokio::task::JoinSet;

#[tokio::test]
async fn repeated_vote_toggles_and_opposite_vote_flips() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let voter = app.register("voter").await;
    let post_id = app.create_post(&author, "Toggle me").await;

    let (status, body) = app
        .vote(&voter, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["upvotes"], 1);
    assert_eq!(body["downvotes"], 0);
    assert_eq!(body["netVotes"], 1);
    assert_eq!(body["userVote"], "upvote");

    let (_, body) = app
        .vote(&voter, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    assert_eq!(body["upvotes"], 0);
    assert_eq!(body["downvotes"], 0);
    assert!(body["userVote"].is_null());

    app.vote(&voter, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    let (_, body) = app
        .vote(&voter, json!({ "postId": post_id, "type": "downvote" }))
        .await;
    assert_eq!(body["upvotes"], 0);
    assert_eq!(body["downvotes"], 1);
    assert_eq!(body["netVotes"], -1);
    assert_eq!(body["userVote"], "downvote");

    let (_, post) = app.get(&format!("/api/posts/{post_id}"), None).await;
    assert_eq!(post["upvotes"], 0);
    assert_eq!(post["downvotes"], 1);
    assert_eq!(post["netVotes"], -1);
}

#[tokio::test]
async fn tallies_stay_consistent_across_voters() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let post_id = app.create_post(&author, "Popular").await;

    for (i, kind) in ["upvote", "upvote", "downvote", "upvote"].iter().enumerate() {
        let voter = app.register(&format!("voter{i}")).await;
        let (status, _) = app
            .vote(&voter, json!({ "postId": post_id, "type": kind }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, post) = app.get(&format!("/api/posts/{post_id}"), None).await;
    assert_eq!(post["upvotes"], 3);
    assert_eq!(post["downvotes"], 1);
    assert_eq!(post["netVotes"], 2);
}

#[tokio::test]
async fn post_room_sees_every_tally_change() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let voter = app.register("voter").await;
    let post_id = app.create_post(&author, "Watched").await;
    let mut room = app.listen(Room::Post(post_id));

    app.vote(&voter, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    app.vote(&voter, json!({ "postId": post_id, "type": "downvote" }))
        .await;

    let events = room.events("post:voted");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["postId"], post_id.to_string());
    assert_eq!(events[0]["netVotes"], 1);
    assert_eq!(events[1]["upvotes"], 0);
    assert_eq!(events[1]["downvotes"], 1);
    assert_eq!(events[1]["netVotes"], -1);
}

#[tokio::test]
async fn comment_votes_are_announced_in_the_post_room() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let voter = app.register("voter").await;
    let post_id = app.create_post(&author, "Thread").await;
    let comment = app.comment(&author, post_id, None, "first").await;
    let mut room = app.listen(Room::Post(post_id));

    let (status, body) = app
        .vote(&voter, json!({ "commentId": comment["id"], "type": "downvote" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["netVotes"], -1);

    let events = room.events("comment:voted");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["commentId"], comment["id"]);
    assert_eq!(events[0]["postId"], post_id.to_string());
}

#[tokio::test]
async fn a_vote_names_exactly_one_target() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let post_id = app.create_post(&author, "Target").await;
    let comment = app.comment(&author, post_id, None, "c").await;

    let (status, _) = app
        .vote(
            &author,
            json!({ "postId": post_id, "commentId": comment["id"], "type": "upvote" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.vote(&author, json!({ "type": "upvote" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn voting_requires_a_token() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let post_id = app.create_post(&author, "Anon").await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/votes",
            None,
            Some(json!({ "postId": post_id, "type": "upvote" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_voters_lose_no_updates_and_double_submits_settle() {
    let app = Arc::new(TestApp::new());
    let author = app.register("author").await;
    let post_id = app.create_post(&author, "Busy").await;

    let mut twice = Vec::new();
    for i in 0..40 {
        twice.push(app.register(&format!("twice{i}")).await);
    }
    let mut once = Vec::new();
    for i in 0..30 {
        let kind = if i < 20 { "upvote" } else { "downvote" };
        once.push((app.register(&format!("once{i}")).await, kind));
    }

    let mut requests = JoinSet::new();
    let submit = |requests: &mut JoinSet<StatusCode>, voter: TestUser, kind: &'static str| {
        let app = app.clone();
        requests.spawn(async move {
            let (status, _) = app
                .vote(&voter, json!({ "postId": post_id, "type": kind }))
                .await;
            status
        });
    };
    for voter in &twice {
        submit(&mut requests, voter.clone(), "upvote");
        submit(&mut requests, voter.clone(), "upvote");
    }
    for (voter, kind) in &once {
        submit(&mut requests, voter.clone(), *kind);
    }
    let mut answered = 0;
    while let Some(status) = requests.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
        answered += 1;
    }
    assert_eq!(answered, 110);

    let (_, post) = app.get(&format!("/api/posts/{post_id}"), None).await;
    assert_eq!(post["upvotes"], 20);
    assert_eq!(post["downvotes"], 10);
    assert_eq!(post["netVotes"], 10);

    let target = VoteTarget::Post(post_id);
    for voter in &twice {
        assert_eq!(app.store.find_vote(voter.id, target).await.unwrap(), None);
    }
    for (voter, kind) in &once {
        let vote = app.store.find_vote(voter.id, target).await.unwrap().unwrap();
        assert_eq!(vote.vote_type, kind.parse::<VoteType>().unwrap());
    }
}

#[tokio::test]
async fn votes_can_be_changed_and_withdrawn_by_id() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let voter = app.register("voter").await;
    let post_id = app.create_post(&author, "By id").await;

    app.vote(&voter, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    let vote = app
        .store
        .find_vote(voter.id, VoteTarget::Post(post_id))
        .await
        .unwrap()
        .unwrap();
    let uri = format!("/api/votes/{}", vote.id);

    let (status, _) = app
        .json(Method::PUT, &uri, Some(&author), Some(json!({ "type": "downvote" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .json(Method::PUT, &uri, Some(&voter), Some(json!({ "type": "downvote" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["upvotes"], 0);
    assert_eq!(body["downvotes"], 1);
    assert_eq!(body["userVote"], "downvote");

    let (status, body) = app.json(Method::DELETE, &uri, Some(&voter), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["netVotes"], 0);
    assert!(body["userVote"].is_null());

    let (status, _) = app.json(Method::DELETE, &uri, Some(&voter), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, post) = app.get(&format!("/api/posts/{post_id}"), None).await;
    assert_eq!((post["upvotes"].as_i64(), post["downvotes"].as_i64()), (Some(0), Some(0)));
}

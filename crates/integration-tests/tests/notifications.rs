use axum::http::{Method, StatusCode};
use domains::Room;
use integration_tests::TestApp;
use serde_json::json;

#[tokio::test]
async fn upvote_notifies_the_post_author_live() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let fan = app.register("fan").await;
    let post_id = app.create_post(&author, "Likeable").await;
    let mut inbox = app.listen(Room::User(author.id));

    app.vote(&fan, json!({ "postId": post_id, "type": "upvote" }))
        .await;

    let pushed = inbox.events("notification:new");
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["type"], "like");
    assert_eq!(pushed[0]["sender"]["username"], "fan");
    assert_eq!(pushed[0]["post"]["title"], "Likeable");

    let (status, page) = app.get("/api/notifications", Some(&author)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["unreadCount"], 1);
    assert_eq!(page["notifications"][0]["type"], "like");
    assert_eq!(page["notifications"][0]["isRead"], false);
}

#[tokio::test]
async fn only_a_fresh_upvote_notifies() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let fan = app.register("fan").await;
    let post_id = app.create_post(&author, "Fickle").await;

    // Create, remove, create again, then flip to a downvote.
    for kind in ["upvote", "upvote", "upvote", "downvote"] {
        app.vote(&fan, json!({ "postId": post_id, "type": kind }))
            .await;
    }

    let (_, body) = app.get("/api/notifications/unread-count", Some(&author)).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn acting_on_your_own_content_is_silent() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let post_id = app.create_post(&author, "Mine").await;
    let mut inbox = app.listen(Room::User(author.id));

    app.vote(&author, json!({ "postId": post_id, "type": "upvote" }))
        .await;
    app.comment(&author, post_id, None, "talking to myself").await;

    assert!(inbox.events("notification:new").is_empty());
    let (_, body) = app.get("/api/notifications/unread-count", Some(&author)).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn comments_and_replies_notify_the_right_people() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let first = app.register("first").await;
    let second = app.register("second").await;
    let post_id = app.create_post(&author, "Chain").await;
    let mut author_inbox = app.listen(Room::User(author.id));
    let mut first_inbox = app.listen(Room::User(first.id));

    let top = app.comment(&first, post_id, None, "hello").await;
    let top_id = top["id"].as_str().unwrap().parse().ok();
    app.comment(&second, post_id, top_id, "hi back").await;

    let to_author = author_inbox.events("notification:new");
    assert_eq!(to_author.len(), 1);
    assert_eq!(to_author[0]["type"], "comment");

    let to_first = first_inbox.events("notification:new");
    assert_eq!(to_first.len(), 1);
    assert_eq!(to_first[0]["type"], "reply");
    assert_eq!(to_first[0]["sender"]["username"], "second");
}

#[tokio::test]
async fn read_state_belongs_to_the_recipient() {
    let app = TestApp::new();
    let author = app.register("author").await;
    let fan = app.register("fan").await;
    let first = app.create_post(&author, "One").await;
    let second = app.create_post(&author, "Two").await;
    for post_id in [first, second] {
        app.vote(&fan, json!({ "postId": post_id, "type": "upvote" }))
            .await;
    }

    let (_, page) = app.get("/api/notifications", Some(&author)).await;
    let id = page["notifications"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(Method::PUT, &format!("/api/notifications/{id}/read"), Some(&fan), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json(Method::PUT, &format!("/api/notifications/{id}/read"), Some(&author), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isRead"], true);

    let (_, body) = app.get("/api/notifications/unread-count", Some(&author)).await;
    assert_eq!(body["count"], 1);

    let (status, _) = app
        .json(Method::PUT, "/api/notifications/read-all", Some(&author), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get("/api/notifications/unread-count", Some(&author)).await;
    assert_eq!(body["count"], 0);

    let (status, _) = app
        .json(Method::DELETE, &format!("/api/notifications/{id}"), Some(&author), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, page) = app.get("/api/notifications", Some(&author)).await;
    assert_eq!(page["notifications"].as_array().unwrap().len(), 1);
}

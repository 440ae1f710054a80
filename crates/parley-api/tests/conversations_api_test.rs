//! Integration tests for conversation, participant, and message endpoints.

mod common;

use serde_json::{json, Value};
use uuid::Uuid;

use common::TestServer;

#[tokio::test]
async fn test_health_reports_open_streams() {
    let server = TestServer::start(1).await;
    let a = server.user(0);

    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["streams"], 0);

    let _stream = server.connect(a).await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["streams"], 1);
}

#[tokio::test]
async fn test_create_and_list_conversations() {
    let server = TestServer::start(3).await;
    let (a, b, c) = (server.user(0), server.user(1), server.user(2));

    let mut b_stream = server.connect(b).await;
    let response = server
        .post(
            a,
            "/api/v1/conversations",
            json!({ "participantIds": [b.id, b.id], "title": "Timing belt quote" }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["title"], "Timing belt quote");
    assert_eq!(created["participants"].as_array().unwrap().len(), 2);

    let event = b_stream.next_non_keepalive().await;
    assert_eq!(event["type"], "conversation.created");
    assert_eq!(event["conversationId"], created["id"]);
    assert_eq!(event["data"]["participantIds"], json!([a.id, b.id]));

    let listed: Value = server.get(b, "/api/v1/conversations").await.json().await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);

    let listed: Value = server.get(c, "/api/v1/conversations").await.json().await.unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_and_rename_are_gated() {
    let server = TestServer::start(3).await;
    let (a, b, outsider) = (server.user(0), server.user(1), server.user(2));
    let conversation_id = server.conversation(a, &[b]).await;
    let path = format!("/api/v1/conversations/{}", conversation_id);

    assert_eq!(server.get(a, &path).await.status(), 200);
    assert_eq!(server.get(outsider, &path).await.status(), 403);
    // Unknown conversations look the same as foreign ones.
    let unknown = format!("/api/v1/conversations/{}", Uuid::new_v4());
    assert_eq!(server.get(a, &unknown).await.status(), 403);

    let mut b_stream = server.connect(b).await;
    let response = server
        .client
        .patch(server.url(&path))
        .bearer_auth(&a.token)
        .json(&json!({ "title": "Order #1042" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["title"], "Order #1042");

    let event = b_stream.next_non_keepalive().await;
    assert_eq!(event["type"], "conversation.updated");
    assert_eq!(event["data"]["title"], "Order #1042");

    let response = server
        .client
        .patch(server.url(&path))
        .bearer_auth(&outsider.token)
        .json(&json!({ "title": "hijack" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_added_participant_receives_subsequent_messages() {
    let server = TestServer::start(3).await;
    let (a, b, c) = (server.user(0), server.user(1), server.user(2));
    let conversation_id = server.conversation(a, &[b]).await;
    let mut c_stream = server.connect(c).await;

    server.send(a, conversation_id, "before c joined").await;

    let response = server
        .post(
            b,
            &format!("/api/v1/conversations/{}/participants", conversation_id),
            json!({ "userId": c.id }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let event = c_stream.next_non_keepalive().await;
    assert_eq!(event["type"], "conversation.updated");

    let message = server.send(a, conversation_id, "welcome").await;
    let event = c_stream.next_non_keepalive().await;
    assert_eq!(event["type"], "message.created");
    assert_eq!(event["messageId"], message["id"]);
}

#[tokio::test]
async fn test_leave_conversation() {
    let server = TestServer::start(2).await;
    let (a, b) = (server.user(0), server.user(1));
    let conversation_id = server.conversation(a, &[b]).await;
    let mut b_stream = server.connect(b).await;

    let response = server
        .client
        .delete(server.url(&format!(
            "/api/v1/conversations/{}/participants/me",
            conversation_id
        )))
        .bearer_auth(&b.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let event = b_stream.next_non_keepalive().await;
    assert_eq!(event["type"], "conversation.updated");
    assert_eq!(event["data"]["participantIds"], json!([a.id]));

    server.send(a, conversation_id, "anyone?").await;
    b_stream
        .expect_quiet(std::time::Duration::from_millis(300))
        .await;

    let response = server
        .post(
            b,
            &format!("/api/v1/conversations/{}/messages", conversation_id),
            json!({ "content": "back again" }),
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_messages_send_and_paginate() {
    let server = TestServer::start(2).await;
    let (a, b) = (server.user(0), server.user(1));
    let conversation_id = server.conversation(a, &[b]).await;
    let path = format!("/api/v1/conversations/{}/messages", conversation_id);

    for n in 1..=5 {
        server.send(a, conversation_id, &format!("message {}", n)).await;
    }

    let page: Value = server
        .get(b, &format!("{}?limit=2", path))
        .await
        .json()
        .await
        .unwrap();
    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "message 5");
    assert_eq!(page[1]["content"], "message 4");

    let before = page[1]["createdAt"].as_str().unwrap();
    let older: Value = server
        .client
        .get(server.url(&path))
        .query(&[("before", before), ("limit", "10")])
        .bearer_auth(&b.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contents: Vec<&str> = older
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["message 3", "message 2", "message 1"]);

    let all: Value = server
        .get(b, &format!("{}?limit=0", path))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_send_message_validation() {
    let server = TestServer::start(2).await;
    let (a, b) = (server.user(0), server.user(1));
    let conversation_id = server.conversation(a, &[b]).await;
    let path = format!("/api/v1/conversations/{}/messages", conversation_id);

    let response = server.post(a, &path, json!({ "content": "   " })).await;
    assert_eq!(response.status(), 400);

    let response = server.post(a, &path, json!({})).await;
    assert_eq!(response.status(), 400);

    let response = server
        .client
        .post(server.url(&path))
        .json(&json!({ "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

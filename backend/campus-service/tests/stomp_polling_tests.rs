//! STOMP over the HTTP polling transport, end to end

#[macro_use]
mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use campus_service::db::InMemoryUserStore;
use campus_service::models::{ChatMessage, MessageType};
use campus_service::stomp::{decode_frames, Command, Frame};
use serde_json::Value;
use std::sync::Arc;

/// Open a polling session and return its id
macro_rules! open_session {
    ($app:expr) => {{
        let req = test::TestRequest::post().uri("/ws/poll").to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        body["session_id"].as_str().unwrap().to_string()
    }};
}

macro_rules! submit {
    ($app:expr, $id:expr, $frames:expr) => {{
        let req = test::TestRequest::post()
            .uri(&format!("/ws/poll/{}", $id))
            .set_payload($frames.to_string())
            .to_request();
        test::call_service(&$app, req).await.status()
    }};
}

macro_rules! receive {
    ($app:expr, $id:expr) => {{
        let req = test::TestRequest::get()
            .uri(&format!("/ws/poll/{}", $id))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<Frame> = if status == StatusCode::OK {
            decode_frames(&text).unwrap()
        } else {
            Vec::new()
        };
        (status, frames)
    }};
}

fn chat_body(frame: &Frame) -> ChatMessage {
    serde_json::from_str(&frame.body).unwrap()
}

#[actix_web::test]
async fn test_connect_with_bearer_token() {
    let keys = common::keys();
    let app = init_app!(
        common::state(Arc::new(InMemoryUserStore::new()), keys.clone()),
        keys.clone(),
        common::enforcing_policy()
    );

    let token = keys.generate_access_token("alice@x.edu", None).unwrap();
    let id = open_session!(app);
    let connect = format!("CONNECT\naccept-version:1.2\nAuthorization:Bearer {token}\n\n\0");
    assert_eq!(submit!(app, id, connect), StatusCode::NO_CONTENT);

    let (status, frames) = receive!(app, id);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Connected);
    assert_eq!(frames[0].get("user-name"), Some("alice@x.edu"));

    let req = test::TestRequest::get().uri("/api/chat/online").to_request();
    let online: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(online["users"], serde_json::json!(["alice@x.edu"]));

    // Nothing queued: the poll times out empty
    let (status, frames) = receive!(app, id);
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(frames.is_empty());
}

#[actix_web::test]
async fn test_public_chat_round_trip() {
    let keys = common::keys();
    let app = init_app!(
        common::state(Arc::new(InMemoryUserStore::new()), keys.clone()),
        keys,
        common::enforcing_policy()
    );

    let id = open_session!(app);
    submit!(
        app,
        id,
        "CONNECT\nX-User-Email:bob@x.edu\n\n\0SUBSCRIBE\nid:sub-0\ndestination:/topic/public\n\n\0"
    );
    let (_, frames) = receive!(app, id);
    assert_eq!(frames[0].get("user-name"), Some("bob@x.edu"));

    submit!(
        app,
        id,
        "SEND\ndestination:/app/chat.addUser\n\n{}\0SEND\ndestination:/app/chat.sendMessage\nreceipt:r-7\n\n{\"sender\":\"mallory\",\"content\":\"hello\"}\0"
    );
    let (status, frames) = receive!(app, id);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(frames.len(), 3);

    assert_eq!(frames[0].command, Command::Message);
    assert_eq!(frames[0].get("destination"), Some("/topic/public"));
    assert_eq!(chat_body(&frames[0]).message_type, MessageType::Join);

    let chat = chat_body(&frames[1]);
    assert_eq!(chat.message_type, MessageType::Chat);
    assert_eq!(chat.sender, "bob@x.edu");
    assert_eq!(chat.content, "hello");

    assert_eq!(frames[2].command, Command::Receipt);
    assert_eq!(frames[2].get("receipt-id"), Some("r-7"));
}

#[actix_web::test]
async fn test_private_message_between_sessions() {
    let keys = common::keys();
    let app = init_app!(
        common::state(Arc::new(InMemoryUserStore::new()), keys.clone()),
        keys,
        common::enforcing_policy()
    );

    let carol = open_session!(app);
    let dave = open_session!(app);
    for (id, email) in [(&carol, "carol@x.edu"), (&dave, "dave@x.edu")] {
        submit!(
            app,
            id,
            format!("CONNECT\nX-User-Email:{email}\n\n\0SUBSCRIBE\nid:p\ndestination:/user/queue/private\n\n\0")
        );
        let (_, frames) = receive!(app, id);
        assert_eq!(frames[0].command, Command::Connected);
    }

    submit!(
        app,
        carol,
        "SEND\ndestination:/app/chat.private\n\n{\"recipient\":\"dave@x.edu\",\"content\":\"psst\"}\0"
    );

    let (_, frames) = receive!(app, dave);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].get("destination"), Some("/user/queue/private"));
    let msg = chat_body(&frames[0]);
    assert_eq!(msg.message_type, MessageType::Private);
    assert_eq!(msg.sender, "carol@x.edu");
    assert_eq!(msg.recipient.as_deref(), Some("dave@x.edu"));

    let (_, echo) = receive!(app, carol);
    assert_eq!(chat_body(&echo[0]).content, "psst");
}

#[actix_web::test]
async fn test_anonymous_session_and_protocol_error() {
    let keys = common::keys();
    let app = init_app!(
        common::state(Arc::new(InMemoryUserStore::new()), keys.clone()),
        keys,
        common::enforcing_policy()
    );

    let id = open_session!(app);
    submit!(app, id, "CONNECT\nAuthorization:Bearer expired.or.garbage\n\n\0");
    let (_, frames) = receive!(app, id);
    assert_eq!(frames[0].get("user-name"), Some("anonymous"));

    submit!(app, id, "SEND\ndestination:/app/chat.sendMessage\n\n{broken\0");
    let (_, frames) = receive!(app, id);
    assert_eq!(frames[0].command, Command::Error);

    let (status, _) = receive!(app, id);
    assert_eq!(status, StatusCode::GONE);
    let (status, _) = receive!(app, id);
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_close_session() {
    let keys = common::keys();
    let app = init_app!(
        common::state(Arc::new(InMemoryUserStore::new()), keys.clone()),
        keys,
        common::enforcing_policy()
    );

    let id = open_session!(app);
    submit!(app, id, "CONNECT\nX-User-Email:erin@x.edu\n\n\0");

    let req = test::TestRequest::delete()
        .uri(&format!("/ws/poll/{id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri("/api/chat/online").to_request();
    let online: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(online["users"], serde_json::json!([]));

    assert_eq!(
        submit!(app, id, "DISCONNECT\n\n\0"),
        StatusCode::NOT_FOUND
    );
}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use tandem_exchange::ExchangeService;
use tandem_exchange::delivery::RevealDelivery;
use tandem_exchange::fake::{
    FakeMediaIndex, FakeMessageSink, FakeNotifier, FakeRepository, TestClock,
};
use tandem_media::LocalMediaStore;
use tandem_types::api::Claims;

use crate::{AppStateInner, router};

const SECRET: &str = "test-jwt-secret";

struct TestApp {
    app: Router,
    _media_dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let media_dir = tempfile::tempdir().unwrap();
    let media = Arc::new(
        LocalMediaStore::new(
            media_dir.path().to_path_buf(),
            "http://localhost:3000",
            SECRET.as_bytes(),
            Duration::from_secs(900),
        )
        .await
        .unwrap(),
    );
    let index = FakeMediaIndex::new();
    let notifier = FakeNotifier::new();
    let sink = FakeMessageSink::new();
    let (service, queues) = ExchangeService::new(
        Arc::new(FakeRepository::new()),
        media.clone(),
        Arc::new(index.clone()),
        Arc::new(notifier.clone()),
        Arc::new(TestClock::new()),
    );
    let delivery = RevealDelivery::new(Arc::new(sink.clone()), Arc::new(index), Arc::new(notifier));
    tokio::spawn(delivery.run(queues.reveals));

    let state = Arc::new(AppStateInner {
        service,
        media,
        messages: Arc::new(sink),
        jwt_secret: SECRET.to_string(),
    });
    TestApp {
        app: router(state),
        _media_dir: media_dir,
    }
}

fn token_for(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn upload(app: &Router, upload_url: &str, data: &'static [u8]) -> (StatusCode, Value) {
    let path = upload_url
        .strip_prefix("http://localhost:3000")
        .unwrap()
        .to_string();
    let request = Request::builder()
        .method("PUT")
        .uri(path)
        .body(Body::from(data))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn requires_bearer_token() {
    let t = test_app().await;
    let (status, _) = call(&t.app, "GET", &format!("/selfie-exchanges/{}", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn exchange_over_rest() {
    let t = test_app().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, created) = call(
        &t.app,
        "POST",
        "/selfie-exchanges",
        Some(alice),
        Some(json!({ "receiver_id": bob })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "PENDING");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, active) = call(&t.app, "GET", &format!("/selfie-exchanges/active/{}", alice), Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["id"], id.as_str());

    let (status, accepted) = call(&t.app, "POST", &format!("/selfie-exchanges/{}/accept", id), Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "ACCEPTED");

    let mut uploads = Vec::new();
    for user in [alice, bob] {
        let (status, ticket) = call(&t.app, "POST", "/media/presign", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, stored) = upload(&t.app, ticket["upload_url"].as_str().unwrap(), b"\xff\xd8jpeg").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stored["key"], ticket["key"]);
        uploads.push((user, stored));
    }

    let mut last = Value::Null;
    for (user, stored) in &uploads {
        let (status, view) = call(
            &t.app,
            "POST",
            &format!("/selfie-exchanges/{}/submit", id),
            Some(*user),
            Some(json!({ "object_key": stored["key"], "content_hash": stored["content_hash"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last = view;
    }
    assert_eq!(last["status"], "COMPLETED");
    assert_eq!(last["other_photo_ref"], uploads[0].1["key"]);

    // bob was offline at completion: the photo is in his view and his chat
    let (_, view) = call(&t.app, "GET", &format!("/selfie-exchanges/{}", id), Some(bob), None).await;
    assert_eq!(view["other_photo_ref"], uploads[0].1["key"]);
    let mut conversation = Value::Null;
    for _ in 0..100 {
        let (status, body) = call(&t.app, "GET", &format!("/messages/{}", alice), Some(bob), None).await;
        assert_eq!(status, StatusCode::OK);
        if body.as_array().is_some_and(|m| m.len() == 2) {
            conversation = body;
            break;
        }
        tokio::task::yield_now().await;
    }
    let from_alice = conversation
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["sender_id"] == alice.to_string())
        .unwrap();
    assert_eq!(from_alice["attachment_key"], uploads[0].1["key"]);

    let key = uploads[0].1["key"].as_str().unwrap();
    let request = Request::builder()
        .uri(format!("/media/{}", key))
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(bob)))
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"\xff\xd8jpeg");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let t = test_app().await;
    let (alice, bob, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (status, body) = call(&t.app, "POST", "/selfie-exchanges", Some(alice), Some(json!({ "receiver_id": alice }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call(&t.app, "GET", &format!("/selfie-exchanges/{}", Uuid::new_v4()), Some(alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = call(&t.app, "POST", "/selfie-exchanges", Some(alice), Some(json!({ "receiver_id": bob }))).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = call(&t.app, "GET", &format!("/selfie-exchanges/{}", id), Some(stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &t.app,
        "POST",
        &format!("/selfie-exchanges/{}/submit", id),
        Some(alice),
        Some(json!({ "object_key": "selfies/x.jpg", "content_hash": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, cancelled) = call(&t.app, "POST", &format!("/selfie-exchanges/{}/cancel", id), Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "EXPIRED");

    let (status, _) = call(&t.app, "GET", &format!("/selfie-exchanges/active/{}", bob), Some(alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn submit_rejects_someone_elses_upload() {
    let t = test_app().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, created) = call(&t.app, "POST", "/selfie-exchanges", Some(alice), Some(json!({ "receiver_id": bob }))).await;
    let id = created["id"].as_str().unwrap().to_string();
    call(&t.app, "POST", &format!("/selfie-exchanges/{}/accept", id), Some(bob), None).await;

    let (_, ticket) = call(&t.app, "POST", "/media/presign", Some(alice), None).await;
    let (_, stored) = upload(&t.app, ticket["upload_url"].as_str().unwrap(), b"alice").await;

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/selfie-exchanges/{}/submit", id),
        Some(bob),
        Some(json!({ "object_key": stored["key"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call(
        &t.app,
        "POST",
        &format!("/selfie-exchanges/{}/submit", id),
        Some(alice),
        Some(json!({ "object_key": stored["key"], "content_hash": "00" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_link_cannot_overwrite() {
    let t = test_app().await;
    let (_, ticket) = call(&t.app, "POST", "/media/presign", Some(Uuid::new_v4()), None).await;
    let url = ticket["upload_url"].as_str().unwrap();

    let (status, _) = upload(&t.app, url, b"original").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = upload(&t.app, url, b"replacement").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = Request::builder()
        .uri(format!("/media/{}", ticket["key"].as_str().unwrap()))
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(Uuid::new_v4())))
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"original");
}

#[tokio::test]
async fn upload_needs_valid_signature() {
    let t = test_app().await;
    let (_, ticket) = call(&t.app, "POST", "/media/presign", Some(Uuid::new_v4()), None).await;
    let url = ticket["upload_url"].as_str().unwrap();

    let tampered = url.replace("signature=", "signature=00");
    let (status, _) = upload(&t.app, &tampered, b"data").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = upload(&t.app, url, b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;

use chat_vm::api::{self, AppState};
use chat_vm::auth::AuthService;
use chat_vm::blob::{BlobConfig, BlobStore, SqliteBlobStore};
use chat_vm::chat::{ChatService, DEFAULT_PAGE_SIZE};
use chat_vm::events::ChangeFeed;
use chat_vm::store::Store;

const MAX_UPLOAD: usize = 1024;

/// Helper to create AppState with all required components
fn create_app_state(store: Arc<Store>, auth_service: Arc<AuthService>) -> AppState {
    let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(
        store.clone(),
        BlobConfig {
            max_upload_bytes: MAX_UPLOAD,
            ..BlobConfig::default()
        },
    ));
    AppState {
        chat: Arc::new(ChatService::new(
            store,
            blobs.clone(),
            ChangeFeed::default(),
            DEFAULT_PAGE_SIZE,
        )),
        auth_service,
        blobs,
    }
}

macro_rules! init_app {
    () => {{
        let store = Arc::new(Store::in_memory().unwrap());
        let auth_service = Arc::new(AuthService::new("test_secret".to_string(), 7, store.clone()));
        test::init_service(
            App::new()
                .app_data(web::Data::new(auth_service.clone()))
                .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
                .app_data(web::PayloadConfig::new(MAX_UPLOAD + 1))
                .configure(api::configure_routes),
        )
        .await
    }};
}

/// Register a user and evaluate to (token, user_id)
macro_rules! register {
    ($app:expr, $name:expr) => {{
        let name: &str = $name;
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "password123"
            }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&$app, req).await;
        (
            resp["data"]["token"].as_str().unwrap().to_string(),
            resp["data"]["user"]["id"].as_str().unwrap().to_string(),
        )
    }};
}

macro_rules! befriend {
    ($app:expr, $a:expr, $b:expr) => {{
        let (a_token, _): &(String, String) = &$a;
        let (b_token, b_id): &(String, String) = &$b;
        let req = test::TestRequest::post()
            .uri("/api/friends/requests")
            .insert_header(bearer(a_token))
            .set_json(json!({ "target_user_id": b_id }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&$app, req).await;
        let edge_id = resp["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/friends/requests/{}/respond", edge_id))
            .insert_header(bearer(b_token))
            .set_json(json!({ "accept": true }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }};
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

// ==================== Auth ====================

#[actix_web::test]
async fn test_health() {
    let app = init_app!();
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "ok");
}

#[actix_web::test]
async fn test_register_login_and_me() {
    let app = init_app!();
    let (token, user_id) = register!(app, "Alice");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "alice@example.com", "password": "password123" }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["success"], true);
    assert!(resp["data"]["token"].is_string());
    // Password should not be in response
    assert!(resp["data"]["user"]["password_hash"].is_null());

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(bearer(&token))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["id"], user_id);
    assert_eq!(resp["data"]["name"], "Alice");
    assert!(resp["data"]["nickname"].is_null());
}

#[actix_web::test]
async fn test_duplicate_registration_conflicts() {
    let app = init_app!();
    register!(app, "Alice");

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "name": "Other Alice",
            "email": "alice@example.com",
            "password": "password123"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_requests_without_token_are_unauthenticated() {
    let app = init_app!();

    let req = test::TestRequest::get().uri("/api/friends").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    let req = test::TestRequest::get()
        .uri("/api/groups")
        .insert_header(bearer("not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ==================== Groups ====================

#[actix_web::test]
async fn test_group_flow_over_http() {
    let app = init_app!();
    let alice = register!(app, "Alice");
    let bob = register!(app, "Bob");
    befriend!(app, alice, bob);

    let req = test::TestRequest::post()
        .uri("/api/groups")
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "name": "Climbers", "description": "Weekend trips" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let group_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/groups/{}/addable-friends", group_id))
        .insert_header(bearer(&alice.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"][0]["id"], bob.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/groups/{}/members", group_id))
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "user_id": bob.1 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri(&format!("/api/groups/{}/members", group_id))
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "user_id": bob.1 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::get()
        .uri("/api/groups")
        .insert_header(bearer(&bob.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"][0]["name"], "Climbers");
    assert_eq!(resp["data"][0]["role"], "member");
    assert_eq!(resp["data"][0]["member_count"], 2);

    // Bob may not remove the creator
    let req = test::TestRequest::delete()
        .uri(&format!("/api/groups/{}/members/{}", group_id, alice.1))
        .insert_header(bearer(&bob.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri(&format!("/api/groups/{}/leave", group_id))
        .insert_header(bearer(&alice.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri(&format!("/api/groups/{}/leave", group_id))
        .insert_header(bearer(&bob.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/groups/{}/members", group_id))
        .insert_header(bearer(&bob.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_unknown_group_is_not_found() {
    let app = init_app!();
    let alice = register!(app, "Alice");

    let req = test::TestRequest::post()
        .uri("/api/groups/nope/members")
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "user_id": alice.1 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

// ==================== Messages ====================

#[actix_web::test]
async fn test_direct_messages_and_block() {
    let app = init_app!();
    let alice = register!(app, "Alice");
    let bob = register!(app, "Bob");

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(bearer(&bob.0))
        .set_json(json!({ "content": "hi alice", "recipient_id": alice.1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let message_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/blocks")
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "target_user_id": bob.1 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(bearer(&bob.0))
        .set_json(json!({ "content": "hello?", "recipient_id": alice.1 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    // History stays visible to both sides
    let req = test::TestRequest::get()
        .uri(&format!("/api/direct/{}/messages", alice.1))
        .insert_header(bearer(&bob.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let messages = resp["data"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], message_id);
    assert_eq!(messages[0]["type"], "text");
    assert_eq!(messages[0]["author"]["name"], "Bob");
    assert!(messages[0]["reply_to"].is_null());

    // Alice cannot edit Bob's message
    let req = test::TestRequest::put()
        .uri(&format!("/api/messages/{}", message_id))
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "content": "edited" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/messages/{}", message_id))
        .insert_header(bearer(&bob.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_message_needs_exactly_one_target() {
    let app = init_app!();
    let alice = register!(app, "Alice");
    let bob = register!(app, "Bob");

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "content": "hi" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(bearer(&alice.0))
        .set_json(json!({ "content": "hi", "recipient_id": bob.1, "group_id": "g1" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

// ==================== Files ====================

#[actix_web::test]
async fn test_two_step_upload_and_file_message() {
    let app = init_app!();
    let alice = register!(app, "Alice");
    let bob = register!(app, "Bob");

    let req = test::TestRequest::post()
        .uri("/api/files/upload-url")
        .insert_header(bearer(&alice.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let upload_url = resp["data"]["upload_url"].as_str().unwrap().to_string();
    assert!(resp["data"]["token"].is_null());

    let req = test::TestRequest::post()
        .uri(&upload_url)
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![1u8, 2, 3, 4])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let storage_id = body["data"]["storage_id"].as_str().unwrap().to_string();

    // Tickets are single use
    let req = test::TestRequest::post()
        .uri(&upload_url)
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![1u8])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri(&format!("/api/files/{}", storage_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    let bytes = test::read_body(resp).await;
    assert_eq!(bytes.as_ref(), &[1u8, 2, 3, 4]);

    let req = test::TestRequest::post()
        .uri("/api/messages/file")
        .insert_header(bearer(&alice.0))
        .set_json(json!({
            "file_ref": storage_id,
            "file_name": "dot.png",
            "file_type": "image/png",
            "recipient_id": bob.1
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri(&format!("/api/direct/{}/messages", alice.1))
        .insert_header(bearer(&bob.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"][0]["type"], "file");
    assert_eq!(
        resp["data"][0]["file_url"],
        format!("/api/files/{}", storage_id)
    );
}

#[actix_web::test]
async fn test_oversize_upload_rejected() {
    let app = init_app!();
    let alice = register!(app, "Alice");

    let req = test::TestRequest::post()
        .uri("/api/files/upload-url")
        .insert_header(bearer(&alice.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let upload_url = resp["data"]["upload_url"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&upload_url)
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![0u8; MAX_UPLOAD + 1])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    // Past the payload limit the error still uses the JSON envelope
    let req = test::TestRequest::post()
        .uri(&upload_url)
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![0u8; MAX_UPLOAD * 2])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

// ==================== Profile & Search ====================

#[actix_web::test]
async fn test_profile_and_search() {
    let app = init_app!();
    let alice = register!(app, "Alice");
    let bob = register!(app, "Bob");

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(bearer(&bob.0))
        .set_json(json!({ "nickname": "builder" }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["nickname"], "builder");

    let req = test::TestRequest::get()
        .uri("/api/users/search?q=builder")
        .insert_header(bearer(&alice.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"].as_array().unwrap().len(), 1);
    assert_eq!(resp["data"][0]["id"], bob.1);

    let req = test::TestRequest::get()
        .uri("/api/users/search?q=builder")
        .insert_header(bearer(&bob.0))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert!(resp["data"].as_array().unwrap().is_empty());
}

// ==================== Live Queries ====================

#[actix_web::test]
async fn test_live_rejects_unknown_query_and_outsiders() {
    let app = init_app!();
    let alice = register!(app, "Alice");

    let req = test::TestRequest::get()
        .uri("/api/live?query=everything")
        .insert_header(bearer(&alice.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/live?query=group_messages&group_id=nope")
        .insert_header(bearer(&alice.0))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_live_opens_event_stream() {
    let app = init_app!();
    let alice = register!(app, "Alice");

    let req = test::TestRequest::get()
        .uri("/api/live?query=friends")
        .insert_header(bearer(&alice.0))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/event-stream");
}

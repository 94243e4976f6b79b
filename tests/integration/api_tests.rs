//! API integration tests against a running, seeded server
//!
//! Start the server and run `seed` first, then:
//! `cargo test --test integration -- --ignored`

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

fn base_url() -> String {
    std::env::var("LIBRARY_TEST_URL").unwrap_or_else(|_| "http://localhost:5000/api/v1".to_string())
}

async fn login(client: &Client, login: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/auth/login", base_url()))
        .json(&json!({ "login": login, "password": password }))
        .send()
        .await
        .expect("Failed to send login request");

    assert!(response.status().is_success(), "login failed: {}", response.status());
    let body: Value = response.json().await.expect("Failed to parse login response");
    body["token"].as_str().expect("No token in response").to_string()
}

async fn admin_token(client: &Client) -> String {
    login(client, "chris@chrislibrary.com", "chris123").await
}

/// Register a throwaway reader, returning (token, user id)
async fn register_reader(client: &Client) -> (String, i64) {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..999_999);
    let response = client
        .post(format!("{}/auth/register", base_url()))
        .json(&json!({
            "username": format!("reader{}", suffix),
            "email": format!("reader{}@example.org", suffix),
            "password": "secret123",
            "first_name": "Test",
            "last_name": "Reader"
        }))
        .send()
        .await
        .expect("Failed to send register request");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse response");
    (
        body["token"].as_str().expect("No token").to_string(),
        body["user"]["id"].as_i64().expect("No user id"),
    )
}

async fn create_book(client: &Client, token: &str, copies: i64) -> i64 {
    let response = client
        .post(format!("{}/books", base_url()))
        .bearer_auth(token)
        .json(&json!({
            "title": "Integration Test Book",
            "author": "Test Author",
            "total_copies": copies
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse response");
    body["id"].as_i64().expect("No book id")
}

async fn post(client: &Client, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}{}", base_url(), path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get(client: &Client, token: &str, path: &str) -> (StatusCode, Value) {
    let response = client
        .get(format!("{}{}", base_url(), path))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

async fn delete(client: &Client, token: &str, path: &str) -> (StatusCode, Value) {
    let response = client
        .delete(format!("{}{}", base_url(), path))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", base_url()))
        .json(&json!({ "login": "chrisadmin", "password": "wrong" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "NotAuthenticated");
}

#[tokio::test]
#[ignore]
async fn test_get_current_user() {
    let client = Client::new();
    let token = admin_token(&client).await;

    let (status, body) = get(&client, &token, "/auth/me").await;
    assert!(status.is_success());
    assert_eq!(body["username"], "chrisadmin");
    assert_eq!(body["role"], "admin");
    assert!(body.get("password").is_none());
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .get(format!("{}/transactions", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_search_books() {
    let client = Client::new();

    let response = client
        .get(format!("{}/books?search=gatsby", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["items"].is_array());
    assert!(body["total"].as_i64().unwrap_or(0) >= 1);
}

#[tokio::test]
#[ignore]
async fn test_single_copy_issue_and_return() {
    let client = Client::new();
    let admin = admin_token(&client).await;
    let (reader, reader_id) = register_reader(&client).await;
    let book_id = create_book(&client, &admin, 1).await;

    let (status, request) = post(&client, &reader, "/transactions", json!({ "bookId": book_id, "type": "issue" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let transaction_id = request["id"].as_i64().expect("No transaction id");

    let (status, _) = post(&client, &reader, &format!("/transactions/{}/approve", transaction_id), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = post(&client, &admin, &format!("/transactions/{}/approve", transaction_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert!(approved["due_date"].is_string());

    let (_, book) = get(&client, &admin, &format!("/books/{}", book_id)).await;
    assert_eq!(book["availability"]["available_copies"], 0);
    assert_eq!(book["availability"]["issued_copies"], 1);

    let (status, blocked) = delete(&client, &admin, &format!("/users/{}", reader_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(blocked["error"], "PolicyViolation");

    let (status, returned) = post(&client, &reader, &format!("/transactions/{}/return", transaction_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(returned["returned_at"].is_string());

    let (status, again) = post(&client, &reader, &format!("/transactions/{}/return", transaction_id), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(again["error"], "NotIssued");

    let (_, book) = get(&client, &admin, &format!("/books/{}", book_id)).await;
    assert_eq!(book["availability"]["available_copies"], 1);
    assert_eq!(book["availability"]["issued_copies"], 0);

    let (status, user) = delete(&client, &admin, &format!("/users/{}", reader_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["status"], "deactivated");
}

#[tokio::test]
#[ignore]
async fn test_rejection_keeps_stock() {
    let client = Client::new();
    let admin = admin_token(&client).await;
    let (reader, _) = register_reader(&client).await;
    let book_id = create_book(&client, &admin, 2).await;

    let (_, request) = post(&client, &reader, "/transactions", json!({ "book_id": book_id, "type": "issue" })).await;
    let transaction_id = request["id"].as_i64().expect("No transaction id");

    let (status, rejected) = post(
        &client,
        &admin,
        &format!("/transactions/{}/reject", transaction_id),
        json!({ "notes": "Reserved" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");

    let (_, book) = get(&client, &admin, &format!("/books/{}", book_id)).await;
    assert_eq!(book["availability"]["available_copies"], 2);

    let (status, _) = post(&client, &admin, &format!("/transactions/{}/approve", transaction_id), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore]
async fn test_get_stats() {
    let client = Client::new();
    let token = admin_token(&client).await;

    let (status, body) = get(&client, &token, "/stats").await;
    assert!(status.is_success());
    assert!(body["total_users"].is_number());
    assert!(body["books"]["available_copies"].is_number());
    assert!(body["transactions"]["pending_requests"].is_number());
    assert!(body["recent_transactions"].as_array().map_or(false, |r| r.len() <= 5));
}

#[tokio::test]
#[ignore]
async fn test_reconcile_reports_clean_ledger() {
    let client = Client::new();
    let token = admin_token(&client).await;

    let (status, report) = post(&client, &token, "/admin/reconcile", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(report["books_checked"].as_i64().unwrap_or(0) >= 1);
}

mod common;

use common::{TestApp, code_of};
use serde_json::{Value, json};

async fn seed(app: &TestApp, url: &str) -> String {
    let body: Value = app
        .server()
        .post("/api/shorten")
        .json(&json!({ "url": url }))
        .await
        .json();
    code_of(body["shortUrl"].as_str().unwrap())
}

#[tokio::test]
async fn test_list_cache_shows_both_directions() {
    let app = TestApp::new();
    let code = seed(&app, "https://example.com").await;

    let body: Value = app.server().get("/monitor/cache").await.json();

    assert_eq!(body["count"], 2);
    let entries = body["entries"].as_array().unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e["key"].as_str().unwrap()).collect();
    assert!(keys.contains(&"original:https://example.com"));
    assert!(keys.contains(&format!("short:{}", code).as_str()));
    assert!(entries.iter().all(|e| e["ttl"].as_i64().unwrap() > 0));
}

#[tokio::test]
async fn test_delete_short_key_then_missing() {
    let app = TestApp::new();
    let code = seed(&app, "https://example.com/key").await;
    let server = app.server();
    let path = format!("/monitor/cache/short:{}", code);

    let response = server.delete(&path).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["key"], format!("short:{}", code));
    assert_eq!(app.cache.len(), 1);

    server.delete(&path).await.assert_status_not_found();
}

#[tokio::test]
async fn test_delete_encoded_original_key() {
    let app = TestApp::new();
    seed(&app, "https://example.com").await;

    let response = app
        .server()
        .delete("/monitor/cache/original%3Ahttps%3A%2F%2Fexample.com")
        .await;

    response.assert_status_ok();
    assert_eq!(app.cache.len(), 1);
}

#[tokio::test]
async fn test_delete_unmanaged_key_rejected() {
    let server = TestApp::new().server();

    let response = server.delete("/monitor/cache/foo:bar").await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_clear_cache_keeps_store() {
    let app = TestApp::new();
    seed(&app, "https://one.example").await;
    seed(&app, "https://two.example").await;

    let body: Value = app.server().delete("/monitor/cache").await.json();

    assert_eq!(body["deleted"], 4);
    assert!(app.cache.is_empty());
    assert_eq!(app.state.url_service.list().await.unwrap().len(), 2);
}

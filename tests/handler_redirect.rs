mod common;

use axum::http::StatusCode;
use cached_shortener::config::Config;
use common::{TestApp, code_of, test_config};
use serde_json::{Value, json};

async fn shorten(server: &axum_test::TestServer, url: &str) -> String {
    let body: Value = server
        .post("/api/shorten")
        .json(&json!({ "url": url }))
        .await
        .json();
    code_of(body["shortUrl"].as_str().unwrap())
}

#[tokio::test]
async fn test_redirect_success() {
    let app = TestApp::new();
    let server = app.server();
    let code = shorten(&server, "https://example.com/target").await;

    let response = server.get(&format!("/{}", code)).await;

    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), "https://example.com/target");
}

#[tokio::test]
async fn test_redirect_not_found() {
    let server = TestApp::new().server();

    let response = server.get("/nope123").await;

    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_redirect_rejects_codes_with_dot() {
    let server = TestApp::new().server();

    server.get("/favicon.ico").await.assert_status_not_found();
}

#[tokio::test]
async fn test_redirect_after_cache_clear() {
    let app = TestApp::new();
    let server = app.server();
    let code = shorten(&server, "https://example.com/cached").await;

    server
        .get(&format!("/{}", code))
        .await
        .assert_status(StatusCode::TEMPORARY_REDIRECT);

    server.delete("/monitor/cache").await.assert_status_ok();
    assert!(app.cache.is_empty());

    let response = server.get(&format!("/{}", code)).await;
    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), "https://example.com/cached");

    let listing: Value = server.get("/monitor/cache").await.json();
    assert_eq!(listing["count"], 2);
}

#[tokio::test]
async fn test_redirect_rate_limited_per_code() {
    let config = Config {
        redirect_rate_limit: 1,
        ..test_config()
    };
    let app = TestApp::with_config(config);
    let server = app.server();
    let code = shorten(&server, "https://example.com/limited").await;

    server
        .get(&format!("/{}", code))
        .await
        .assert_status(StatusCode::TEMPORARY_REDIRECT);

    let limited = server.get(&format!("/{}", code)).await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get("retry-after").is_some());

    // Another code has its own bucket.
    server.get("/other01").await.assert_status_not_found();
}

#[tokio::test]
async fn test_redirect_rate_limit_uses_forwarded_ip_behind_proxy() {
    let config = Config {
        redirect_rate_limit: 1,
        behind_proxy: true,
        ..test_config()
    };
    let app = TestApp::with_config(config);
    let server = app.server();
    let code = shorten(&server, "https://example.com/proxied").await;
    let path = format!("/{}", code);

    server
        .get(&path)
        .add_header("x-forwarded-for", "203.0.113.1")
        .await
        .assert_status(StatusCode::TEMPORARY_REDIRECT);
    server
        .get(&path)
        .add_header("x-forwarded-for", "203.0.113.2")
        .await
        .assert_status(StatusCode::TEMPORARY_REDIRECT);
    server
        .get(&path)
        .add_header("x-forwarded-for", "203.0.113.1")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_redirect_follows_rename() {
    let app = TestApp::new();
    let server = app.server();
    let code = shorten(&server, "https://example.com/renamed").await;

    app.state
        .url_service
        .rename_short(&code, "promo01")
        .await
        .unwrap();

    server.get(&format!("/{}", code)).await.assert_status_not_found();
    let response = server.get("/promo01").await;
    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), "https://example.com/renamed");
}

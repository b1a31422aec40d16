//! E2E tests for health check and basic server functionality

mod common;

use common::TestServer;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_cors_headers() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/health"))
        .header("Origin", "https://watch.test.example.com")
        .send()
        .await
        .unwrap();

    // CORS should allow the configured public origin.
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/unknown/route"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_metrics_requires_session() {
    let server = TestServer::new().await;

    let anonymous = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);

    let token = server.create_test_token("viewer-1");
    let authenticated = server.get("/metrics", &token).await;
    assert_eq!(authenticated.status(), 200);
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let server = TestServer::new().await;
    let mut token = server.create_test_token("viewer-1");
    token.push('x');

    let response = server.get("/api/v1/wallet", &token).await;
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_token_outliving_max_age_is_rejected() {
    let server = TestServer::new().await;
    let max_age = server.state.config.auth.session_max_age;

    let too_long = server.create_token_with_lifetime("viewer-1", max_age + 60);
    let response = server.get("/api/v1/wallet", &too_long).await;
    assert_eq!(response.status(), 401);

    let within = server.create_token_with_lifetime("viewer-1", max_age);
    let response = server.get("/api/v1/wallet", &within).await;
    assert_eq!(response.status(), 200);
}

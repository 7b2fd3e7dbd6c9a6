use fixtures::marketplace::{router, MarketplaceState};
use serde_json::{json, Value};

async fn start_marketplace(state: MarketplaceState) -> String {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fixture listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Fixture server failed");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn domain_endpoints_require_the_accepted_token() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/lots/123"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("{base}/lots/123"))
        .header("Authorization", "Bearer A1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["crop"], "wheat");
    assert_eq!(json["id"], 123);
}

#[tokio::test]
async fn refresh_mints_the_configured_access_token() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state.clone()).await;
    let client = reqwest::Client::new();

    state.expire_access("A2");

    let response = client
        .post(format!("{base}/auth/refresh"))
        .json(&json!({ "refresh": "R1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["access"], "A2");
    // No rotation by default: the response omits the refresh field.
    assert!(json.get("refresh").is_none());
    assert_eq!(state.refresh_calls(), 1);
}

#[tokio::test]
async fn refresh_rejects_an_unknown_refresh_token() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/auth/refresh"))
        .json(&json!({ "refresh": "bogus" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forced_refresh_failure_answers_with_the_configured_status() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state.clone()).await;
    let client = reqwest::Client::new();

    state.set_refresh_failure(Some(403));

    let response = client
        .post(format!("{base}/auth/refresh"))
        .json(&json!({ "refresh": "R1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rotation_includes_and_tracks_a_new_refresh_token() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state.clone()).await;
    let client = reqwest::Client::new();

    state.set_rotation(true);

    let response = client
        .post(format!("{base}/auth/refresh"))
        .json(&json!({ "refresh": "R1" }))
        .send()
        .await
        .unwrap();
    let json: Value = response.json().await.unwrap();

    let rotated = json["refresh"].as_str().unwrap().to_string();
    assert_ne!(rotated, "R1");
    assert_eq!(state.current_refresh(), rotated);

    // The old refresh token no longer works.
    let response = client
        .post(format!("{base}/auth/refresh"))
        .json(&json!({ "refresh": "R1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_issues_the_current_session_tokens() {
    let state = MarketplaceState::new("A1", "R1");
    let base = start_marketplace(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "phone": "+919812345678", "otp": "123456" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["access"], "A1");
    assert_eq!(json["refresh"], "R1");
    assert_eq!(json["user"]["role"], "farmer");

    let response = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "phone": "+919812345678", "otp": "000000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

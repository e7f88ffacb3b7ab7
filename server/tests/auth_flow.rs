mod common;

use common::*;
use reqwest::{header, StatusCode};
use serde_json::{json, Value};

#[tokio::test]
async fn health_is_public() {
    let server = spawn_server().await;
    let uri: hyper::Uri = server.api("/health").parse().unwrap();
    let resp = hyper::Client::new().get(uri).await.unwrap();
    assert!(resp.status().is_success());
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn register_validates_input() {
    let server = spawn_server().await;
    let client = client();
    let cases = [
        json!({"username": "lan", "password": "12345", "confirmPassword": "12345"}),
        json!({"username": "lan", "password": "123456", "confirmPassword": "654321"}),
        json!({"username": "x", "password": "123456", "confirmPassword": "123456"}),
    ];
    for body in cases {
        let resp = client
            .post(server.api("/auth/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
    }

    let first = register(&server, &client, "lan", "123456").await;
    assert_eq!(first["role"], "admin");
    assert!(first.get("password_hash").is_none());
    let second = register(&server, &client, "hoa", "123456").await;
    assert_eq!(second["role"], "parent");

    let resp = client
        .post(server.api("/auth/register"))
        .json(&json!({"username": "lan", "password": "abcdef", "confirm_password": "abcdef"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cookie_session_round_trip() {
    let server = spawn_server().await;
    let client = client();
    register(&server, &client, "minh", "hunter22").await;

    let resp = client.get(server.api("/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = login(&server, &client, "minh", "wrong-pass").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = login(&server, &client, "minh", "hunter22").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("session_token="));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let me: Value = client
        .get(server.api("/auth/me"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["username"], "minh");
    assert_eq!(me["role"], "admin");

    // bearer tokens work for clients without a cookie jar
    let resp = reqwest::Client::new()
        .get(server.api("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client.post(server.api("/auth/logout")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = client.get(server.api("/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forged_tokens_are_rejected() {
    let server = spawn_server().await;
    let resp = reqwest::Client::new()
        .get(server.api("/users"))
        .header(header::COOKIE, "session_token=not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_session");
}

#[tokio::test]
async fn deactivated_users_cannot_log_in() {
    let server = spawn_server().await;
    let admin = signed_in(&server).await;
    let other = client();
    let user = register(&server, &other, "thu", "secret-pass").await;
    let id = user["id"].as_str().unwrap();

    let listed: Vec<Value> = admin
        .get(server.api("/users"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);

    let resp = admin
        .post(server.api(&format!("/users/{id}/update")))
        .json(&json!({"role": "staff"}))
        .send()
        .await
        .unwrap();
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["role"], "staff");

    let resp = admin
        .post(server.api(&format!("/users/{id}/deactivate")))
        .send()
        .await
        .unwrap();
    let deactivated: Value = resp.json().await.unwrap();
    assert_eq!(deactivated["is_active"], false);
    let resp = login(&server, &other, "thu", "secret-pass").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    admin
        .post(server.api(&format!("/users/{id}/reactivate")))
        .send()
        .await
        .unwrap();
    let resp = login(&server, &other, "thu", "secret-pass").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let missing = uuid::Uuid::new_v4();
    let resp = admin
        .get(server.api(&format!("/users/{missing}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_attempts_are_rate_limited() {
    let server = spawn_server().await;
    let client = client();
    for _ in 0..5 {
        let resp = login(&server, &client, "nobody", "guess-pass").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    let resp = login(&server, &client, "nobody", "guess-pass").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn parents_cannot_reach_admin_routes() {
    let server = spawn_server().await;
    let admin = signed_in(&server).await;
    let parent = client();
    let user = register(&server, &parent, "binh", "secret-pass").await;
    assert_eq!(user["role"], "parent");
    let resp = login(&server, &parent, "binh", "secret-pass").await;
    assert_eq!(resp.status(), StatusCode::OK);

    // signed in, so /auth/me works
    let resp = parent.get(server.api("/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let id = user["id"].as_str().unwrap();
    let resp = parent
        .post(server.api(&format!("/users/{id}/update")))
        .json(&json!({"role": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    for path in ["/users", "/candidates", "/images"] {
        let resp = parent.get(server.api(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{path}");
    }
    let resp = parent
        .post(server.api("/landing-page"))
        .json(&json!({"hero": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let still: Value = admin
        .get(server.api(&format!("/users/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(still["role"], "parent");
}

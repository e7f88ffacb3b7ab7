#![allow(dead_code)]

use reqwest::{multipart, Client, StatusCode};
use serde_json::{json, Value};
use sitepress::{
    api::{build_router, AppState},
    config::Config,
};
use std::net::TcpListener;
use time::Time;
use tokio::task::JoinHandle;

/// Smallest byte string that sniffs as a PNG.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

pub struct TestServer {
    pub base: String,
    pub state: AppState,
    pub handle: JoinHandle<()>,
    pub tmp: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with("").await
}

/// Start a server whose uploads are published under `base_url`.
pub async fn spawn_server_with(base_url: &str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        base_url: base_url.to_string(),
        data_dir: tmp.path().to_path_buf(),
        max_upload_mb: 5,
        db_timeout_secs: 5,
        jwt_secret: "test-secret".into(),
        cookie_secure: false,
        cleanup_at: Time::MIDNIGHT,
        grace_hours: 24,
        logging_enabled: false,
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let handle = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        base: format!("http://{addr}"),
        state,
        handle,
        tmp,
    }
}

/// Client that keeps the session cookie between requests.
pub fn client() -> Client {
    Client::builder().cookie_store(true).build().unwrap()
}

pub async fn register(server: &TestServer, client: &Client, username: &str, password: &str) -> Value {
    let resp = client
        .post(server.api("/auth/register"))
        .json(&json!({
            "username": username,
            "password": password,
            "confirmPassword": password,
            "name": username,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

pub async fn login(server: &TestServer, client: &Client, username: &str, password: &str) -> reqwest::Response {
    client
        .post(server.api("/auth/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap()
}

/// Register and log in an editor on `client`. Called first on a fresh
/// server, so the editor is the admin.
pub async fn signed_in(server: &TestServer) -> Client {
    let client = client();
    register(server, &client, "editor", "secret-pass").await;
    let resp = login(server, &client, "editor", "secret-pass").await;
    assert_eq!(resp.status(), StatusCode::OK);
    client
}

/// Upload an image and return its public URL.
pub async fn upload(server: &TestServer, client: &Client, name: &str) -> String {
    let part = multipart::Part::bytes(PNG.to_vec())
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap();
    let resp = client
        .post(server.api("/images/upload"))
        .multipart(multipart::Form::new().part("image", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    body["url"].as_str().unwrap().to_string()
}

/// Create a post through the multipart form and return its JSON.
pub async fn create_post(server: &TestServer, client: &Client, title: &str, category: &str, content: &str) -> Value {
    let form = multipart::Form::new()
        .text("title", title.to_string())
        .text("content", content.to_string())
        .text("category", category.to_string())
        .text("author", "Editor".to_string());
    let resp = client
        .post(server.api("/posts"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

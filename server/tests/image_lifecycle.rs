mod common;

use common::*;
use reqwest::{header, multipart, StatusCode};
use serde_json::{json, Value};
use sitepress::{housekeeping, images};
use time::{Duration, OffsetDateTime};

async fn statuses(server: &TestServer, client: &reqwest::Client) -> Vec<(String, String)> {
    let list: Vec<Value> = client
        .get(server.api("/images"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    list.iter()
        .map(|i| {
            (
                i["url"].as_str().unwrap().to_string(),
                i["status"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

async fn status_of(server: &TestServer, client: &reqwest::Client, url: &str) -> String {
    statuses(server, client)
        .await
        .into_iter()
        .find(|(u, _)| u == url)
        .map(|(_, s)| s)
        .unwrap_or_else(|| "missing".into())
}

fn body_with(urls: &[&str]) -> String {
    let mut html = String::from("<p>intro</p>");
    for url in urls {
        html.push_str(&format!(r#"<img class="wide" src="{url}" alt="">"#));
    }
    // decoys that must not count
    html.push_str(r#"<img data-src="/uploads/decoy.png"><a href="/uploads/doc.png">x</a>"#);
    html
}

#[tokio::test]
async fn posts_drive_image_statuses() {
    let server = spawn_server().await;
    let client = signed_in(&server).await;

    let a = upload(&server, &client, "a.png").await;
    let b = upload(&server, &client, "b.jpg").await;
    let c = upload(&server, &client, "c.png").await;
    assert!(a.starts_with("/uploads/") && a.ends_with(".png"));
    for url in [&a, &b, &c] {
        assert_eq!(status_of(&server, &client, url).await, "pending");
    }

    let post = create_post(&server, &client, "Open day", "news", &body_with(&[&a, &b])).await;
    let id = post["id"].as_str().unwrap().to_string();
    assert_eq!(status_of(&server, &client, &a).await, "used");
    assert_eq!(status_of(&server, &client, &b).await, "used");
    assert_eq!(status_of(&server, &client, &c).await, "pending");

    let detail: Value = client
        .get(server.api(&format!("/posts/{id}/images")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["images"].as_array().unwrap().len(), 2);

    let resp = client
        .post(server.api(&format!("/posts/{id}/update")))
        .json(&json!({ "content": body_with(&[&b, &c]) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(status_of(&server, &client, &a).await, "pending");
    assert_eq!(status_of(&server, &client, &b).await, "used");
    assert_eq!(status_of(&server, &client, &c).await, "used");

    // a title-only edit leaves the registry alone
    let resp = client
        .post(server.api(&format!("/posts/{id}/update")))
        .json(&json!({ "title": "Open day 2025" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(status_of(&server, &client, &c).await, "used");

    let resp = client
        .post(server.api(&format!("/posts/{id}/delete")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let deleted: Value = resp.json().await.unwrap();
    assert_eq!(deleted["status"], "deleted");
    for url in [&a, &b, &c] {
        assert_eq!(status_of(&server, &client, url).await, "pending");
    }

    let resp = client
        .post(server.api(&format!("/posts/{id}/recover")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(status_of(&server, &client, &a).await, "pending");
    assert_eq!(status_of(&server, &client, &b).await, "used");
    assert_eq!(status_of(&server, &client, &c).await, "used");

    // a day and a bit later only the released image is swept
    let report = housekeeping::sweep(
        &server.state.pool,
        OffsetDateTime::now_utc() + Duration::hours(25),
        server.state.config.grace_period(),
    )
    .await
    .unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(status_of(&server, &client, &a).await, "missing");

    let gone = client.get(server.url(&a)).send().await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    let kept = client.get(server.url(&c)).send().await.unwrap();
    assert_eq!(kept.status(), StatusCode::OK);
    assert_eq!(kept.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(kept.bytes().await.unwrap().as_ref(), PNG);
}

#[tokio::test]
async fn fresh_pending_images_survive_the_sweep() {
    let server = spawn_server().await;
    let client = signed_in(&server).await;
    let url = upload(&server, &client, "draft.png").await;

    let report = housekeeping::sweep(
        &server.state.pool,
        OffsetDateTime::now_utc() + Duration::hours(23),
        Duration::hours(24),
    )
    .await
    .unwrap();
    assert_eq!(report.candidates, 0);
    let conn = server.state.pool.get().unwrap();
    let record = images::find_by_url(&conn, &url).unwrap().unwrap();
    assert!(std::path::Path::new(&record.path).exists());
}

#[tokio::test]
async fn published_base_url_keeps_both_reference_forms_used() {
    const BASE: &str = "https://amg.example";
    let server = spawn_server_with(BASE).await;
    let client = signed_in(&server).await;

    let abs = upload(&server, &client, "abs.png").await;
    let rel_full = upload(&server, &client, "rel.png").await;
    assert!(abs.starts_with("https://amg.example/uploads/"));
    let rel = rel_full.strip_prefix(BASE).unwrap();
    assert!(rel.starts_with("/uploads/"));

    create_post(&server, &client, "Sports day", "news", &body_with(&[&abs, rel])).await;
    assert_eq!(status_of(&server, &client, &abs).await, "used");
    assert_eq!(status_of(&server, &client, &rel_full).await, "used");

    let report = housekeeping::sweep(
        &server.state.pool,
        OffsetDateTime::now_utc() + Duration::hours(25),
        server.state.config.grace_period(),
    )
    .await
    .unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(report.deleted, 0);

    for url in [&abs, &rel_full] {
        let path = url.strip_prefix(BASE).unwrap();
        let resp = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{url}");
    }
}

#[tokio::test]
async fn upload_requires_session_and_an_image() {
    let server = spawn_server().await;

    let anon = client();
    let part = multipart::Part::bytes(PNG.to_vec()).file_name("a.png");
    let resp = anon
        .post(server.api("/images/upload"))
        .multipart(multipart::Form::new().part("image", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let client = signed_in(&server).await;
    let part = multipart::Part::bytes(b"#!/bin/sh\necho hi\n".to_vec()).file_name("x.png");
    let resp = client
        .post(server.api("/images/upload"))
        .multipart(multipart::Form::new().part("image", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let part = multipart::Part::bytes(PNG.to_vec()).file_name("a.png");
    let resp = client
        .post(server.api("/images/upload"))
        .multipart(multipart::Form::new().part("photo", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let list: Vec<Value> = client
        .get(server.api("/images"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.is_empty());
    let stored = std::fs::read_dir(server.state.upload_dir.clone()).unwrap().count();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn header_image_is_stored_with_the_post() {
    let server = spawn_server().await;
    let client = signed_in(&server).await;
    let header_part = multipart::Part::bytes(PNG.to_vec())
        .file_name("cover.png")
        .mime_str("image/png")
        .unwrap();
    let form = multipart::Form::new()
        .text("title", "With cover")
        .text("content", "<p>text only</p>")
        .text("category", "events")
        .part("headerImage", header_part);
    let resp = client
        .post(server.api("/posts"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let post: Value = resp.json().await.unwrap();
    let cover = post["header_image"].as_str().unwrap();
    assert!(cover.starts_with("/uploads/"));
    // authored by the session user when the form leaves it blank
    assert_eq!(post["author"], "editor");
    let resp = client.get(server.url(cover)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn post_validation_and_missing_posts() {
    let server = spawn_server().await;
    let client = signed_in(&server).await;

    let form = multipart::Form::new().text("title", "No body");
    let resp = client
        .post(server.api("/posts"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let resp = client
        .post(server.api(&format!("/posts/{missing}/update")))
        .json(&json!({ "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = client
        .post(server.api(&format!("/posts/{missing}/delete")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let post = create_post(&server, &client, "Kept", "news", "<p>body</p>").await;
    let id = post["id"].as_str().unwrap();
    let resp = client
        .post(server.api(&format!("/posts/{id}/update")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

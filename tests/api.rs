use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use filevault::config::Config;
use filevault::db::Database;
use filevault::models::Claims;
use filevault::storage::{LocalStorage, StorageProvider};
use filevault::{create_router, AppState};

const SECRET: &str = "integration-secret";
const BOUNDARY: &str = "filevault-test-boundary";

struct TestApp {
    router: Router,
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    // Flows below make many calls per user in a burst
    test_app_with(|config| {
        config.rate_limit.per_second = 1000;
        config.rate_limit.burst = 1000;
    })
    .await
}

async fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.database.path = dir.path().join("api.db").to_string_lossy().into_owned();
    config.storage.blob_path = dir.path().join("blobs").to_string_lossy().into_owned();
    configure(&mut config);

    let db = Database::new(&config.database.path, config.database.max_connections)
        .await
        .unwrap();
    db.run_migrations().await.unwrap();

    let storage: Arc<dyn StorageProvider> = Arc::new(LocalStorage::new(&config.storage.blob_path));
    let state = AppState::new(db, Arc::new(config), storage);

    TestApp {
        router: create_router(state),
        _dir: dir,
    }
}

fn token(sub: &str, role: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        email: format!("{}@example.com", sub),
        role: role.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, f
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

impl TestApp {
    async fn raw(&self, req: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), disposition)
    }

    async fn call(&self, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let req = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes, _) = self.raw(req).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn upload(&self, auth: &str, parts: &[(&str, Option<&str>, &[u8])]) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/files/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", auth))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart(parts)))
            .unwrap();
        let (status, bytes, _) = self.raw(req).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn download(&self, uri: &str, auth: Option<&str>) -> (StatusCode, Vec<u8>, Option<String>) {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.raw(builder.body(Body::empty()).unwrap()).await
    }
}

#[tokio::test]
async fn rejects_missing_and_forged_tokens() {
    let app = test_app().await;

    let (status, body) = app.call(Method::GET, "/api/v1/files", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let forged = encode(
        &Header::default(),
        &Claims {
            sub: "alice".into(),
            email: String::new(),
            role: "admin".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        },
        &EncodingKey::from_secret(b"not-the-secret"),
    )
    .unwrap();
    let (status, _) = app.call(Method::GET, "/api/v1/files", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dedup_lifecycle_over_http() {
    let app = test_app().await;
    let alice = token("alice", "user");
    let bob = token("bob", "user");
    let admin = token("root", "admin");

    let (status, a) = app.upload(&alice, &[("file", Some("hi.txt"), b"hi")]).await;
    assert_eq!(status, StatusCode::OK);
    let h1 = &a["data"][0];
    assert_eq!(h1["ref_count"], 1);
    assert_eq!(h1["size_bytes"], 2);
    assert_eq!(h1["mime_type"], "text/plain");

    let (_, b) = app.upload(&bob, &[("file", Some("same.txt"), b"hi")]).await;
    let h2 = &b["data"][0];
    assert_eq!(h2["object_id"], h1["object_id"]);
    assert_eq!(h2["ref_count"], 2);

    let (status, _) = app.call(Method::GET, "/api/v1/admin/stats", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, stats) = app.call(Method::GET, "/api/v1/admin/stats", Some(&admin), None).await;
    assert_eq!(
        stats["data"],
        json!({"total_deduped_bytes": 2, "original_bytes": 4, "saved_bytes": 2, "saved_percent": 50.0})
    );

    let (_, listed) = app.call(Method::GET, "/api/v1/files", Some(&alice), None).await;
    assert_eq!(listed["data"]["total_count"], 1);
    let items = listed["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["storage_saved_bytes"], 2);

    // Bob may not delete Alice's handle
    let uri = format!("/api/v1/files/{}", h1["handle_id"].as_str().unwrap());
    let (status, _) = app.call(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, deleted) = app.call(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["data"]["remaining_refs"], 1);
    assert_eq!(deleted["data"]["object_removed"], false);

    let (status, _) = app.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let bob_file = format!("/api/v1/files/{}", h2["handle_id"].as_str().unwrap());
    let (status, content, disposition) = app
        .download(&format!("{}/download", bob_file), Some(&bob))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, b"hi");
    assert!(disposition.unwrap().contains("same.txt"));

    let (_, deleted) = app.call(Method::DELETE, &bob_file, Some(&bob), None).await;
    assert_eq!(deleted["data"]["object_removed"], true);

    let (_, page) = app.call(Method::GET, "/api/v1/admin/files", Some(&admin), None).await;
    assert_eq!(page["data"]["total_count"], 0);

    let (_, stats) = app.call(Method::GET, "/api/v1/admin/stats", Some(&admin), None).await;
    assert_eq!(stats["data"]["total_deduped_bytes"], 0);
    assert_eq!(stats["data"]["saved_percent"], 0.0);
}

#[tokio::test]
async fn upload_validation() {
    let app = test_app().await;
    let alice = token("alice", "user");

    let (status, _) = app.upload(&alice, &[("note", None, b"just text")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .upload(&alice, &[("visibility", None, b"friends"), ("file", Some("a.txt"), b"a")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .upload(
            &alice,
            &[
                ("visibility", None, b"public"),
                ("files", Some("one.txt"), b"one"),
                ("files", Some("two.txt"), b"two"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, listed) = app.call(Method::GET, "/api/v1/files", Some(&alice), None).await;
    assert_eq!(listed["data"]["items"].as_array().unwrap().len(), 2);

    let (_, paged) = app
        .call(Method::GET, "/api/v1/files?filename=two&limit=1&offset=0", Some(&alice), None)
        .await;
    assert_eq!(paged["data"]["total_count"], 1);
    assert_eq!(paged["data"]["items"][0]["filename"], "two.txt");
}

#[tokio::test]
async fn visibility_controls_reads() {
    let app = test_app().await;
    let alice = token("alice", "user");
    let bob = token("bob", "user");

    let (_, private) = app.upload(&alice, &[("file", Some("secret.txt"), b"secret")]).await;
    let (_, public) = app
        .upload(&alice, &[("visibility", None, b"public"), ("file", Some("open.txt"), b"open")])
        .await;

    let private_uri = format!("/api/v1/files/{}", private["data"][0]["handle_id"].as_str().unwrap());
    let public_uri = format!("/api/v1/files/{}", public["data"][0]["handle_id"].as_str().unwrap());

    let (status, _) = app.call(Method::GET, &private_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, detail) = app.call(Method::GET, &public_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["visibility"], "public");
    assert_eq!(detail["data"]["object"]["ref_count"], 1);
    assert!(detail["data"]["object"].get("storage_path").is_none());

    let (status, _, _) = app.download(&format!("{}/download", private_uri), Some(&bob)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn public_share_links() {
    let app = test_app().await;
    let alice = token("alice", "user");
    let bob = token("bob", "user");

    let (_, uploaded) = app.upload(&alice, &[("file", Some("report.pdf"), b"%PDF-1.4")]).await;
    let handle_id = uploaded["data"][0]["handle_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(Method::POST, "/api/v1/shares", Some(&bob), Some(json!({"user_file_id": handle_id})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, share) = app
        .call(Method::POST, "/api/v1/shares", Some(&alice), Some(json!({"user_file_id": handle_id})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let link = share["data"]["public_link"].as_str().unwrap().to_string();

    let (status, info) = app
        .call(Method::GET, &format!("/api/v1/public/shares/{}", link), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["data"]["filename"], "report.pdf");
    assert_eq!(info["data"]["mime_type"], "application/pdf");

    let (status, content, _) = app
        .download(&format!("/api/v1/public/shares/{}/download", link), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, b"%PDF-1.4");

    let (_, mine) = app.call(Method::GET, "/api/v1/shares", Some(&alice), None).await;
    assert_eq!(mine["data"][0]["download_count"], 1);

    // Deleting the handle takes its shares with it
    app.call(Method::DELETE, &format!("/api/v1/files/{}", handle_id), Some(&alice), None)
        .await;
    let (status, _) = app
        .call(Method::GET, &format!("/api/v1/public/shares/{}", link), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn throttles_each_user_after_burst() {
    // Slow refill so the burst is exhausted before a token comes back
    let app = test_app_with(|config| {
        config.rate_limit.per_second = 1;
        config.rate_limit.burst = 5;
    })
    .await;
    let alice = token("alice", "user");
    let bob = token("bob", "user");

    for _ in 0..5 {
        let (status, _) = app.call(Method::GET, "/api/v1/files", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let req = Request::builder()
        .uri("/api/v1/files")
        .header(header::AUTHORIZATION, format!("Bearer {}", alice))
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
    let body: Value = serde_json::from_slice(&axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["code"], 429);
    assert_eq!(body["retryable"], true);

    // Other users keep their own allowance; unauthenticated calls still get 401
    let (status, _) = app.call(Method::GET, "/api/v1/files", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(Method::GET, "/api/v1/files", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

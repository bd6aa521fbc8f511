//! End-to-end tests against a stand-in index service served by axum on an
//! ephemeral port: library dispatch over HTTP, the relay HTTP API, and the
//! `relay` binary.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use doc_relay::archive::UnpackedArchive;
use doc_relay::audit::{AuditLog, UndoOutcome};
use doc_relay::config::Config;
use doc_relay::ingest::Dispatcher;
use doc_relay::models::DispatchRequest;
use doc_relay::remote::HttpRemoteIndex;
use doc_relay::server::{router, AppState};

#[derive(Default)]
struct IndexState {
    ingests: Vec<Value>,
    removals: Vec<Value>,
    next: u64,
}

type SharedIndex = Arc<Mutex<IndexState>>;

/// Files whose name starts with `fail` are rejected with HTTP 500.
async fn add_object(State(index): State<SharedIndex>, Json(body): Json<Value>) -> (StatusCode, String) {
    let mut index = index.lock();
    let rejected = body["filename"]
        .as_str()
        .map(|f| f.starts_with("fail"))
        .unwrap_or(false);
    index.ingests.push(body);
    if rejected {
        return (StatusCode::INTERNAL_SERVER_ERROR, "index unavailable".to_string());
    }
    index.next += 1;
    (StatusCode::OK, json!({ "msg": format!("obj-{}", index.next) }).to_string())
}

async fn remove_object(State(index): State<SharedIndex>, Json(body): Json<Value>) -> (StatusCode, String) {
    index.lock().removals.push(body);
    (StatusCode::OK, json!({ "msg": "removed" }).to_string())
}

async fn spawn_index() -> (String, SharedIndex) {
    let index = SharedIndex::default();
    let app = Router::new()
        .route("/add-master-object/file/", post(add_object))
        .route("/remove-master-objects/uuid/", post(remove_object))
        .with_state(index.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), index)
}

async fn spawn_relay(config: Config) -> String {
    let config = Arc::new(config);
    let remote = Arc::new(HttpRemoteIndex::new(&config.remote).unwrap());
    let audit = Arc::new(AuditLog::from_config(&config.audit));
    let app = router(AppState::new(config, remote, audit));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn test_config(base_url: &str) -> Config {
    let mut config = Config::minimal();
    config.remote.base_url = base_url.to_string();
    config.remote.timeout_secs = 10;
    config.chunking.max_words = 1;
    config.tiers.medium_from = 100;
    config.tiers.large_from = 1_000;
    config.dispatch.batch_size = 50;
    config.dispatch.medium_delay_ms = 0;
    config.dispatch.large_delay_ms = 0;
    config
}

fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
}

fn zip_archive(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn sample_archive() -> Vec<u8> {
    zip_archive(&[
        ("small.txt", "hello world".to_string()),
        ("docs/long.txt", words(120)),
        ("fail.txt", "rejected".to_string()),
        ("__MACOSX/._small.txt", "resource fork".to_string()),
    ])
}

#[tokio::test]
async fn test_archive_dispatch_and_undo_over_http() {
    let (base_url, index) = spawn_index().await;
    let config = Arc::new(test_config(&base_url));
    let remote = Arc::new(HttpRemoteIndex::new(&config.remote).unwrap());
    let audit = Arc::new(AuditLog::from_config(&config.audit));
    let dispatcher = Dispatcher::new(config.clone(), remote.clone(), audit.clone());

    let unpacked = UnpackedArchive::unpack(&sample_archive(), &config.archive).unwrap();
    assert_eq!(unpacked.files().len(), 3);

    let report = dispatcher
        .dispatch(DispatchRequest {
            files: unpacked.files().to_vec(),
            collection: "research".to_string(),
            doc_type: "paper".to_string(),
            user: "alice".to_string(),
        })
        .await
        .unwrap();

    let names: Vec<&str> = report.calls.iter().map(|c| c.filename.as_str()).collect();
    assert_eq!(
        names,
        vec!["long.txt", "long.txt", "long.txt", "fail.txt", "small.txt"]
    );
    assert_eq!(report.failed(), 1);
    assert_eq!(audit.len(), 5);

    {
        let index = index.lock();
        let long_firsts: Vec<&str> = index
            .ingests
            .iter()
            .filter(|b| b["filename"] == "long.txt")
            .map(|b| b["chunks"][0].as_str().unwrap())
            .collect();
        assert_eq!(long_firsts, vec!["w0", "w50", "w100"]);
        assert!(index.ingests.iter().all(|b| b["type"] == "paper"));
        assert!(index.ingests.iter().all(|b| b["collection"] == "research"));
    }

    let results = audit.undo_run(report.run_id, "alice", remote.as_ref()).await;
    assert_eq!(results.len(), 5);
    let removed = results
        .iter()
        .filter(|r| matches!(r.outcome, UndoOutcome::Removed { .. }))
        .count();
    let dismissed = results
        .iter()
        .filter(|r| r.outcome == UndoOutcome::Dismissed)
        .count();
    assert_eq!((removed, dismissed), (4, 1));
    assert!(audit.is_empty());

    let index = index.lock();
    assert_eq!(index.removals.len(), 4);
    assert!(index
        .removals
        .iter()
        .all(|r| r["collection"] == "research" && r["uuid"].as_str().unwrap().starts_with("obj-")));
}

#[tokio::test]
async fn test_relay_api_upload_audit_undo() {
    let (base_url, index) = spawn_index().await;
    let relay = spawn_relay(test_config(&base_url)).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", relay))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let archive = zip_archive(&[
        ("a.txt", "first upload".to_string()),
        ("b.md", "second upload".to_string()),
    ]);
    let resp = client
        .post(format!(
            "{}/archives?collection=research&doc_type=paper&user=alice",
            relay
        ))
        .body(archive)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["calls"].as_array().unwrap().len(), 2);
    let run_id = report["run_id"].as_str().unwrap().to_string();
    assert_eq!(index.lock().ingests.len(), 2);

    let mine: Value = client
        .get(format!("{}/audit?user=alice", relay))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine["entries"].as_array().unwrap().len(), 2);
    let theirs: Value = client
        .get(format!("{}/audit?user=bob", relay))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(theirs["entries"].as_array().unwrap().is_empty());

    let refused: Value = client
        .post(format!("{}/undo", relay))
        .json(&json!({ "positions": [0], "user": "bob" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(refused["failed"], 1);
    assert_eq!(refused["results"][0]["outcome"], "refused");
    assert!(index.lock().removals.is_empty());

    let undone: Value = client
        .post(format!("{}/undo", relay))
        .json(&json!({ "run_id": run_id, "user": "alice" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(undone["succeeded"], 2);
    assert_eq!(index.lock().removals.len(), 2);

    let all: Value = client
        .get(format!("{}/audit", relay))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(all["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_relay_api_error_contract() {
    let (base_url, index) = spawn_index().await;
    let relay = spawn_relay(test_config(&base_url)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/archives?collection=c&doc_type=t", relay))
        .body("this is not a zip")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "archive_error");

    let resp = client
        .post(format!("{}/archives?collection=%20&doc_type=t", relay))
        .body(zip_archive(&[("a.txt", "text".to_string())]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/undo", relay))
        .json(&json!({ "user": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert!(index.lock().ingests.is_empty());
}

#[tokio::test]
async fn test_relay_api_hides_server_files_and_chunk_text() {
    let (base_url, index) = spawn_index().await;
    let relay = spawn_relay(test_config(&base_url)).await;
    let client = reqwest::Client::new();
    let secret = "TOP-SECRET-TOKEN-1234";

    let tmp = tempfile::tempdir().unwrap();
    let secret_file = tmp.path().join("credentials.txt");
    std::fs::write(&secret_file, secret).unwrap();

    // Server-side paths cannot be dispatched.
    let resp = client
        .post(format!("{}/dispatch", relay))
        .header("Origin", "https://evil.example")
        .json(&json!({
            "files": [secret_file.to_str().unwrap()],
            "collection": "c",
            "doc_type": "t"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("access-control-allow-origin").is_none());
    assert!(index.lock().ingests.is_empty());

    // Uploaded text reaches the index but is not listed back.
    let resp = client
        .post(format!("{}/archives?collection=c&doc_type=t&user=alice", relay))
        .header("Origin", "https://evil.example")
        .body(zip_archive(&[("notes.txt", secret.to_string())]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("access-control-allow-origin").is_none());
    assert_eq!(index.lock().ingests.len(), 1);

    let resp = client
        .get(format!("{}/audit", relay))
        .header("Origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
    let text = resp.text().await.unwrap();
    assert!(!text.contains(secret), "audit listing leaks chunk text: {}", text);
    let audit: Value = serde_json::from_str(&text).unwrap();
    let entries = audit["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    for entry in entries {
        assert!(entry.get("chunks").is_none());
        assert!(entry.get("call").is_none());
        assert_eq!(entry["chunk_count"], 1);
        assert_eq!(entry["filename"], "notes.txt");
    }
}

#[tokio::test]
async fn test_relay_api_cors_limited_to_configured_origins() {
    let (base_url, _index) = spawn_index().await;
    let mut config = test_config(&base_url);
    config.server.allowed_origins = vec!["https://upload.example.com".to_string()];
    let relay = spawn_relay(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", relay))
        .header("Origin", "https://upload.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://upload.example.com")
    );

    let resp = client
        .get(format!("{}/health", relay))
        .header("Origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

fn write_config(dir: &Path, base_url: &str) -> std::path::PathBuf {
    let path = dir.join("relay.toml");
    std::fs::write(
        &path,
        format!(
            r#"[remote]
base_url = "{}"
timeout_secs = 10

[chunking]
max_words = 50

[dispatch]
medium_delay_ms = 0
large_delay_ms = 0
"#,
            base_url
        ),
    )
    .unwrap();
    path
}

async fn run_relay(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_relay"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .await
        .unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[tokio::test]
async fn test_cli_ingest_sends_archive() {
    let (base_url, index) = spawn_index().await;
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &base_url);
    let archive = tmp.path().join("batch.zip");
    std::fs::write(
        &archive,
        zip_archive(&[
            ("one.txt", "first document".to_string()),
            ("two.txt", "second document".to_string()),
        ]),
    )
    .unwrap();

    let (stdout, stderr, ok) = run_relay(
        &config,
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "research",
            "--doc-type",
            "note",
            "--user",
            "alice",
            "--progress",
            "off",
        ],
    )
    .await;
    assert!(ok, "relay ingest failed: {}", stderr);
    assert!(stdout.contains("succeeded: 2"), "stdout: {}", stdout);

    let index = index.lock();
    assert_eq!(index.ingests.len(), 2);
    assert!(index.ingests.iter().all(|b| b["type"] == "note"));
}

#[tokio::test]
async fn test_cli_ingest_exits_nonzero_on_failed_calls() {
    let (base_url, _index) = spawn_index().await;
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &base_url);
    let archive = tmp.path().join("batch.zip");
    std::fs::write(
        &archive,
        zip_archive(&[
            ("fail.txt", "rejected".to_string()),
            ("ok.txt", "accepted".to_string()),
        ]),
    )
    .unwrap();

    let (stdout, _stderr, ok) = run_relay(
        &config,
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--progress",
            "off",
        ],
    )
    .await;
    assert!(!ok);
    assert!(stdout.contains("failed: 1"), "stdout: {}", stdout);
}

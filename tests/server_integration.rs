//! End-to-end tests against a running `anchors serve` process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

const ADA: &str = "00000000-0000-4000-8000-000000000001";
const BOB: &str = "00000000-0000-4000-8000-000000000002";
const CY: &str = "00000000-0000-4000-8000-000000000003";

const BOB_ONE: &str = "00000000-0000-4000-8000-0000000000a1";
const BOB_PRIVATE: &str = "00000000-0000-4000-8000-0000000000a3";
const CY_ONE: &str = "00000000-0000-4000-8000-0000000000a4";

fn anchors_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("anchors");
    path
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Kills the server when the test ends, pass or fail.
struct ServerGuard {
    child: Child,
    base: String,
    _tmp: TempDir,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn run_anchors(config_path: &Path, args: &[&str]) {
    let output = Command::new(anchors_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run anchors");
    assert!(
        output.status.success(),
        "anchors {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn start_server() -> ServerGuard {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let port = find_free_port();

    let config_path = root.join("anchors.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/anchors.sqlite"

[workers]
count = 2

[server]
bind = "127.0.0.1:{}"

[log]
level = "warn"
"#,
            root.display(),
            port
        ),
    )
    .unwrap();

    let fixture = json!({
        "users": [
            { "id": ADA, "username": "ada" },
            { "id": BOB, "username": "bob" },
            { "id": CY, "username": "cy" }
        ],
        "anchors": [
            { "id": BOB_ONE, "ownerId": BOB, "title": "Bob one", "tags": ["rust"], "createdHoursAgo": 1 },
            { "id": BOB_PRIVATE, "ownerId": BOB, "title": "Bob private", "visibility": "private" },
            { "id": CY_ONE, "ownerId": CY, "title": "Cy one", "tags": ["rust"], "createdHoursAgo": 2 }
        ],
        "follows": [{ "follower": ADA, "followee": BOB }]
    });
    let fixture_path = root.join("fixture.json");
    fs::write(&fixture_path, fixture.to_string()).unwrap();

    run_anchors(&config_path, &["init"]);
    run_anchors(&config_path, &["load", fixture_path.to_str().unwrap()]);

    let child = Command::new(anchors_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start server");

    let guard = ServerGuard {
        child,
        base: format!("http://127.0.0.1:{}", port),
        _tmp: tmp,
    };
    wait_for_server(&guard.base);
    guard
}

fn wait_for_server(base: &str) {
    let client = Client::new();
    let url = format!("{}/health", base);
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(resp) = client.get(&url).send() {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Poll `check` until it returns true; background tasks run asynchronously.
fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("condition not met within 5 seconds");
}

fn get(client: &Client, url: &str, viewer: Option<&str>) -> (StatusCode, Value) {
    let mut req = client.get(url);
    if let Some(v) = viewer {
        req = req.header("X-Viewer-Id", v);
    }
    let resp = req.send().unwrap();
    let status = resp.status();
    (status, resp.json().unwrap())
}

fn post(client: &Client, url: &str, viewer: &str) -> (StatusCode, Value) {
    let resp = client
        .post(url)
        .header("X-Viewer-Id", viewer)
        .send()
        .unwrap();
    let status = resp.status();
    (status, resp.json().unwrap())
}

#[test]
fn test_health_reports_version() {
    let server = start_server();
    let client = Client::new();

    let (status, body) = get(&client, &format!("{}/health", server.base), None);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["workers"]["count"], 2);
}

#[test]
fn test_feed_errors_use_error_contract() {
    let server = start_server();
    let client = Client::new();

    let (status, body) = get(&client, &format!("{}/feed/home", server.base), None);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

    let (status, body) = get(
        &client,
        &format!("{}/feed/discover?limit=0", server.base),
        None,
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_LIMIT");

    let (status, body) = get(
        &client,
        &format!("{}/feed/tags/rust?sort=oldest", server.base),
        None,
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_SORT");

    let (status, body) = get(
        &client,
        &format!("{}/feed/discover?cursor=bm9wZQ", server.base),
        None,
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_CURSOR");
}

#[test]
fn test_feeds_over_http() {
    let server = start_server();
    let client = Client::new();

    let (status, home) = get(&client, &format!("{}/feed/home", server.base), Some(ADA));
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = home["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![BOB_ONE]);

    let (status, tag) = get(
        &client,
        &format!("{}/feed/tags/rust?sort=recent&limit=1", server.base),
        None,
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tag["items"][0]["id"], BOB_ONE);
    assert_eq!(tag["pagination"]["hasMore"], true);

    let cursor = tag["pagination"]["nextCursor"].as_str().unwrap().to_string();
    let (_, next) = get(
        &client,
        &format!("{}/feed/tags/rust?sort=recent&limit=1&cursor={}", server.base, cursor),
        None,
    );
    assert_eq!(next["items"][0]["id"], CY_ONE);
    assert_eq!(next["pagination"]["hasMore"], false);
}

#[test]
fn test_like_updates_score_and_notifies_owner() {
    let server = start_server();
    let client = Client::new();
    let like_url = format!("{}/anchors/{}/like", server.base, CY_ONE);

    let (status, body) = post(&client, &like_url, ADA);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (_, body) = post(&client, &like_url, ADA);
    assert_eq!(body["changed"], false);

    let notifications_url = format!("{}/notifications", server.base);
    eventually(|| {
        let (_, body) = get(&client, &notifications_url, Some(CY));
        body["notifications"]
            .as_array()
            .map(|n| n.len() == 1 && n[0]["type"] == "like")
            .unwrap_or(false)
    });

    let discover_url = format!("{}/feed/discover?category=popular", server.base);
    eventually(|| {
        let (_, page) = get(&client, &discover_url, None);
        page["items"]
            .as_array()
            .unwrap()
            .iter()
            .any(|i| i["id"] == CY_ONE && i["engagementScore"] == 2)
    });

    let resp = client
        .delete(&like_url)
        .header("X-Viewer-Id", ADA)
        .send()
        .unwrap();
    let body: Value = resp.json().unwrap();
    assert_eq!(body["changed"], true);
}

#[test]
fn test_follow_rules() {
    let server = start_server();
    let client = Client::new();

    let (status, body) = post(
        &client,
        &format!("{}/users/{}/follow", server.base, ADA),
        ADA,
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PARAMETER");

    let (status, body) = post(
        &client,
        &format!("{}/users/{}/follow", server.base, CY),
        ADA,
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, body) = post(
        &client,
        &format!("{}/users/00000000-0000-4000-8000-00000000ffff/follow", server.base),
        ADA,
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = post(
        &client,
        &format!("{}/users/not-a-uuid/follow", server.base),
        ADA,
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{}/users/{}/follow", server.base, CY))
        .send()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_anchor_follow_and_seen() {
    let server = start_server();
    let client = Client::new();
    let follow_url = format!("{}/anchors/{}/follow", server.base, CY_ONE);

    let resp = client
        .post(&follow_url)
        .header("X-Viewer-Id", ADA)
        .json(&json!({ "notifyOnUpdate": false }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["changed"], true);

    let (status, body) = post(
        &client,
        &format!("{}/anchors/{}/seen", server.base, CY_ONE),
        ADA,
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let resp = client
        .delete(&follow_url)
        .header("X-Viewer-Id", ADA)
        .send()
        .unwrap();
    let body: Value = resp.json().unwrap();
    assert_eq!(body["changed"], true);

    let (_, body) = post(
        &client,
        &format!("{}/anchors/{}/seen", server.base, CY_ONE),
        ADA,
    );
    assert_eq!(body["changed"], false);
}

#[test]
fn test_private_anchor_hidden_from_others() {
    let server = start_server();
    let client = Client::new();

    let (status, body) = post(
        &client,
        &format!("{}/anchors/{}/like", server.base, BOB_PRIVATE),
        ADA,
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = post(
        &client,
        &format!("{}/anchors/{}/like", server.base, BOB_PRIVATE),
        BOB,
    );
    assert_eq!(status, StatusCode::OK);
}

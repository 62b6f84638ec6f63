use serde_json::{json, Value};
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a small source tree with known content
fn create_test_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/auth.rs"), "pub fn authenticate_user() {}\n").unwrap();
    std::fs::write(root.join("notes.txt"), "deployment checklist\n").unwrap();
    dir
}

/// Working directory holding an offline config and the node index
fn create_service_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("arbor.toml"),
        "[summarizer]\nprovider = \"extractive\"\n\n[storage]\ndatabase = \"arbor.db\"\n",
    )
    .unwrap();
    dir
}

/// Helper to find a free port
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Helper to wait for the service to be ready
fn wait_for_service(base_url: &str, timeout: Duration) -> bool {
    let client = reqwest::blocking::Client::new();
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if client.get(format!("{}/health", base_url)).send().is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}

struct Service {
    child: Child,
    base_url: String,
}

impl Drop for Service {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_service(workdir: &TempDir) -> Service {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_arbor-service"))
        .args(["--port", &port.to_string(), "--config", "arbor.toml"])
        .current_dir(workdir.path())
        .spawn()
        .expect("Failed to start arbor-service");
    let service = Service {
        child,
        base_url: format!("http://127.0.0.1:{}", port),
    };
    assert!(
        wait_for_service(&service.base_url, Duration::from_secs(10)),
        "Service failed to start"
    );
    service
}

fn wait_for_task(client: &reqwest::blocking::Client, base_url: &str, task_id: &str) -> Value {
    for _ in 0..100 {
        let task: Value = client
            .get(format!("{}/status/{}", base_url, task_id))
            .send()
            .unwrap()
            .json()
            .unwrap();
        let status = task["status"].as_str().unwrap_or_default().to_string();
        if status == "completed" || status == "failed" || status == "cancelled" {
            return task;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("task {} never finished", task_id);
}

#[test]
fn test_service_lifecycle() {
    let tree = create_test_tree();
    let workdir = create_service_dir();
    let service = start_service(&workdir);
    let base_url = service.base_url.clone();
    let client = reqwest::blocking::Client::new();

    // 1. Submit analysis
    let resp = client
        .post(format!("{}/analyze", base_url))
        .json(&json!({ "origin": tree.path().to_string_lossy() }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);
    let body: Value = resp.json().unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert!(!task_id.is_empty());

    // 2. Poll until done
    let task = wait_for_task(&client, &base_url, &task_id);
    assert_eq!(task["status"], "completed", "task: {}", task);
    assert_eq!(task["progress"], 100);
    let snapshot_id = task["result_id"].as_str().unwrap().to_string();

    // 3. Sidecar summaries are written next to the sources
    assert!(tree.path().join("src/auth.rs.md").exists());
    assert!(tree.path().join("src.md").exists());

    // 4. Snapshot list and tree
    let snapshots: Value = client
        .get(format!("{}/snapshots", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let snapshot = snapshots
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"].as_str() == Some(&snapshot_id))
        .expect("snapshot listed");
    assert_eq!(snapshot["status"], "completed");

    let tree_json: Value = client
        .get(format!("{}/tree/{}", base_url, snapshot_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(tree_json["path"], "");
    assert!(tree_json["summary"].as_str().is_some());
    assert_eq!(tree_json["children"].as_array().unwrap().len(), 2);

    // 5. Browsing
    let nodes: Value = client
        .get(format!("{}/snapshots/{}/nodes?parent=", base_url, snapshot_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let paths: Vec<&str> = nodes
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["src", "notes.txt"]);

    let node: Value = client
        .get(format!(
            "{}/snapshots/{}/node?path=src/auth.rs",
            base_url, snapshot_id
        ))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(node["summary"]
        .as_str()
        .unwrap()
        .contains("authenticate_user"));

    // 6. Search
    let results: Value = client
        .get(format!("{}/search?q=authenticate_user", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let hits = results["results"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["path"], "src/auth.rs");

    // 7. Q&A
    let answer: Value = client
        .post(format!("{}/qa", base_url))
        .json(&json!({ "snapshot_id": &snapshot_id, "question": "authenticate_user" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(answer["sources"], json!(["src/auth.rs"]));
    assert!(!answer["answer"].as_str().unwrap().is_empty());

    // 8. Rebuild the index from the cache
    let rebuilt: Value = client
        .post(format!("{}/snapshots/{}/rebuild", base_url, snapshot_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(rebuilt["restored"], 4);

    // 9. Cancelling a finished task is a no-op
    let cancelled: Value = client
        .post(format!("{}/tasks/{}/cancel", base_url, task_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(cancelled["cancelled"], false);
}

#[test]
fn test_second_analysis_reuses_cache() {
    let tree = create_test_tree();
    let workdir = create_service_dir();
    let service = start_service(&workdir);
    let client = reqwest::blocking::Client::new();

    let mut snapshot_ids = Vec::new();
    for _ in 0..2 {
        let body: Value = client
            .post(format!("{}/analyze", service.base_url))
            .json(&json!({ "origin": tree.path().to_string_lossy() }))
            .send()
            .unwrap()
            .json()
            .unwrap();
        let task = wait_for_task(
            &client,
            &service.base_url,
            body["task_id"].as_str().unwrap(),
        );
        assert_eq!(task["status"], "completed");
        snapshot_ids.push(task["result_id"].as_str().unwrap().to_string());
    }
    assert_eq!(snapshot_ids[0], snapshot_ids[1]);

    let edited = "Hand-written note about the auth module.";
    std::fs::write(tree.path().join("src/auth.rs.md"), edited).unwrap();
    let node: Value = client
        .get(format!(
            "{}/snapshots/{}/node?path=src/auth.rs",
            service.base_url, snapshot_ids[0]
        ))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(node["summary"], edited);
}

#[test]
fn test_error_envelopes() {
    let workdir = create_service_dir();
    let service = start_service(&workdir);
    let client = reqwest::blocking::Client::new();

    let resp = client
        .get(format!("{}/status/does-not-exist", service.base_url))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["code"], "not_found");

    let resp = client
        .post(format!("{}/analyze", service.base_url))
        .json(&json!({ "origin": "   " }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .get(format!("{}/search?q=", service.base_url))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .get(format!("{}/tree/unknown", service.base_url))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

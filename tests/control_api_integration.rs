//! Integration tests for the Control API.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! store and exercises the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use fleet_control::api;
use fleet_control::config::ManagerConfig;
use fleet_control::manager::Manager;
use fleet_control::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the Control API (no background loops) on a random port.
async fn start_server() -> (String, Arc<dyn Database>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let config = ManagerConfig {
        event_poll: Duration::from_millis(50),
        ..ManagerConfig::default()
    };
    let manager = Manager::build(db.clone(), config).unwrap();
    let app = api::routes(manager.state, &[]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), db)
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{base}{path}")).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

/// Create a one-task batch and return its job id.
async fn one_job(base: &str) -> String {
    let (status, body) = post(
        base,
        "/jobs-batch",
        json!({"title": "Widget", "tasks": [{"description": "write the widget"}]}),
    )
    .await;
    assert_eq!(status, 201);
    body["job_ids"][0].as_str().unwrap().to_string()
}

// ── Intake ───────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_creates_queued_jobs() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;

        let (status, body) = post(
            &base,
            "/jobs-batch",
            json!({
                "title": "Checkout",
                "project_id": "shop",
                "tasks": [{"description": "cart"}, {"description": "payment", "role": "Reviewer"}]
            }),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);
        assert!(body["root_job_id"].is_string());

        let (status, jobs) = get(&base, "/jobs?status=QUEUED").await;
        assert_eq!(status, 200);
        let jobs = jobs.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j["project_id"] == "shop"));

        let (status, _) = post(&base, "/jobs-batch", json!({"title": "Empty", "tasks": []})).await;
        assert_eq!(status, 400);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;

        let (status, body) = get(&base, &format!("/jobs/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(status, 404);
        assert!(body["error"].is_string());

        let (status, _) = get(&base, "/jobs/not-a-uuid").await;
        assert_eq!(status, 400);
    })
    .await
    .expect("test timed out");
}

// ── Claim / complete ─────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;
        let id = one_job(&base).await;

        let (status, _) = post(&base, &format!("/jobs/{id}/assign"), json!({"assigned_model": "alpha"})).await;
        assert_eq!(status, 200);

        let path = format!("/jobs/{id}/claim");
        let (a, b) = tokio::join!(
            post(&base, &path, json!({"worker_id": "alpha"})),
            post(&base, &path, json!({"worker_id": "alpha"})),
        );
        let mut statuses = [a.0, b.0];
        statuses.sort();
        assert_eq!(statuses, [200, 409]);

        let (_, job) = get(&base, &format!("/jobs/{id}")).await;
        assert_eq!(job["status"], "IN_PROGRESS");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn claim_straight_from_queue() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;
        let id = one_job(&base).await;

        let (status, body) = post(&base, &format!("/jobs/{id}/claim"), json!({"worker_id": "alpha"})).await;
        assert_eq!(status, 200);
        assert_eq!(body["worker"], "alpha");

        // A claimed job can no longer be reassigned or claimed again.
        let (status, _) = post(&base, &format!("/jobs/{id}/assign"), json!({"assigned_model": "beta"})).await;
        assert_eq!(status, 409);
        let (status, _) = post(&base, &format!("/jobs/{id}/claim"), json!({"worker_id": "beta"})).await;
        assert_eq!(status, 409);

        let (status, _) = post(
            &base,
            &format!("/jobs/{}/claim", uuid::Uuid::new_v4()),
            json!({"worker_id": "alpha"}),
        )
        .await;
        assert_eq!(status, 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn completion_is_terminal() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;
        let id = one_job(&base).await;

        // Completing before the claim is rejected.
        let (status, _) = post(&base, &format!("/jobs/{id}/complete"), json!({"success": true})).await;
        assert_eq!(status, 409);

        post(&base, &format!("/jobs/{id}/assign"), json!({"assigned_model": "alpha"})).await;
        post(&base, &format!("/jobs/{id}/claim"), json!({"worker_id": "alpha"})).await;

        let details = json!({"output": "fn widget() -> Widget { Widget::default() } // done", "confidence": 0.9});
        let (status, body) = post(
            &base,
            &format!("/jobs/{id}/complete"),
            json!({"success": true, "details": details}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "COMPLETED");

        let (status, _) = post(&base, &format!("/jobs/{id}/complete"), json!({"success": false})).await;
        assert_eq!(status, 409);

        let (_, events) = get(&base, &format!("/jobs/{id}/events")).await;
        let kinds: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["event_type"].as_str())
            .collect();
        assert_eq!(kinds.first(), Some(&"created"));
        assert_eq!(kinds.last(), Some(&"completed"));
        assert!(kinds.contains(&"claimed"));
    })
    .await
    .expect("test timed out");
}

// ── Models ───────────────────────────────────────────────────────────

#[tokio::test]
async fn artifact_needs_known_model_and_job() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;
        let id = one_job(&base).await;
        let artifact = json!({"job_id": id, "artifact_type": "result", "artifact": {"output": "x"}});

        let (status, _) = post(&base, "/models/ghost/artifact", artifact.clone()).await;
        assert_eq!(status, 404);

        let (status, body) = post(&base, "/models/alpha/register", json!({"kind": "stub"})).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "registered");

        let (status, _) = post(
            &base,
            "/models/alpha/artifact",
            json!({"job_id": uuid::Uuid::new_v4(), "artifact_type": "result", "artifact": {}}),
        )
        .await;
        assert_eq!(status, 404);

        let (status, body) = post(&base, "/models/alpha/artifact", artifact).await;
        assert_eq!(status, 201);
        assert_eq!(body["status"], "stored");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn route_without_match_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;

        let (status, body) = post(&base, "/route", json!({"requirements": ["code", "fast"]})).await;
        assert_eq!(status, 200);
        assert_eq!(body["model"], "employee_ollama");

        let (status, _) = post(&base, "/route", json!({"requirements": ["quantum"]})).await;
        assert_eq!(status, 404);
    })
    .await
    .expect("test timed out");
}

// ── Live feed ────────────────────────────────────────────────────────

#[tokio::test]
async fn event_stream_delivers_new_alerts() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_server().await;

        // History before connect is not replayed.
        db.append_audit("auditor", "alert", &json!({"reason": "old_news"}))
            .await
            .unwrap();

        let mut stream = reqwest::get(format!("{base}/events")).await.unwrap();
        assert_eq!(stream.status().as_u16(), 200);

        let (status, _) = post(
            &base,
            "/alerts",
            json!({"job_id": null, "severity": "high", "reason": "high_failure_rate", "message": "Model x failed 4 jobs in last hour"}),
        )
        .await;
        assert_eq!(status, 200);

        let mut received = String::new();
        while !received.contains("alert_received") {
            let chunk = stream.chunk().await.unwrap().expect("stream ended early");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(received.contains("high_failure_rate"));
        assert!(!received.contains("old_news"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_and_ready() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server().await;

        let (status, body) = get(&base, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");

        let (status, _) = get(&base, "/ready").await;
        assert_eq!(status, 200);
    })
    .await
    .expect("test timed out");
}

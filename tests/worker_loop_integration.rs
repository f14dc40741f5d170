//! Worker runtime against a live Control API: poll, claim, execute, report.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;

use fleet_control::adapters::StubAdapter;
use fleet_control::api::{self, ControlClient};
use fleet_control::config::ManagerConfig;
use fleet_control::jobs::{BatchRequest, EventType, JobStatus};
use fleet_control::manager::Manager;
use fleet_control::store::{Database, LibSqlBackend};
use fleet_control::worker::{Sandbox, WorkerRuntime};

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

struct Harness {
    base: String,
    db: Arc<dyn Database>,
    jobs: Arc<fleet_control::jobs::JobService>,
}

async fn start_server() -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let manager = Manager::build(db.clone(), ManagerConfig::default()).unwrap();
    let jobs = manager.state.jobs.clone();
    let app = api::routes(manager.state, &[]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Harness {
        base: format!("http://127.0.0.1:{port}"),
        db,
        jobs,
    }
}

fn worker(base: &str, id: &str, sandbox: &std::path::Path) -> WorkerRuntime {
    WorkerRuntime::new(
        id,
        ControlClient::new(base, Duration::from_secs(5)),
        Arc::new(StubAdapter),
        Sandbox::new(sandbox),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn worker_completes_assigned_job() {
    timeout(TEST_TIMEOUT, async {
        let h = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let runtime = worker(&h.base, "worker_a", dir.path());
        runtime.register().await.unwrap();

        let batch = h
            .jobs
            .create_batch(&BatchRequest {
                title: "Docs".into(),
                tasks: vec![json!({"description": "write the README for the widget crate"})],
                project_id: None,
            })
            .await
            .unwrap();
        let job_id = batch.job_ids[0];
        h.jobs.assign_manual(job_id, "worker_a").await.unwrap();

        assert_eq!(runtime.run_once().await.unwrap(), Some(job_id));

        let job = h.db.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());

        let artifacts = h.db.job_artifacts(job_id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_type, "result");
        assert!(
            artifacts[0].artifact["output"]
                .as_str()
                .unwrap()
                .contains("write the README")
        );

        let sandbox = Sandbox::new(dir.path());
        assert!(sandbox.workspace_path(job_id).join("result.txt").exists());
        assert!(sandbox.snapshot_path(job_id).exists());

        let events = h.db.job_events(job_id).await.unwrap();
        let report = events
            .iter()
            .find(|e| e.event_type == EventType::Completed)
            .unwrap();
        assert_eq!(report.details["success"], true);
        assert_eq!(report.details["details"]["worker"], "worker_a");

        // Nothing left for this identity.
        assert_eq!(runtime.run_once().await.unwrap(), None);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn worker_ignores_jobs_for_other_identities() {
    timeout(TEST_TIMEOUT, async {
        let h = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let runtime = worker(&h.base, "worker_a", dir.path()).with_server_side_filter(true);

        let batch = h
            .jobs
            .create_batch(&BatchRequest {
                title: "Other".into(),
                tasks: vec![json!({"description": "not yours"})],
                project_id: None,
            })
            .await
            .unwrap();
        h.jobs.assign_manual(batch.job_ids[0], "worker_b").await.unwrap();

        assert_eq!(runtime.run_once().await.unwrap(), None);
        let job = h.db.get_job(batch.job_ids[0]).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Assigned);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn worker_loop_stops_on_shutdown() {
    timeout(TEST_TIMEOUT, async {
        let h = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(worker(&h.base, "worker_a", dir.path()));
        let shutdown = fleet_control::shutdown::Shutdown::new();

        let handle = runtime.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.db.get_model("worker_a").await.unwrap().is_some());

        shutdown.trigger();
        handle.await.unwrap();
    })
    .await
    .expect("test timed out");
}

//! Executor and poller tests against an in-process mock control plane

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use kxagent::app::runtime::RuntimeConfig;
use kxagent::http::client::HttpClient;
use kxagent::storage::layout::StorageLayout;
use kxagent::update::executor::{CommandOutcome, InstalledBundle, UpdateExecutor};
use kxagent::update::fsm::UpdatePhase;
use kxagent::update::integrity::checksum_bytes;
use kxagent::workers::poller::Poller;

const DEVICE_ID: &str = "device-1";

#[derive(Clone, Default)]
struct MockPlane {
    bundles: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    results: Arc<Mutex<Vec<Value>>>,
    commands: Arc<Mutex<Vec<Value>>>,
    heartbeats: Arc<Mutex<Vec<Value>>>,
    reject_results: Arc<AtomicBool>,
}

async fn download(State(plane): State<MockPlane>, UrlPath(id): UrlPath<String>) -> Response {
    let bundle = plane.bundles.lock().unwrap().get(&id).cloned();
    match bundle {
        Some((name, bytes)) => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            )],
            bytes,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn result(
    State(plane): State<MockPlane>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<Value>,
) -> Response {
    if plane.reject_results.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    plane.results.lock().unwrap().push(body);
    Json(json!({"success": true, "deployment_id": id})).into_response()
}

async fn heartbeat(
    State(plane): State<MockPlane>,
    UrlPath(_id): UrlPath<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    plane.heartbeats.lock().unwrap().push(body);
    let commands: Vec<Value> = plane.commands.lock().unwrap().drain(..).collect();
    Json(json!({ "commands": commands }))
}

async fn start(plane: MockPlane) -> String {
    let app = Router::new()
        .route("/api/v1/bundles/{id}", get(download))
        .route("/api/v1/deployments/{id}/result", post(result))
        .route("/api/v1/devices/{id}/heartbeat", post(heartbeat))
        .with_state(plane);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/v1", addr)
}

fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn bundle_with_script(version: &str, script: &str) -> Vec<u8> {
    let manifest = json!({
        "version": version,
        "deploy": {"script": "sh install.sh"},
        "rollback": {"script": "sh revert.sh"}
    })
    .to_string();
    tarball(&[
        ("app/manifest.json", manifest.as_str()),
        ("app/install.sh", script),
        ("app/revert.sh", "echo rolled-back > rollback.txt"),
    ])
}

fn deploy_command(kind: &str, deployment_id: &str, version: &str, checksum: Option<String>) -> Value {
    let mut cmd = json!({
        "type": "deploy",
        "deployment_id": deployment_id,
        "bundle_id": format!("bundle-{}", version),
        "bundle_version": version,
    });
    if kind != "deploy" {
        cmd["kind"] = Value::String(kind.to_string());
    }
    if let Some(checksum) = checksum {
        cmd["checksum"] = Value::String(checksum);
    }
    cmd
}

struct Harness {
    plane: MockPlane,
    base_url: String,
    layout: StorageLayout,
    executor: UpdateExecutor,
    _tmp: tempfile::TempDir,
}

async fn harness() -> Harness {
    let plane = MockPlane::default();
    let base_url = start(plane.clone()).await;
    let tmp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(tmp.path());
    layout.setup().await.unwrap();

    let client = HttpClient::with_device_id(&base_url, DEVICE_ID.to_string()).unwrap();
    let executor = UpdateExecutor::new(client, layout.clone(), DEVICE_ID.to_string());
    Harness {
        plane,
        base_url,
        layout,
        executor,
        _tmp: tmp,
    }
}

impl Harness {
    fn publish(&self, version: &str, bytes: Vec<u8>) -> String {
        let checksum = checksum_bytes(&bytes);
        self.plane.bundles.lock().unwrap().insert(
            format!("bundle-{}", version),
            (format!("{}-bundle.tar.gz", version), bytes),
        );
        checksum
    }

    fn results(&self) -> Vec<Value> {
        self.plane.results.lock().unwrap().clone()
    }

    fn installed(&self, version: &str) -> std::path::PathBuf {
        self.layout.bundles_dir().path().join(version)
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap().trim().to_string()
}

#[tokio::test]
async fn test_deploy_installs_runs_script_and_reports_success() {
    let h = harness().await;
    let checksum = h.publish(
        "1.0.0",
        bundle_with_script("1.0.0", "echo $KERNEX_BUNDLE_VERSION > installed.txt"),
    );
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-1", "1.0.0", Some(checksum)), &mut config)
        .await;

    assert_eq!(
        outcome,
        CommandOutcome::Applied {
            version: "1.0.0".to_string()
        }
    );
    let installed = h.installed("1.0.0");
    assert_eq!(read(&installed.join("installed.txt")), "1.0.0");
    assert!(installed.join("manifest.json").exists());

    let current: InstalledBundle = h.layout.current_file().read_json().await.unwrap();
    assert_eq!(current.bundle_version, "1.0.0");
    assert_eq!(current.deployment_id, "dep-1");

    let results = h.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[0]["device_id"], DEVICE_ID);
    assert_eq!(results[0]["deployment_id"], "dep-1");

    // Scratch space is cleaned up
    assert!(h.layout.downloads_dir().entries().await.unwrap().is_empty());
    assert!(h.layout.staging_dir().entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_reports_failure_and_installs_nothing() {
    let h = harness().await;
    h.publish("1.0.0", bundle_with_script("1.0.0", "true"));
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(
            &deploy_command("deploy", "dep-1", "1.0.0", Some("0".repeat(64))),
            &mut config,
        )
        .await;

    match outcome {
        CommandOutcome::Failed { phase, message } => {
            assert_eq!(phase, UpdatePhase::Verifying);
            assert!(message.contains("Checksum mismatch"), "{}", message);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!h.installed("1.0.0").exists());
    assert!(!h.layout.current_file().exists().await);

    let results = h.results();
    assert_eq!(results[0]["status"], "failed");
    assert!(results[0]["error_message"]
        .as_str()
        .unwrap()
        .contains("Checksum mismatch"));
}

#[tokio::test]
async fn test_script_failure_is_reported() {
    let h = harness().await;
    let checksum = h.publish("2.0.0", bundle_with_script("2.0.0", "echo broken >&2; exit 4"));
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-2", "2.0.0", Some(checksum)), &mut config)
        .await;

    match outcome {
        CommandOutcome::Failed { phase, message } => {
            assert_eq!(phase, UpdatePhase::RunningScript);
            assert!(message.contains("code 4"), "{}", message);
            assert!(message.contains("broken"), "{}", message);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.results()[0]["status"], "failed");
}

#[tokio::test]
async fn test_script_failure_keeps_previous_install_current() {
    let h = harness().await;
    let good = h.publish("1.0.0", bundle_with_script("1.0.0", "true"));
    let bad = h.publish("2.0.0", bundle_with_script("2.0.0", "exit 4"));
    let mut config = RuntimeConfig::default();

    let first = h
        .executor
        .handle(&deploy_command("deploy", "dep-1", "1.0.0", Some(good)), &mut config)
        .await;
    assert!(matches!(first, CommandOutcome::Applied { .. }));

    let second = h
        .executor
        .handle(&deploy_command("deploy", "dep-2", "2.0.0", Some(bad)), &mut config)
        .await;
    assert!(matches!(second, CommandOutcome::Failed { .. }));

    let current: InstalledBundle = h.layout.current_file().read_json().await.unwrap();
    assert_eq!(current.bundle_version, "1.0.0");
    assert_eq!(current.deployment_id, "dep-1");
    assert!(h.installed("1.0.0").join("manifest.json").exists());
    assert!(!h.installed("2.0.0").exists());

    let results = h.results();
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[1]["status"], "failed");
}

#[tokio::test]
async fn test_failed_reinstall_restores_previous_tree() {
    let h = harness().await;
    let good = h.publish("1.0.0", bundle_with_script("1.0.0", "echo first > marker.txt"));
    let mut config = RuntimeConfig::default();
    h.executor
        .handle(&deploy_command("deploy", "dep-1", "1.0.0", Some(good)), &mut config)
        .await;
    assert_eq!(read(&h.installed("1.0.0").join("marker.txt")), "first");

    let bad = h.publish("1.0.0", bundle_with_script("1.0.0", "exit 2"));
    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-2", "1.0.0", Some(bad)), &mut config)
        .await;

    assert!(matches!(outcome, CommandOutcome::Failed { .. }));
    assert_eq!(read(&h.installed("1.0.0").join("marker.txt")), "first");
    let current: InstalledBundle = h.layout.current_file().read_json().await.unwrap();
    assert_eq!(current.deployment_id, "dep-1");
}

#[tokio::test]
async fn test_script_timeout_uses_configured_deploy_timeout() {
    let h = harness().await;
    let checksum = h.publish("3.0.0", bundle_with_script("3.0.0", "sleep 30"));
    let mut config = RuntimeConfig::default();
    config.deploy_timeout = Duration::from_secs(1);

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-3", "3.0.0", Some(checksum)), &mut config)
        .await;

    match outcome {
        CommandOutcome::Failed { message, .. } => {
            assert!(message.contains("Timed out"), "{}", message)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_rollback_runs_rollback_script() {
    let h = harness().await;
    let checksum = h.publish("1.0.0", bundle_with_script("1.0.0", "exit 1"));
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("rollback", "dep-4", "1.0.0", Some(checksum)), &mut config)
        .await;

    assert!(matches!(outcome, CommandOutcome::Applied { .. }));
    assert_eq!(read(&h.installed("1.0.0").join("rollback.txt")), "rolled-back");
    assert_eq!(h.results()[0]["status"], "success");
}

#[tokio::test]
async fn test_bundle_without_manifest_fails_validation() {
    let h = harness().await;
    let checksum = h.publish("1.0.0", tarball(&[("app/readme.txt", "no manifest here")]));
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-5", "1.0.0", Some(checksum)), &mut config)
        .await;

    match outcome {
        CommandOutcome::Failed { phase, message } => {
            assert_eq!(phase, UpdatePhase::Validating);
            assert!(message.contains("manifest.json"), "{}", message);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_bundle_fails_download() {
    let h = harness().await;
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-6", "9.9.9", None), &mut config)
        .await;

    assert!(matches!(
        outcome,
        CommandOutcome::Failed {
            phase: UpdatePhase::Downloading,
            ..
        }
    ));
    assert_eq!(h.results()[0]["status"], "failed");
}

#[tokio::test]
async fn test_report_failure_does_not_change_outcome() {
    let h = harness().await;
    let checksum = h.publish("1.0.0", bundle_with_script("1.0.0", "true"));
    h.plane.reject_results.store(true, Ordering::SeqCst);
    let mut config = RuntimeConfig::default();

    let outcome = h
        .executor
        .handle(&deploy_command("deploy", "dep-7", "1.0.0", Some(checksum)), &mut config)
        .await;

    assert!(matches!(outcome, CommandOutcome::Applied { .. }));
    assert!(h.installed("1.0.0").exists());
}

#[tokio::test]
async fn test_poll_once_executes_commands_in_order() {
    let h = harness().await;
    let checksum = h.publish("1.1.0", bundle_with_script("1.1.0", "true"));
    *h.plane.commands.lock().unwrap() = vec![
        json!({"type": "reboot"}),
        json!({"type": "deploy", "deployment_id": "dep-8"}),
        deploy_command("deploy", "dep-9", "1.1.0", Some(checksum)),
        json!({
            "type": "configure",
            "config_version": "2",
            "polling_interval": "15",
            "heartbeat_timeout": "10",
            "deploy_timeout": "120",
            "log_level": "DEBUG"
        }),
    ];

    let client = HttpClient::with_device_id(&h.base_url, DEVICE_ID.to_string()).unwrap();
    let executor = UpdateExecutor::new(client.clone(), h.layout.clone(), DEVICE_ID.to_string());
    let mut poller = Poller::new(
        client,
        executor,
        DEVICE_ID.to_string(),
        "0.1.0".to_string(),
        RuntimeConfig::default(),
    );

    let outcomes = poller.poll_once().await.unwrap();

    assert_eq!(outcomes.len(), 4);
    assert!(matches!(outcomes[0], CommandOutcome::Ignored { .. }));
    assert!(matches!(outcomes[1], CommandOutcome::Ignored { .. }));
    assert!(matches!(outcomes[2], CommandOutcome::Applied { .. }));
    assert_eq!(outcomes[3], CommandOutcome::Configured);

    assert_eq!(poller.config().polling_interval, Duration::from_secs(15));
    assert_eq!(poller.config().config_version.as_deref(), Some("2"));

    let heartbeats = h.plane.heartbeats.lock().unwrap().clone();
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0]["agent_version"], "0.1.0");
    assert!(heartbeats[0]["status"].is_string());

    // Only the well-formed deploy produced a report
    assert_eq!(h.results().len(), 1);
}

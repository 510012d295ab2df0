mod common;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::init_logger;
use remote_computer::{
    config::ProviderConfig,
    models::{ImageSpec, RunOptions, SharedDirectory, UpdateOptions, VmOutcome, VmState},
    provider::{LumeProvider, TransportIssue, VmProvider},
    ComputerError,
};
use serde_json::{json, Value};

/// Minimal in-process lume control plane.
#[derive(Default)]
struct Lume {
    vms: Mutex<HashMap<String, Value>>,
    bodies: Mutex<Vec<(String, Value)>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
    /// Status queries still answered with the placeholder address.
    unassigned_polls: AtomicU32,
}

type Shared = Arc<Lume>;

impl Lume {
    fn record(&self, action: &str, body: Value) {
        self.bodies.lock().unwrap().push((action.to_string(), body));
    }

    fn body(&self, action: &str) -> Option<Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(a, _)| a == action)
            .map(|(_, body)| body.clone())
    }
}

async fn list_vms(State(lume): State<Shared>) -> Json<Vec<Value>> {
    Json(lume.vms.lock().unwrap().values().cloned().collect())
}

async fn get_vm(
    State(lume): State<Shared>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    lume.queries.lock().unwrap().push(query);
    if name == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk full").into_response();
    }
    if name == "misplaced" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage location not found: /Volumes/ssd",
        )
            .into_response();
    }
    let vm = lume.vms.lock().unwrap().get(&name).cloned();
    match vm {
        Some(mut vm) => {
            let pending = lume
                .unassigned_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if pending {
                vm["ipAddress"] = json!("0.0.0.0");
            }
            Json(vm).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            format!("Virtual machine not found: {name}"),
        )
            .into_response(),
    }
}

async fn run_vm(
    State(lume): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if body["cpu"] == json!(0) {
        return (StatusCode::BAD_REQUEST, "cpu must be positive").into_response();
    }
    lume.record("run", body);
    lume.vms.lock().unwrap().insert(
        name.clone(),
        json!({"name": name, "status": "running", "ipAddress": "192.168.64.9", "cpu": 4}),
    );
    Json(json!({"message": "VM started"})).into_response()
}

async fn stop_vm(
    State(lume): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    lume.record("stop", body);
    if let Some(vm) = lume.vms.lock().unwrap().get_mut(&name) {
        vm["status"] = json!("stopped");
    }
    StatusCode::OK
}

async fn update_vm(State(lume): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lume.record("update", body);
    Json(json!({"message": "updated"}))
}

async fn pull(State(lume): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lume.record("pull", body);
    Json(json!({"message": "pulled"}))
}

async fn serve(lume: Shared, storage: Option<&str>) -> LumeProvider {
    let app = Router::new()
        .route("/lume/vms", get(list_vms))
        .route("/lume/vms/:name", get(get_vm))
        .route("/lume/vms/:name/run", post(run_vm))
        .route("/lume/vms/:name/stop", post(stop_vm))
        .route("/lume/vms/:name/update", post(update_vm))
        .route("/lume/pull", post(pull))
        .with_state(lume);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let config = ProviderConfig {
        host: "127.0.0.1".to_string(),
        port,
        storage: storage.map(str::to_string),
        ..ProviderConfig::default()
    };
    LumeProvider::new(&config).unwrap()
}

#[tokio::test]
async fn missing_vm_is_reported_as_not_found() {
    init_logger();
    let provider = serve(Arc::default(), None).await;
    let status = provider.get_vm("nope").await.unwrap();
    assert_eq!(status.status, VmState::NotFound);
    assert_eq!(status.name, "nope");
}

#[tokio::test]
async fn unreachable_api_is_an_unknown_status_not_an_error() {
    // grab a free port, then close it so nothing listens there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ProviderConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ProviderConfig::default()
    };
    let provider = LumeProvider::new(&config).unwrap();

    let status = provider.get_vm("booting").await.unwrap();
    assert_eq!(status.status, VmState::Unknown);
    assert_eq!(
        status.detail.as_deref(),
        Some(TransportIssue::ConnectionRefused.hint())
    );

    // mutations cannot pretend to have happened
    assert!(matches!(
        provider.stop_vm("booting").await,
        Err(ComputerError::Provider(_))
    ));
}

#[tokio::test]
async fn server_errors_become_an_error_status() {
    let provider = serve(Arc::default(), None).await;
    let status = provider.get_vm("broken").await.unwrap();
    assert_eq!(status.status, VmState::Error);
    assert!(status.detail.unwrap().contains("disk full"));
}

#[tokio::test]
async fn not_found_in_an_error_body_is_still_an_error() {
    let provider = serve(Arc::default(), None).await;
    let status = provider.get_vm("misplaced").await.unwrap();
    assert_eq!(status.status, VmState::Error);
    let detail = status.detail.unwrap();
    assert!(detail.contains("500"), "{detail}");
    assert!(detail.contains("storage location not found"), "{detail}");
}

#[tokio::test]
async fn names_with_reserved_characters_reach_the_right_vm() {
    let lume: Shared = Arc::default();
    let provider = serve(lume.clone(), None).await;

    provider.run_vm("team/mac?x#y", &RunOptions::default()).await.unwrap();
    assert!(lume.vms.lock().unwrap().contains_key("team/mac?x#y"));

    let status = provider.get_vm("team/mac?x#y").await.unwrap();
    assert_eq!(status.status, VmState::Running);
}

#[tokio::test]
async fn run_then_poll_for_an_address() {
    let lume: Shared = Arc::default();
    let provider = serve(lume.clone(), None).await;
    let shared = tempfile::tempdir().unwrap();

    let options = RunOptions {
        memory_mb: 16384,
        display: Some("1920x1080".into()),
        shared_directories: vec![
            SharedDirectory::new(shared.path()),
            SharedDirectory::new(shared.path().join("missing")),
        ],
        ..RunOptions::default()
    };
    let outcome = provider.run_vm("mac", &options).await.unwrap();
    assert_eq!(outcome, VmOutcome::Completed(json!({"message": "VM started"})));

    let body = lume.body("run").unwrap();
    assert_eq!(body["memory"], json!("16384MB"));
    assert_eq!(body["cpu"], json!(4));
    assert_eq!(body["display"], json!("1920x1080"));
    assert_eq!(body["sharedDirectories"].as_array().unwrap().len(), 1);

    lume.unassigned_polls.store(2, Ordering::SeqCst);
    let ip = provider
        .get_ip("mac", Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(ip, "192.168.64.9");
    assert_eq!(lume.queries.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn rejected_run_is_an_error() {
    let provider = serve(Arc::default(), None).await;
    let options = RunOptions {
        cpu: 0,
        ..RunOptions::default()
    };
    match provider.run_vm("mac", &options).await.unwrap_err() {
        ComputerError::Provider(message) => assert!(message.contains("cpu must be positive")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn storage_location_is_passed_along() {
    let lume: Shared = Arc::default();
    let provider = serve(lume.clone(), Some("ssd")).await;

    provider.get_vm("mac").await.unwrap();
    assert_eq!(
        lume.queries.lock().unwrap()[0].get("storage").map(String::as_str),
        Some("ssd")
    );

    provider.stop_vm("mac").await.unwrap();
    assert_eq!(lume.body("stop").unwrap(), json!({"storage": "ssd"}));
}

#[tokio::test]
async fn update_and_pull_bodies() {
    let lume: Shared = Arc::default();
    let provider = serve(lume.clone(), None).await;

    let update = UpdateOptions {
        cpu: Some(8),
        memory_mb: Some(4096),
        ..UpdateOptions::default()
    };
    assert!(provider.update_vm("mac", &update).await.unwrap().is_supported());
    assert_eq!(lume.body("update").unwrap(), json!({"cpu": 8, "memory": "4096MB"}));

    let image = ImageSpec {
        image: "macos-sequoia-cua:latest".into(),
        registry: "ghcr.io".into(),
        organization: "trycua".into(),
    };
    provider.pull_image("mac", &image).await.unwrap();
    assert_eq!(
        lume.body("pull").unwrap(),
        json!({
            "image": "macos-sequoia-cua:latest",
            "name": "mac",
            "registry": "ghcr.io",
            "organization": "trycua"
        })
    );
}

#[tokio::test]
async fn list_returns_every_vm() {
    let lume: Shared = Arc::default();
    let provider = serve(lume.clone(), None).await;
    provider.run_vm("a", &RunOptions::default()).await.unwrap();
    provider.run_vm("b", &RunOptions::default()).await.unwrap();

    let mut names: Vec<String> = provider
        .list_vms()
        .await
        .unwrap()
        .into_iter()
        .map(|vm| vm.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}

//! End-to-end tests against a real `device_manager::start` instance,
//! talking to it the way any client would: over its Unix socket and its
//! HTTP status sidecar.

use std::sync::Mutex;

use device_client::{ClientOptions, DeviceClient};
use device_manager::config::Config;
use serde_json::json;

// `DeviceContext::open_exclusive` enforces a process-wide singleton; these
// tests each start a real manager instance, so they must not run
// concurrently within this test binary.
static INSTANCE_LOCK: Mutex<()> = Mutex::new(());

async fn start_test_manager(http_port: u16) -> (device_manager::Handle, std::path::PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("device-manager.sock");
    let mut config = Config::default();
    config.socket_path = socket_path.clone();
    config.http_bind = Some(format!("127.0.0.1:{http_port}").parse().unwrap());

    let handle = device_manager::start(config).await.unwrap();
    (handle, socket_path, dir)
}

#[tokio::test]
async fn ping_and_status_round_trip() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18081).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    let pong = client.ping().await.unwrap();
    assert_eq!(pong["status"], json!("ok"));
    assert_eq!(pong["device_id"], json!("sim-hailo-0"));

    let status = client.status().await.unwrap();
    assert_eq!(status["device_id"], json!("sim-hailo-0"));
    assert_eq!(status["queue_depth"], json!(0));

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn device_status_reports_device_identity_and_networks() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18088).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    client.load_model("/models/a.bin", Some("echo".to_string()), None).await.unwrap();

    let status = client.device_status().await.unwrap();
    assert_eq!(status["device"]["device_id"], json!("sim-hailo-0"));
    assert!(status["device"]["architecture"].is_string());
    assert_eq!(status["networks"]["a.bin"]["model_type"], json!("echo"));

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn load_infer_unload_lifecycle_over_the_socket() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18082).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();

    client.load_model("/models/a.bin", Some("echo".to_string()), None).await.unwrap();
    let out = client
        .infer("/models/a.bin", Some("echo".to_string()), None, json!({"x": 7}))
        .await
        .unwrap();
    assert_eq!(out["result"], json!({"x": 7}));
    assert!(out["inference_time_ms"].is_number());

    let status = client.status().await.unwrap();
    assert_eq!(status["loaded_models"].as_array().unwrap().len(), 1);

    client.unload_model("/models/a.bin", Some("echo".to_string())).await.unwrap();
    let status = client.status().await.unwrap();
    assert!(status["loaded_models"].as_array().unwrap().is_empty());

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn loading_an_already_loaded_model_is_idempotent() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18089).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    let first = client.load_model("/models/a.bin", Some("echo".to_string()), None).await.unwrap();
    let second = client.load_model("/models/a.bin", Some("echo".to_string()), None).await.unwrap();
    assert_eq!(first["message"], json!("Model loaded"));
    assert_eq!(second["message"], json!("Model already loaded"));

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn infer_against_a_model_that_was_never_loaded_auto_loads_it() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18083).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    let out = client
        .infer("/models/never-loaded.bin", Some("echo".to_string()), None, json!(null))
        .await
        .unwrap();
    assert_eq!(out["status"], json!("ok"));

    let status = client.status().await.unwrap();
    assert_eq!(status["loaded_models"].as_array().unwrap().len(), 1);

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn two_clients_can_use_the_socket_concurrently() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18084).await;

    let client_a = DeviceClient::connect(socket_path.clone(), ClientOptions::default()).await.unwrap();
    let client_b = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();

    let (a, b) = tokio::join!(client_a.ping(), client_b.ping());
    assert_eq!(a.unwrap()["status"], json!("ok"));
    assert_eq!(b.unwrap()["status"], json!("ok"));

    client_a.disconnect().await;
    client_b.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn status_sidecar_serves_the_device_status_snapshot_over_http() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, socket_path, _dir) = start_test_manager(18085).await;

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    client.load_model("/models/a.bin", Some("echo".to_string()), None).await.unwrap();

    // Give the sidecar's own runtime a moment to start accepting.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let body = reqwest::get("http://127.0.0.1:18085/v1/device/status")
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["device"]["device_id"], json!("sim-hailo-0"));
    assert_eq!(status["networks"]["a.bin"]["model_type"], json!("echo"));

    let not_found = reqwest::get("http://127.0.0.1:18085/v1/unknown").await.unwrap();
    assert_eq!(not_found.status().as_u16(), 404);

    client.disconnect().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_the_device_for_a_fresh_instance() {
    let _guard = INSTANCE_LOCK.lock().unwrap();
    let (handle, _socket_path, _dir) = start_test_manager(18086).await;
    handle.shutdown().await;

    // The device was released; a brand new instance can open it again.
    let (handle2, socket_path2, _dir2) = start_test_manager(18087).await;
    let client = DeviceClient::connect(socket_path2, ClientOptions::default()).await.unwrap();
    assert_eq!(client.ping().await.unwrap()["status"], json!("ok"));
    client.disconnect().await;
    handle2.shutdown().await;
}

//! Exercises `DeviceClient::connect`'s retry loop against a listener that
//! only starts accepting after a short delay, the way a freshly-started
//! device manager would still be binding its socket when a client first
//! tries to reach it.

use std::time::Duration;

use device_client::{ClientOptions, DeviceClient};
use tokio::net::UnixListener;

#[tokio::test]
async fn connect_succeeds_once_the_listener_catches_up() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("delayed.sock");
    let bind_path = socket_path.clone();

    let listener_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let listener = UnixListener::bind(&bind_path).unwrap();
        listener.accept().await.unwrap();
    });

    let client = DeviceClient::connect(socket_path, ClientOptions::default()).await.unwrap();
    client.disconnect().await;
    listener_task.await.unwrap();
}

#[tokio::test]
async fn connect_gives_up_after_three_attempts_against_a_socket_that_never_appears() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("never-appears.sock");

    let started = std::time::Instant::now();
    let err = DeviceClient::connect(socket_path.clone(), ClientOptions::default())
        .await
        .unwrap_err();

    // Three attempts with 0.25s/0.5s backoff between the first two retries:
    // the failure should take a noticeable fraction of a second, not be
    // instantaneous, confirming the backoff actually ran.
    assert!(started.elapsed() >= Duration::from_millis(700));
    assert!(matches!(err, device_client::ClientError::NotFound { path } if path == socket_path));
}

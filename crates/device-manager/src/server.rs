//! Unix domain socket connection server: accepts concurrently, enqueues
//! every request onto the single request queue, and writes back whatever
//! the worker returns. Framing and dispatch concerns are kept separate so
//! this module is purely about connection lifecycle.

use std::sync::Arc;

use device_core::framing::{self, FramingError};
use device_core::protocol::{protocol_error_response, WireRequest};
use device_core::worker::{Request, RequestQueue};
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logging;

/// Accept connections until `shutdown` fires, spawning one task per
/// connection. Returns once the listener stops accepting, after which any
/// still-running connection tasks are left to drain on their own.
pub async fn run(
    listener: UnixListener,
    queue: RequestQueue,
    max_frame_bytes: u32,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(event = "connection_server_stopping", "no longer accepting new connections");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let queue = queue.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(handle_connection(stream, queue, max_frame_bytes, shutdown));
                    }
                    Err(error) => {
                        tracing::warn!(event = "accept_failed", error = %error, "failed to accept connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    queue: RequestQueue,
    max_frame_bytes: u32,
    shutdown: CancellationToken,
) {
    let connection_id = Uuid::new_v4().to_string();
    logging::connection::accepted(&connection_id);
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                logging::connection::closed(&connection_id, "server_shutdown");
                break;
            }
            frame = framing::read_frame(&mut reader, max_frame_bytes) => frame,
        };

        let text = match frame {
            Ok(None) => {
                logging::connection::closed(&connection_id, "client_eof");
                break;
            }
            Ok(Some(text)) => text,
            Err(error) => {
                logging::connection::protocol_error(&connection_id, &error.to_string());
                let response = framing_error_response(&error);
                let _ = send(&mut writer, &response).await;
                break;
            }
        };

        let response = process_frame(&text, &queue).await;
        if send(&mut writer, &response).await.is_err() {
            logging::connection::closed(&connection_id, "write_failed");
            break;
        }
    }
}

async fn process_frame(text: &str, queue: &RequestQueue) -> Value {
    let wire_request: WireRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(error) => {
            let request_id = recover_request_id(text);
            logging::errors::request_validation(request_id.as_deref().unwrap_or(""), &error.to_string());
            return protocol_error_response(request_id, format!("invalid request: {error}"));
        }
    };

    let wire_request_id = wire_request.request_id;
    let internal_id = wire_request_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let request = Request {
        request_id: internal_id,
        action: wire_request.action.into(),
    };

    match queue.enqueue(request).await {
        Ok(response) => device_core::protocol::build_response(wire_request_id, response.result),
        Err(_closed) => protocol_error_response(wire_request_id, "server is shutting down"),
    }
}

fn recover_request_id(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("request_id")?.as_str().map(str::to_string)
}

fn framing_error_response(error: &FramingError) -> Value {
    protocol_error_response(None, error.to_string())
}

async fn send(writer: &mut (impl tokio::io::AsyncWrite + Unpin), response: &Value) -> Result<(), FramingError> {
    let payload = serde_json::to_string(response).expect("response value always serializes");
    framing::write_frame(writer, &payload).await
}

/// Bind the Unix socket at `path`, removing a stale socket file left behind
/// by an unclean shutdown, then apply the configured group and mode.
pub fn bind_socket(
    path: &std::path::Path,
    group: Option<&str>,
    mode: u32,
) -> anyhow::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;

    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;

    if let Some(group_name) = group {
        apply_socket_group(path, group_name)?;
    }

    Ok(listener)
}

fn apply_socket_group(path: &std::path::Path, group_name: &str) -> anyhow::Result<()> {
    let result = apply_socket_group_inner(path, group_name);
    if let Err(error) = &result {
        logging::errors::socket_permission_failed(&path.to_string_lossy(), &error.to_string());
    }
    result
}

fn apply_socket_group_inner(path: &std::path::Path, group_name: &str) -> anyhow::Result<()> {
    let group = nix::unistd::Group::from_name(group_name)?
        .ok_or_else(|| anyhow::anyhow!("unix group {group_name:?} does not exist"))?;
    nix::unistd::chown(path, None, Some(group.gid))?;
    Ok(())
}

pub struct SocketGuard(Arc<std::path::PathBuf>);

impl SocketGuard {
    pub fn new(path: std::path::PathBuf) -> Self {
        Self(Arc::new(path))
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.0.as_ref());
    }
}

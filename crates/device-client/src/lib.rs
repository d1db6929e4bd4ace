//! Client library for the device manager's Unix domain socket protocol:
//! connect-with-retry, one request in flight at a time, and a scoped
//! acquisition helper that guarantees disconnection on every exit path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use device_core::framing::{self, CLIENT_MAX_FRAME_BYTES};
use device_core::protocol::{WireAction, WireRequest};
use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use uuid::Uuid;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF_UNIT: Duration = Duration::from_millis(250);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no device manager is listening at {path}")]
    NotFound { path: PathBuf },
    #[error("failed to connect to {path} after {attempts} attempts: {source}")]
    ConnectFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("client is not connected")]
    NotConnected,
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] framing::FramingError),
    #[error("server closed the connection without a response")]
    ConnectionClosed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("response request_id did not match the request")]
    RequestIdMismatch,
    #[error("server returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("server returned an error: {0}")]
    Server(String),
}

pub struct ClientOptions {
    pub request_timeout: Duration,
    pub max_frame_bytes: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_bytes: CLIENT_MAX_FRAME_BYTES,
        }
    }
}

/// A connection to a device manager. Every public call serializes through an
/// internal lock, matching the single request-in-flight protocol the server
/// expects from each connection.
pub struct DeviceClient {
    socket_path: PathBuf,
    options: ClientOptions,
    stream: Mutex<Option<UnixStream>>,
}

impl DeviceClient {
    /// Connect with up to three attempts, backing off `0.25s * attempt`
    /// between tries. A missing socket file is reported distinctly from
    /// other connection failures since it usually means the manager hasn't
    /// started yet rather than a transient error.
    pub async fn connect(socket_path: impl Into<PathBuf>, options: ClientOptions) -> Result<Self, ClientError> {
        let socket_path = socket_path.into();
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => {
                    return Ok(Self {
                        socket_path,
                        options,
                        stream: Mutex::new(Some(stream)),
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    if attempt == CONNECT_ATTEMPTS {
                        return Err(ClientError::NotFound { path: socket_path });
                    }
                    last_error = Some(error);
                }
                Err(error) => {
                    if attempt == CONNECT_ATTEMPTS {
                        return Err(ClientError::ConnectFailed {
                            path: socket_path,
                            attempts: CONNECT_ATTEMPTS,
                            source: error,
                        });
                    }
                    last_error = Some(error);
                }
            }
            tokio::time::sleep(CONNECT_BACKOFF_UNIT * attempt).await;
        }

        // Unreachable: the loop above always returns by the last attempt.
        Err(ClientError::ConnectFailed {
            path: socket_path,
            attempts: CONNECT_ATTEMPTS,
            source: last_error.expect("at least one connection attempt was made"),
        })
    }

    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.send(WireAction::Ping).await
    }

    pub async fn status(&self) -> Result<Value, ClientError> {
        self.send(WireAction::Status).await
    }

    /// Extended status: device identity/telemetry plus the loaded-model
    /// table keyed by filename.
    pub async fn device_status(&self) -> Result<Value, ClientError> {
        self.send(WireAction::DeviceStatus).await
    }

    pub async fn load_model(
        &self,
        model_path: impl Into<String>,
        model_type: Option<String>,
        model_params: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.send(WireAction::LoadModel {
            model_path: Some(model_path.into()),
            model_type,
            model_params,
        })
        .await
    }

    pub async fn infer(
        &self,
        model_path: impl Into<String>,
        model_type: Option<String>,
        model_params: Option<Value>,
        input_data: Value,
    ) -> Result<Value, ClientError> {
        self.send(WireAction::Infer {
            model_path: Some(model_path.into()),
            model_type,
            model_params,
            input_data: Some(input_data),
        })
        .await
    }

    pub async fn unload_model(
        &self,
        model_path: impl Into<String>,
        model_type: Option<String>,
    ) -> Result<Value, ClientError> {
        self.send(WireAction::UnloadModel {
            model_path: Some(model_path.into()),
            model_type,
        })
        .await
    }

    async fn send(&self, action: WireAction) -> Result<Value, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let request = WireRequest {
            request_id: Some(request_id.clone()),
            action,
        };
        let payload = serde_json::to_string(&request).expect("WireRequest always serializes");

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ClientError::NotConnected)?;

        framing::write_frame(stream, &payload).await?;

        let frame = tokio::time::timeout(
            self.options.request_timeout,
            framing::read_frame(stream, self.options.max_frame_bytes),
        )
        .await
        .map_err(|_| ClientError::Timeout(self.options.request_timeout))??;

        let text = frame.ok_or(ClientError::ConnectionClosed)?;
        let body: Value = serde_json::from_str(&text).map_err(|e| ClientError::MalformedResponse(e.to_string()))?;

        match body.get("request_id").and_then(Value::as_str) {
            Some(echoed) if echoed == request_id => {}
            Some(_) => return Err(ClientError::RequestIdMismatch),
            None => {}
        }

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(ClientError::Server(error.to_string()));
        }

        Ok(body)
    }

    /// Scoped-acquisition helper: connect, run `body`, and disconnect
    /// afterward regardless of whether `body` succeeded. The idiomatic
    /// stand-in for `async with ... as client:`.
    pub async fn scoped<F, Fut, T>(
        socket_path: impl Into<PathBuf>,
        options: ClientOptions,
        body: F,
    ) -> Result<T, ClientError>
    where
        F: FnOnce(&DeviceClient) -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        with_connection(socket_path, options, body).await
    }

    /// Close the connection. Safe to call more than once; later calls are a
    /// no-op.
    pub async fn disconnect(&self) {
        let mut guard = self.stream.lock().await;
        if guard.take().is_some() {
            tracing::debug!(event = "client_disconnected", socket_path = %self.socket_path.display());
        }
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        // Backstop: if `disconnect` was never called, the stream still
        // closes here because `UnixStream`'s own `Drop` closes the fd. This
        // impl exists only to make that guarantee explicit and to log it.
        if let Ok(guard) = self.stream.try_lock() {
            if guard.is_some() {
                tracing::debug!(event = "client_dropped_without_disconnect", socket_path = %self.socket_path.display());
            }
        }
    }
}

/// Scoped-acquisition helper: connect, run `body`, and disconnect
/// afterward regardless of whether `body` succeeded, matching the
/// guaranteed-release semantics of an async context manager.
pub async fn with_connection<F, Fut, T>(
    socket_path: impl Into<PathBuf>,
    options: ClientOptions,
    body: F,
) -> Result<T, ClientError>
where
    F: FnOnce(&DeviceClient) -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let client = DeviceClient::connect(socket_path, options).await?;
    let result = body(&client).await;
    client.disconnect().await;
    result
}

/// Convenience constructor mirroring the common case of default options.
pub async fn create_client(socket_path: impl AsRef<Path>) -> Result<DeviceClient, ClientError> {
    DeviceClient::connect(socket_path.as_ref().to_path_buf(), ClientOptions::default()).await
}

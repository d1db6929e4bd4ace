//! device-manager library crate: configuration, logging, the connection
//! server and the HTTP status sidecar, plus the top-level `run` that wires
//! them together. Split out from `main.rs` so integration tests can drive
//! a real instance in-process.

use std::sync::Arc;

use device_core::device::DeviceContext;
use device_core::handler::HandlerAdapter;
use device_core::handlers::{ClipStubHandler, EchoHandler};
use device_core::models::ModelTable;
use device_core::worker::{spawn_queue, ManagerState, RequestQueue};
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod server;
pub mod sidecar;

use config::Config;

/// Default embedding width for the bundled CLIP stub handler.
const CLIP_STUB_EMBEDDING_DIM: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open accelerator: {0}")]
    Device(#[from] device_core::device::DeviceError),
    #[error("failed to bind socket: {0}")]
    Socket(#[source] anyhow::Error),
}

/// Everything a running instance needs to be shut down cleanly.
pub struct Handle {
    pub queue: RequestQueue,
    pub shutdown: CancellationToken,
    server_task: tokio::task::JoinHandle<()>,
    socket_guard: server::SocketGuard,
    manager: Arc<ManagerState>,
}

impl Handle {
    /// Stop accepting new connections, let in-flight requests drain, unload
    /// every loaded model in reverse order, then release the device.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server_task.await;

        for (key, result) in self.manager.models.unload_all().await {
            match result {
                Ok(()) => logging::model::unloaded(&key.model_type, &key.model_path),
                Err(error) => logging::model::unload_failed(&key.model_type, &key.model_path, &error.to_string()),
            }
        }

        drop(self.socket_guard);
        logging::lifecycle::shutdown_complete();
    }
}

/// Build the handler registry bundled with this daemon.
fn build_model_table() -> ModelTable {
    let handlers = vec![
        HandlerAdapter::new(EchoHandler),
        HandlerAdapter::new(ClipStubHandler::new(CLIP_STUB_EMBEDDING_DIM)),
    ];
    ModelTable::new(handlers)
}

/// Open the device, bind the socket and the HTTP sidecar, and start serving.
/// Returns a [`Handle`] the caller uses to shut the instance down.
pub async fn start(config: Config) -> Result<Handle, StartupError> {
    let device = match DeviceContext::open_exclusive(config.device_group_id) {
        Ok(device) => {
            logging::lifecycle::device_opened(&device.id().0);
            device
        }
        Err(error) => {
            logging::lifecycle::device_open_failed(&error.to_string());
            return Err(StartupError::Device(error));
        }
    };

    let models = build_model_table();
    let manager = Arc::new(ManagerState::new(
        device,
        models,
        config.default_model_type.clone(),
        config.socket_path.to_string_lossy().into_owned(),
    ));

    let (queue, worker) = spawn_queue(manager.clone());
    tokio::spawn(worker);

    let listener = server::bind_socket(&config.socket_path, config.socket_group.as_deref(), config.socket_mode)
        .map_err(StartupError::Socket)?;
    logging::lifecycle::socket_bound(&config.socket_path.to_string_lossy());
    let socket_guard = server::SocketGuard::new(config.socket_path.clone());

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server::run(
        listener,
        queue.clone(),
        config.max_frame_bytes,
        shutdown.clone(),
    ));

    match config.http_bind {
        Some(address) => {
            sidecar::spawn(address, manager.clone(), queue.clone());
        }
        None => logging::lifecycle::http_sidecar_disabled(),
    }

    Ok(Handle {
        queue,
        shutdown,
        server_task,
        socket_guard,
        manager,
    })
}

//! Structured logging, one thin wrapper per event type. Every wrapper emits
//! exactly one `tracing` call tagged with an `event` field so downstream log
//! processors can filter on event type rather than parsing message text.

pub mod lifecycle {
    pub fn server_startup(binary: &str, version: &str) {
        tracing::info!(event = "server_startup", binary, version, "device manager starting");
    }

    pub fn device_opened(device_id: &str) {
        tracing::info!(event = "device_opened", device_id, "accelerator opened exclusively");
    }

    pub fn device_open_failed(error: &str) {
        tracing::error!(event = "device_open_failed", error, "failed to open accelerator");
    }

    pub fn socket_bound(socket_path: &str) {
        tracing::info!(event = "socket_bound", socket_path, "listening for client connections");
    }

    pub fn http_sidecar_bound(address: &str) {
        tracing::info!(event = "http_sidecar_bound", address, "status sidecar listening");
    }

    pub fn http_sidecar_disabled() {
        tracing::info!(event = "http_sidecar_disabled", "status sidecar disabled by configuration");
    }

    pub fn config_loaded(config_path: Option<&str>) {
        match config_path {
            Some(path) => tracing::info!(event = "config_loaded", config_path = path, "configuration loaded"),
            None => tracing::info!(event = "config_loaded", "using built-in default configuration"),
        }
    }

    pub fn server_shutdown(signal: &str) {
        tracing::info!(event = "server_shutdown", signal, "shutting down");
    }

    pub fn shutdown_complete() {
        tracing::info!(event = "shutdown_complete", "all models unloaded, device released");
    }
}

pub mod connection {
    pub fn accepted(connection_id: &str) {
        tracing::info!(event = "connection_accepted", connection_id, "client connected");
    }

    pub fn closed(connection_id: &str, reason: &str) {
        tracing::info!(event = "connection_closed", connection_id, reason, "client disconnected");
    }

    pub fn protocol_error(connection_id: &str, error: &str) {
        tracing::warn!(event = "connection_protocol_error", connection_id, error, "malformed frame from client");
    }
}

pub mod model {
    //! Per-model events surface here only for shutdown-time unloads; the
    //! load/infer/unload path itself is logged by `device_core::models`,
    //! which is the crate that actually holds the model table.
    pub fn unloaded(model_type: &str, model_path: &str) {
        tracing::info!(event = "model_unloaded", model_type, model_path, "model unloaded");
    }

    pub fn unload_failed(model_type: &str, model_path: &str, error: &str) {
        tracing::error!(event = "model_unload_failed", model_type, model_path, error, "model unload failed");
    }
}

pub mod errors {
    pub fn request_validation(request_id: &str, error: &str) {
        tracing::warn!(event = "request_validation_failed", request_id, error, "rejected malformed request");
    }

    pub fn socket_permission_failed(socket_path: &str, error: &str) {
        tracing::error!(
            event = "socket_permission_failed",
            socket_path,
            error,
            "failed to set socket ownership or mode"
        );
    }
}

/// Install the global `tracing` subscriber. Honors `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

//! Startup and shutdown orchestration: wait for SIGTERM/SIGINT, then tear
//! the running instance down in the documented order (stop accepting,
//! unload models in reverse insertion order, release the device, unlink the
//! socket).

use crate::logging;
use crate::Handle;

/// Block until SIGTERM or SIGINT arrives, then run `handle`'s teardown.
pub async fn run_until_shutdown(handle: Handle) {
    let signal = wait_for_signal().await;
    logging::lifecycle::server_shutdown(signal);
    handle.shutdown().await;
}

async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

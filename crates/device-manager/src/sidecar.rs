//! Read-only HTTP status sidecar. Runs on its own OS thread with its own
//! single-threaded Tokio runtime so a slow or stuck HTTP client can never
//! delay the request queue, which lives on the main runtime.

use std::net::SocketAddr;
use std::sync::Arc;

use device_core::worker::{ManagerState, RequestQueue};
use salvo::affix_state;
use salvo::http::StatusCode;
use salvo::prelude::*;

use crate::logging;

#[derive(Clone)]
struct SidecarState {
    manager: Arc<ManagerState>,
    queue: RequestQueue,
}

#[handler]
async fn status_handler(depot: &mut Depot) -> Json<serde_json::Value> {
    let state = depot
        .obtain::<SidecarState>()
        .expect("sidecar state is always injected before routing");
    let depth = state.queue.current_depth();
    let snapshot = device_core::status::device_status_snapshot(&state.manager, depth).await;
    Json(snapshot.to_json())
}

#[handler]
async fn not_found_handler(res: &mut Response) {
    res.status_code(StatusCode::NOT_FOUND);
    res.render(Json(serde_json::json!({"error": "Not found"})));
}

/// Spawn the sidecar on a dedicated thread and return its join handle. The
/// thread runs until the process exits; there is no graceful-shutdown path
/// for the sidecar since it holds no exclusive resources to release.
pub fn spawn(address: SocketAddr, manager: Arc<ManagerState>, queue: RequestQueue) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("device-http".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build sidecar runtime");

            runtime.block_on(async move {
                let state = SidecarState { manager, queue };
                let router = Router::new()
                    .hoop(affix_state::inject(state))
                    .push(Router::with_path("v1/device/status").get(status_handler))
                    .push(Router::with_path("<**rest>").goal(not_found_handler));

                let acceptor = TcpListener::new(address).bind().await;
                logging::lifecycle::http_sidecar_bound(&address.to_string());
                Server::new(acceptor).serve(router).await;
            });
        })
        .expect("failed to spawn device-http thread")
}

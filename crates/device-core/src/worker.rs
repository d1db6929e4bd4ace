//! The request queue and single-lane worker.
//!
//! Every connection enqueues requests onto one `flume` channel; exactly one
//! worker task drains it and awaits each dispatch to completion before
//! pulling the next item. This is the core serialization guarantee: two
//! model calls never run concurrently against the device, regardless of how
//! many clients are connected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::device::DeviceContext;
use crate::models::{LoadOutcome, ModelKey, ModelTable, ModelTableError, UnloadOutcome};

/// The action a client request asks the worker to perform. Mirrors the
/// manager's lifecycle and inference surface one-to-one.
#[derive(Debug, Clone)]
pub enum Action {
    Ping,
    Status,
    DeviceStatus,
    LoadModel {
        model_path: Option<String>,
        model_type: Option<String>,
        model_params: Option<Value>,
    },
    Infer {
        model_path: Option<String>,
        model_type: Option<String>,
        model_params: Option<Value>,
        input_data: Option<Value>,
    },
    UnloadModel {
        model_path: Option<String>,
        model_type: Option<String>,
    },
}

/// `request_id` is always populated by the time a `Request` reaches the
/// worker: an absent wire `request_id` is synthesized by the server before
/// enqueueing (see `device-manager::server::process_frame`), purely for
/// internal correlation in logs. Whether to echo it back over the wire is a
/// separate decision the server makes from the original wire request.
#[derive(Debug)]
pub struct Request {
    pub request_id: String,
    pub action: Action,
}

#[derive(Debug)]
pub struct Response {
    pub request_id: String,
    pub result: Result<Value, String>,
}

struct WorkItem {
    request: Request,
    reply: oneshot::Sender<Response>,
}

/// Shared state dispatch operates on: the exclusively-held device, the
/// table of models currently loaded on it, and the configuration values
/// dispatch needs to apply defaults or echo back in status payloads.
pub struct ManagerState {
    pub device: DeviceContext,
    pub models: ModelTable,
    pub started_at: std::time::Instant,
    pub default_model_type: String,
    pub socket_path: String,
}

impl ManagerState {
    pub fn new(
        device: DeviceContext,
        models: ModelTable,
        default_model_type: impl Into<String>,
        socket_path: impl Into<String>,
    ) -> Self {
        Self {
            device,
            models,
            started_at: std::time::Instant::now(),
            default_model_type: default_model_type.into(),
            socket_path: socket_path.into(),
        }
    }
}

/// Client handle to the request queue. Cheap to clone; every connection
/// task holds one.
#[derive(Clone)]
pub struct RequestQueue {
    sender: flume::Sender<WorkItem>,
    queue_depth: Arc<AtomicUsize>,
}

impl RequestQueue {
    pub fn current_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    /// Enqueue a request and await its response. Fails only if the worker
    /// has shut down and dropped its receiver.
    pub async fn enqueue(&self, request: Request) -> Result<Response, RequestQueueClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue_depth.fetch_add(1, Ordering::AcqRel);
        self.sender
            .send_async(WorkItem { request, reply: reply_tx })
            .await
            .map_err(|_| RequestQueueClosed)?;
        reply_rx.await.map_err(|_| RequestQueueClosed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("request queue is closed, the worker has shut down")]
pub struct RequestQueueClosed;

/// Build a fresh queue and its paired worker loop. The caller is expected to
/// `tokio::spawn` the returned future immediately; it runs until every
/// `RequestQueue` clone has been dropped.
pub fn spawn_queue(state: Arc<ManagerState>) -> (RequestQueue, impl std::future::Future<Output = ()>) {
    let (sender, receiver) = flume::unbounded();
    let queue_depth = Arc::new(AtomicUsize::new(0));
    let queue = RequestQueue {
        sender,
        queue_depth: queue_depth.clone(),
    };
    let worker = run_worker(receiver, state, queue_depth);
    (queue, worker)
}

async fn run_worker(
    receiver: flume::Receiver<WorkItem>,
    state: Arc<ManagerState>,
    queue_depth: Arc<AtomicUsize>,
) {
    while let Ok(item) = receiver.recv_async().await {
        let WorkItem { request, reply } = item;
        let request_id = request.request_id;
        let action_name = action_name(&request.action);
        let started = std::time::Instant::now();
        // Decremented as soon as the item is pulled off the channel, before
        // dispatch runs, so a status/ping snapshot taken during dispatch
        // reports the depth of requests still waiting behind this one, not
        // including this one. Unconditional either way: it does not depend
        // on dispatch's outcome.
        queue_depth.fetch_sub(1, Ordering::AcqRel);
        // Awaited directly, not spawned: the next item is not pulled off
        // the channel until this dispatch has fully completed, which is
        // the serialization guarantee the whole daemon exists to provide.
        let result = dispatch(&state, request.action, &queue_depth).await;
        tracing::info!(
            event = "request_dispatched",
            request_id = %request_id,
            action = action_name,
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            canonical = true,
            "request completed"
        );
        let _ = reply.send(Response { request_id, result });
    }
    tracing::info!(event = "worker_stopped", "request queue drained, worker exiting");
}

async fn dispatch(state: &ManagerState, action: Action, queue_depth: &AtomicUsize) -> Result<Value, String> {
    match action {
        Action::Ping | Action::Status => {
            let depth = queue_depth.load(Ordering::Acquire);
            Ok(crate::status::snapshot(state, depth).await.to_json())
        }
        Action::DeviceStatus => {
            let depth = queue_depth.load(Ordering::Acquire);
            Ok(crate::status::device_status_snapshot(state, depth).await.to_json())
        }
        Action::LoadModel { model_path, model_type, model_params } => {
            let model_path = model_path.ok_or_else(|| "model_path required".to_string())?;
            let model_type = model_type.unwrap_or_else(|| state.default_model_type.clone());
            let key = ModelKey::new(model_type, model_path);
            match state.models.load(&state.device, key, model_params).await {
                Ok(LoadOutcome::Loaded) => Ok(json!({"status": "ok", "message": "Model loaded"})),
                Ok(LoadOutcome::AlreadyLoaded) => {
                    Ok(json!({"status": "ok", "message": "Model already loaded"}))
                }
                Err(err) => Err(format_model_error(err)),
            }
        }
        Action::Infer { model_path, model_type, model_params, input_data } => {
            let model_path = model_path.ok_or_else(|| "model_path required".to_string())?;
            let input_data = input_data.ok_or_else(|| "input_data required".to_string())?;
            let model_type = model_type.unwrap_or_else(|| state.default_model_type.clone());
            let key = ModelKey::new(model_type, model_path);
            state
                .models
                .infer(&state.device, &key, input_data, model_params)
                .await
                .map(|outcome| {
                    json!({
                        "status": "ok",
                        "result": outcome.result,
                        "inference_time_ms": outcome.inference_time_ms,
                    })
                })
                .map_err(format_model_error)
        }
        Action::UnloadModel { model_path, model_type } => {
            let model_path = model_path.ok_or_else(|| "model_path required".to_string())?;
            let model_type = model_type.unwrap_or_else(|| state.default_model_type.clone());
            let key = ModelKey::new(model_type, model_path);
            match state.models.unload(&key).await {
                Ok(UnloadOutcome::Unloaded) => Ok(json!({"status": "ok", "message": "Model unloaded"})),
                Ok(UnloadOutcome::NotLoaded) => {
                    Ok(json!({"status": "ok", "message": "Model was not loaded"}))
                }
                Err(err) => Err(format_model_error(err)),
            }
        }
    }
}

fn format_model_error(err: ModelTableError) -> String {
    err.to_string()
}

fn action_name(action: &Action) -> &'static str {
    match action {
        Action::Ping => "ping",
        Action::Status => "status",
        Action::DeviceStatus => "device_status",
        Action::LoadModel { .. } => "load_model",
        Action::Infer { .. } => "infer",
        Action::UnloadModel { .. } => "unload_model",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, DEVICE_TEST_LOCK};
    use crate::handler::{HandlerAdapter, ModelHandler};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct SlowEchoHandler {
        concurrent: Arc<AtomicUsize>,
        max_observed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelHandler for SlowEchoHandler {
        type Runtime = ();

        fn model_type(&self) -> &'static str {
            "echo"
        }

        async fn load(
            &self,
            _device: &DeviceContext,
            _model_path: &str,
            _model_params: Option<&Value>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn infer(&self, _runtime: &(), input: Value) -> anyhow::Result<Value> {
            let now = self.concurrent.fetch_add(1, Ordering::AcqRel) + 1;
            self.max_observed.fetch_max(now, Ordering::AcqRel);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::AcqRel);
            Ok(input)
        }

        async fn unload(&self, _runtime: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn request_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn spawn_test_queue() -> (RequestQueue, Arc<AtomicUsize>) {
        let device = DeviceContext::open_exclusive(-1).unwrap();
        let max_observed = Arc::new(AtomicUsize::new(0));
        let handler = SlowEchoHandler {
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_observed: max_observed.clone(),
        };
        let models = ModelTable::new(vec![HandlerAdapter::new(handler)]);
        let state = Arc::new(ManagerState::new(device, models, "echo", "/run/hailo/device.sock"));
        let (queue, worker) = spawn_queue(state);
        tokio::spawn(worker);
        (queue, max_observed)
    }

    #[tokio::test]
    async fn ping_returns_the_full_status_snapshot() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, _max_observed) = spawn_test_queue().await;
        let response = queue
            .enqueue(Request { request_id: request_id(), action: Action::Ping })
            .await
            .unwrap();
        let body = response.result.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body.get("queue_depth").is_some());
        assert!(body.get("uptime_seconds").is_some());
        assert!(body.get("loaded_models").is_some());
    }

    #[tokio::test]
    async fn device_status_includes_device_and_networks() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, _max_observed) = spawn_test_queue().await;
        let response = queue
            .enqueue(Request { request_id: request_id(), action: Action::DeviceStatus })
            .await
            .unwrap();
        let body = response.result.unwrap();
        assert!(body.get("device").is_some());
        assert!(body.get("networks").is_some());
    }

    #[tokio::test]
    async fn loading_an_already_loaded_model_is_an_idempotent_success() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, _max_observed) = spawn_test_queue().await;
        let load = || Request {
            request_id: request_id(),
            action: Action::LoadModel {
                model_path: Some("/models/a.bin".to_string()),
                model_type: Some("echo".to_string()),
                model_params: Some(json!({})),
            },
        };
        let first = queue.enqueue(load()).await.unwrap().result.unwrap();
        let second = queue.enqueue(load()).await.unwrap().result.unwrap();
        assert_eq!(first["message"], "Model loaded");
        assert_eq!(second["message"], "Model already loaded");
    }

    #[tokio::test]
    async fn infer_against_a_never_loaded_model_auto_loads_it() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, _max_observed) = spawn_test_queue().await;
        let response = queue
            .enqueue(Request {
                request_id: request_id(),
                action: Action::Infer {
                    model_path: Some("/models/never-loaded.bin".to_string()),
                    model_type: Some("echo".to_string()),
                    model_params: Some(json!({})),
                    input_data: Some(Value::from("hi")),
                },
            })
            .await
            .unwrap();
        let body = response.result.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["result"], Value::from("hi"));
        assert!(body.get("inference_time_ms").is_some());
    }

    #[tokio::test]
    async fn concurrent_infers_never_overlap_on_the_device() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, max_observed) = spawn_test_queue().await;
        queue
            .enqueue(Request {
                request_id: request_id(),
                action: Action::LoadModel {
                    model_path: Some("/models/a.bin".to_string()),
                    model_type: Some("echo".to_string()),
                    model_params: Some(json!({})),
                },
            })
            .await
            .unwrap()
            .result
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(Request {
                        request_id: request_id(),
                        action: Action::Infer {
                            model_path: Some("/models/a.bin".to_string()),
                            model_type: Some("echo".to_string()),
                            model_params: None,
                            input_data: Some(Value::Null),
                        },
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap().result.unwrap();
        }
        // Five requests were submitted concurrently from five tasks, but the
        // handler never observed more than one in flight at a time.
        assert_eq!(max_observed.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn queue_depth_returns_to_zero_after_an_error() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let (queue, _max_observed) = spawn_test_queue().await;
        let response = queue
            .enqueue(Request {
                request_id: request_id(),
                action: Action::LoadModel {
                    model_path: None,
                    model_type: Some("echo".to_string()),
                    model_params: None,
                },
            })
            .await
            .unwrap();
        assert!(response.result.is_err());
        assert_eq!(queue.current_depth(), 0);
    }
}

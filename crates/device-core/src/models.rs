//! The loaded-model table: every model currently resident on the
//! accelerator, keyed by `(model_type, model_path)` so the same weights
//! loaded under two different handlers are tracked as distinct entries.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::handler::{DynHandler, HandlerError};

/// Composite key identifying a loaded model instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_type: String,
    pub model_path: String,
}

impl ModelKey {
    pub fn new(model_type: impl Into<String>, model_path: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            model_path: model_path.into(),
        }
    }
}

struct ModelEntry {
    handler: Arc<dyn DynHandler>,
    runtime: Box<dyn Any + Send + Sync>,
    loaded_at: f64,
    last_used: f64,
}

/// A loaded model's key plus its timestamps, as exposed to `status`/
/// `device_status`.
#[derive(Debug, Clone)]
pub struct LoadedModelSnapshot {
    pub key: ModelKey,
    pub loaded_at: f64,
    pub last_used: f64,
}

/// Outcome of a `load` call: whether a handler load actually ran, or the
/// key was already resident and the call is a no-op success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
}

/// Outcome of an `unload` call, symmetric with [`LoadOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded,
    NotLoaded,
}

/// Result of a successful `infer` call: the handler's output plus the
/// wall-clock time the handler call itself took.
#[derive(Debug, Clone)]
pub struct InferOutcome {
    pub result: Value,
    pub inference_time_ms: u64,
}

/// Registry of handlers by model_type, plus the table of currently loaded
/// models. Guarded by a single `RwLock` since lookups (infer) vastly
/// outnumber mutations (load/unload), though in this daemon all access is
/// already serialized through the single worker lane.
pub struct ModelTable {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
    entries: RwLock<HashMap<ModelKey, ModelEntry>>,
    /// Insertion order, used to unload everything in reverse order on
    /// shutdown.
    order: RwLock<Vec<ModelKey>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelTableError {
    #[error("unknown model_type: {0}")]
    UnknownModelType(String),
    #[error("model_path does not exist: {0}")]
    PathNotFound(String),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl ModelTable {
    pub fn new(handlers: Vec<Arc<dyn DynHandler>>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.model_type().to_string(), h))
            .collect();
        Self {
            handlers,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    pub fn known_model_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Load `key` onto the device. A second call for an already-loaded key
    /// is a no-op success (`LoadOutcome::AlreadyLoaded`), not an error.
    ///
    /// Unless `model_params` is present (meaning the handler resolves its
    /// model across files of its own choosing), `key.model_path` must exist
    /// on disk before the handler is invoked.
    pub async fn load(
        &self,
        device: &crate::device::DeviceContext,
        key: ModelKey,
        model_params: Option<Value>,
    ) -> Result<LoadOutcome, ModelTableError> {
        let handler = self
            .handlers
            .get(&key.model_type)
            .cloned()
            .ok_or_else(|| ModelTableError::UnknownModelType(key.model_type.clone()))?;

        {
            let entries = self.entries.read().await;
            if entries.contains_key(&key) {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
        }

        if model_params.is_none() && !Path::new(&key.model_path).exists() {
            return Err(ModelTableError::PathNotFound(key.model_path));
        }

        let runtime = match handler.load(device, &key.model_path, model_params.as_ref()).await {
            Ok(runtime) => runtime,
            Err(error) => {
                tracing::error!(
                    event = "model_load_failed",
                    model_type = %key.model_type,
                    model_path = %key.model_path,
                    error = %error,
                    "model load failed"
                );
                return Err(error.into());
            }
        };

        let timestamp = now_secs();
        let mut entries = self.entries.write().await;
        let mut order = self.order.write().await;
        tracing::info!(event = "model_loaded", model_type = %key.model_type, model_path = %key.model_path, "model loaded");
        entries.insert(
            key.clone(),
            ModelEntry {
                handler,
                runtime,
                loaded_at: timestamp,
                last_used: timestamp,
            },
        );
        order.push(key);
        Ok(LoadOutcome::Loaded)
    }

    /// Run inference against `key`, auto-loading it first if it is not yet
    /// resident (propagating any load error). Updates `last_used` on
    /// success.
    pub async fn infer(
        &self,
        device: &crate::device::DeviceContext,
        key: &ModelKey,
        input: Value,
        model_params: Option<Value>,
    ) -> Result<InferOutcome, ModelTableError> {
        let already_loaded = { self.entries.read().await.contains_key(key) };
        if !already_loaded {
            self.load(device, key.clone(), model_params).await?;
        }

        let started = std::time::Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .expect("auto-load above just inserted this key");
        let result = entry.handler.infer(entry.runtime.as_ref(), input).await?;
        entry.last_used = now_secs();
        let inference_time_ms = started.elapsed().as_millis() as u64;

        Ok(InferOutcome { result, inference_time_ms })
    }

    /// Unload `key`. A call against a key that isn't loaded is a no-op
    /// success (`UnloadOutcome::NotLoaded`), not an error.
    pub async fn unload(&self, key: &ModelKey) -> Result<UnloadOutcome, ModelTableError> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(key)
        };
        let Some(entry) = entry else {
            return Ok(UnloadOutcome::NotLoaded);
        };
        {
            let mut order = self.order.write().await;
            order.retain(|k| k != key);
        }
        entry.handler.unload(entry.runtime).await?;
        tracing::info!(event = "model_unloaded", model_type = %key.model_type, model_path = %key.model_path, "model unloaded");
        Ok(UnloadOutcome::Unloaded)
    }

    pub async fn loaded_keys(&self) -> Vec<ModelKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn loaded_snapshot(&self) -> Vec<LoadedModelSnapshot> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, entry)| LoadedModelSnapshot {
                key: key.clone(),
                loaded_at: entry.loaded_at,
                last_used: entry.last_used,
            })
            .collect()
    }

    /// Unload every loaded model in reverse insertion order. Used during
    /// shutdown; logs and continues past individual unload failures rather
    /// than aborting partway through.
    pub async fn unload_all(&self) -> Vec<(ModelKey, Result<UnloadOutcome, ModelTableError>)> {
        let order: Vec<ModelKey> = { self.order.read().await.iter().rev().cloned().collect() };
        let mut results = Vec::with_capacity(order.len());
        for key in order {
            let result = self.unload(&key).await;
            results.push((key, result));
        }
        results
    }
}

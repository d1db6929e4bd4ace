//! Handler registry: a typed [`ModelHandler`] trait for implementers, wrapped
//! in an object-safe [`DynHandler`] so the model table can hold a
//! heterogeneous collection of handlers behind one trait object per
//! `model_type`.
//!
//! A handler's loaded state (whatever a real accelerator binding would
//! return from opening a model) is opaque outside the handler itself: the
//! model table stores it as `Box<dyn Any + Send + Sync>` and the
//! [`HandlerAdapter`] downcasts it back to the handler's own `Runtime` type
//! before every call. This mirrors a typed-inference-trait-plus-type-erased-
//! handle split used elsewhere for pluggable model backends, generalized
//! here to cover load/infer/unload rather than a single inference call.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::device::DeviceContext;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("model load failed: {0}")]
    Load(#[source] anyhow::Error),
    #[error("inference failed: {0}")]
    Infer(#[source] anyhow::Error),
    #[error("model unload failed: {0}")]
    Unload(#[source] anyhow::Error),
    #[error("runtime handle did not match the handler it was created by")]
    RuntimeTypeMismatch,
}

/// Implemented once per concrete model backend (echo, clip, ...). `Runtime`
/// is whatever state a loaded model needs between calls; it never leaves
/// the handler's own code.
#[async_trait]
pub trait ModelHandler: Send + Sync + 'static {
    type Runtime: Send + Sync + 'static;

    /// Human-readable model_type this handler answers to, e.g. `"echo"`.
    fn model_type(&self) -> &'static str;

    /// `model_params` is the caller-supplied, handler-defined object from
    /// the `load_model`/`infer` request. A handler that resolves its model
    /// across several files (rather than the single `model_path`) reads
    /// them from here instead of from `model_path` alone.
    async fn load(
        &self,
        device: &DeviceContext,
        model_path: &str,
        model_params: Option<&Value>,
    ) -> anyhow::Result<Self::Runtime>;

    async fn infer(&self, runtime: &Self::Runtime, input: Value) -> anyhow::Result<Value>;

    async fn unload(&self, runtime: Self::Runtime) -> anyhow::Result<()>;
}

/// Object-safe counterpart of [`ModelHandler`], used by the model table so
/// handlers of different concrete types can sit side by side.
#[async_trait]
pub trait DynHandler: Send + Sync {
    fn model_type(&self) -> &'static str;

    async fn load(
        &self,
        device: &DeviceContext,
        model_path: &str,
        model_params: Option<&Value>,
    ) -> Result<Box<dyn Any + Send + Sync>, HandlerError>;

    async fn infer(
        &self,
        runtime: &(dyn Any + Send + Sync),
        input: Value,
    ) -> Result<Value, HandlerError>;

    async fn unload(&self, runtime: Box<dyn Any + Send + Sync>) -> Result<(), HandlerError>;
}

/// Wraps a typed [`ModelHandler`] so it can be stored as `Arc<dyn DynHandler>`.
pub struct HandlerAdapter<H: ModelHandler> {
    inner: H,
}

impl<H: ModelHandler> HandlerAdapter<H> {
    pub fn new(inner: H) -> Arc<dyn DynHandler> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl<H: ModelHandler> DynHandler for HandlerAdapter<H> {
    fn model_type(&self) -> &'static str {
        self.inner.model_type()
    }

    async fn load(
        &self,
        device: &DeviceContext,
        model_path: &str,
        model_params: Option<&Value>,
    ) -> Result<Box<dyn Any + Send + Sync>, HandlerError> {
        let runtime = self
            .inner
            .load(device, model_path, model_params)
            .await
            .map_err(HandlerError::Load)?;
        Ok(Box::new(runtime))
    }

    async fn infer(
        &self,
        runtime: &(dyn Any + Send + Sync),
        input: Value,
    ) -> Result<Value, HandlerError> {
        let runtime = runtime
            .downcast_ref::<H::Runtime>()
            .ok_or(HandlerError::RuntimeTypeMismatch)?;
        self.inner
            .infer(runtime, input)
            .await
            .map_err(HandlerError::Infer)
    }

    async fn unload(&self, runtime: Box<dyn Any + Send + Sync>) -> Result<(), HandlerError> {
        let runtime = runtime
            .downcast::<H::Runtime>()
            .map_err(|_| HandlerError::RuntimeTypeMismatch)?;
        self.inner
            .unload(*runtime)
            .await
            .map_err(HandlerError::Unload)
    }
}

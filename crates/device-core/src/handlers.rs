//! Concrete [`ModelHandler`] implementations bundled with the daemon.
//!
//! Neither handler binds to real accelerator firmware — no such binding
//! exists in this workspace. `EchoHandler` is the daemon's self-test
//! backend; `ClipStubHandler` demonstrates a multi-call model lifecycle
//! (load produces a handle carrying a fixed embedding width, infer derives
//! a deterministic embedding from its input) without pretending to talk to
//! real CLIP weights.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::device::DeviceContext;
use crate::handler::ModelHandler;
use crate::tensor::{DType, Tensor};

/// Echoes its input back as output. Used to exercise the queue, framing and
/// handler registry end to end without any model-specific behavior.
pub struct EchoHandler;

#[async_trait]
impl ModelHandler for EchoHandler {
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
        Ok(input)
    }

    async fn unload(&self, _runtime: ()) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Loaded state for [`ClipStubHandler`]: the embedding width the "model"
/// was configured with at load time.
pub struct ClipRuntime {
    embedding_dim: usize,
}

/// Stands in for a CLIP-family image/text embedding model. `infer` expects
/// `{"text": "..."}` and returns a deterministic, hash-derived embedding of
/// `embedding_dim` floats, encoded as a tensor payload, rather than a real
/// forward pass.
pub struct ClipStubHandler {
    embedding_dim: usize,
}

impl ClipStubHandler {
    pub fn new(embedding_dim: usize) -> Self {
        Self { embedding_dim }
    }
}

#[async_trait]
impl ModelHandler for ClipStubHandler {
    type Runtime = ClipRuntime;

    fn model_type(&self) -> &'static str {
        "clip"
    }

    async fn load(
        &self,
        _device: &DeviceContext,
        _model_path: &str,
        _model_params: Option<&Value>,
    ) -> anyhow::Result<ClipRuntime> {
        Ok(ClipRuntime {
            embedding_dim: self.embedding_dim,
        })
    }

    async fn infer(&self, runtime: &ClipRuntime, input: Value) -> anyhow::Result<Value> {
        let text = input
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("clip input must be an object with a \"text\" field"))?;

        let embedding = deterministic_embedding(text, runtime.embedding_dim);
        let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        let tensor = Tensor::new(DType::Float32, vec![embedding.len()], bytes)
            .expect("embedding byte count always matches its own shape");
        Ok(json!({ "embedding": tensor.encode() }))
    }

    async fn unload(&self, _runtime: ClipRuntime) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Derives a stable pseudo-embedding from `text` so repeated calls with the
/// same input are reproducible in tests, without implying any real model
/// semantics.
fn deterministic_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        state ^= byte as u64;
        state = state.wrapping_mul(0x100000001b3);
    }
    (0..dim)
        .map(|i| {
            let mixed = state.wrapping_add(i as u64).wrapping_mul(0x2545F4914F6CDD1D);
            ((mixed >> 40) as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, DEVICE_TEST_LOCK};

    #[tokio::test]
    async fn echo_returns_its_input_unchanged() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let device = DeviceContext::open_exclusive(-1).unwrap();
        let handler = EchoHandler;
        let runtime = handler.load(&device, "ignored", None).await.unwrap();
        let out = handler.infer(&runtime, json!({"a": 1})).await.unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[tokio::test]
    async fn clip_stub_is_deterministic_for_the_same_text() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let device = DeviceContext::open_exclusive(-1).unwrap();
        let handler = ClipStubHandler::new(8);
        let runtime = handler.load(&device, "ignored", None).await.unwrap();

        let first = handler.infer(&runtime, json!({"text": "a cat"})).await.unwrap();
        let second = handler.infer(&runtime, json!({"text": "a cat"})).await.unwrap();
        assert_eq!(first, second);

        let payload: crate::tensor::TensorPayload =
            serde_json::from_value(first["embedding"].clone()).unwrap();
        assert_eq!(payload.shape, vec![8]);
        let decoded = Tensor::decode(&payload).unwrap();
        assert_eq!(decoded.data.len(), 8 * DType::Float32.size_of());
    }

    #[tokio::test]
    async fn clip_stub_rejects_missing_text_field() {
        let _guard = DEVICE_TEST_LOCK.lock().unwrap();
        let device = DeviceContext::open_exclusive(-1).unwrap();
        let handler = ClipStubHandler::new(8);
        let runtime = handler.load(&device, "ignored", None).await.unwrap();
        assert!(handler.infer(&runtime, json!({})).await.is_err());
    }
}

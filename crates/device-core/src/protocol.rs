//! The wire schema clients and the manager exchange as JSON, plus the glue
//! between it and the internal [`crate::worker::Action`] type. Kept in
//! `device-core` so the manager and the client library parse exactly the
//! same shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::worker::Action;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WireAction {
    Ping,
    Status,
    DeviceStatus,
    LoadModel {
        #[serde(default)]
        model_path: Option<String>,
        #[serde(default)]
        model_type: Option<String>,
        #[serde(default)]
        model_params: Option<Value>,
    },
    Infer {
        #[serde(default)]
        model_path: Option<String>,
        #[serde(default)]
        model_type: Option<String>,
        #[serde(default)]
        model_params: Option<Value>,
        #[serde(default)]
        input_data: Option<Value>,
    },
    UnloadModel {
        #[serde(default)]
        model_path: Option<String>,
        #[serde(default)]
        model_type: Option<String>,
    },
}

/// `request_id` is an optional, opaque, client-generated string: present if
/// the client wants it echoed back, absent otherwise. Never required for a
/// request to be accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub action: WireAction,
}

impl From<WireAction> for Action {
    fn from(action: WireAction) -> Self {
        match action {
            WireAction::Ping => Action::Ping,
            WireAction::Status => Action::Status,
            WireAction::DeviceStatus => Action::DeviceStatus,
            WireAction::LoadModel { model_path, model_type, model_params } => {
                Action::LoadModel { model_path, model_type, model_params }
            }
            WireAction::Infer { model_path, model_type, model_params, input_data } => {
                Action::Infer { model_path, model_type, model_params, input_data }
            }
            WireAction::UnloadModel { model_path, model_type } => {
                Action::UnloadModel { model_path, model_type }
            }
        }
    }
}

/// Build the wire-level JSON for a dispatch result: the already-shaped
/// success payload (e.g. `{"status": "ok", ...}`) on `Ok`, or
/// `{"error": "..."}` on `Err`, with `request_id` merged in only when the
/// originating request carried one.
pub fn build_response(request_id: Option<String>, result: Result<Value, String>) -> Value {
    let mut body = match result {
        Ok(value) => value,
        Err(error) => json!({ "error": error }),
    };
    if let Some(id) = request_id {
        if let Value::Object(map) = &mut body {
            map.insert("request_id".to_string(), Value::String(id));
        }
    }
    body
}

/// Error reply for requests that never reach the worker at all: malformed
/// JSON or an unparseable frame. `request_id` is `None` when the offending
/// frame couldn't even be parsed far enough to recover one.
pub fn protocol_error_response(request_id: Option<String>, error: impl Into<String>) -> Value {
    build_response(request_id, Err(error.into()))
}

//! The read-only status snapshot shared between the `ping`/`status` client
//! actions and the HTTP sidecar, plus the `device_status` extension of it.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::worker::ManagerState;

#[derive(Debug, Clone, Serialize)]
pub struct LoadedModelInfo {
    pub model_type: String,
    pub model_path: String,
    pub loaded_at: f64,
    pub last_used: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub device_id: Option<String>,
    pub socket_path: String,
    pub uptime_seconds: f64,
    pub queue_depth: usize,
    pub loaded_models: Vec<LoadedModelInfo>,
}

impl StatusSnapshot {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("StatusSnapshot always serializes")
    }
}

pub async fn snapshot(state: &ManagerState, queue_depth: usize) -> StatusSnapshot {
    let loaded_models = state
        .models
        .loaded_snapshot()
        .await
        .into_iter()
        .map(|entry| LoadedModelInfo {
            model_type: entry.key.model_type,
            model_path: entry.key.model_path,
            loaded_at: entry.loaded_at,
            last_used: entry.last_used,
        })
        .collect();

    StatusSnapshot {
        status: "ok",
        device_id: Some(state.device.id().0.clone()),
        socket_path: state.socket_path.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        queue_depth,
        loaded_models,
    }
}

/// The `device` sub-object of a `device_status` response: identity plus
/// best-effort telemetry. A failed telemetry probe is reported as a
/// sub-error rather than failing the whole request.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub architecture: String,
    pub firmware_version: String,
    pub temperature_celsius: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusSnapshot {
    #[serde(flatten)]
    pub base: StatusSnapshot,
    pub device: DeviceInfo,
    /// Loaded models keyed by filename (basename of `model_path`).
    pub networks: BTreeMap<String, LoadedModelInfo>,
}

impl DeviceStatusSnapshot {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("DeviceStatusSnapshot always serializes")
    }
}

pub async fn device_status_snapshot(state: &ManagerState, queue_depth: usize) -> DeviceStatusSnapshot {
    let base = snapshot(state, queue_depth).await;

    let (temperature_celsius, temperature_error) = match state.device.chip_temperature_celsius() {
        Ok(temp) => (Some(temp), None),
        Err(err) => (None, Some(err.to_string())),
    };

    let device = DeviceInfo {
        device_id: state.device.id().0.clone(),
        architecture: state.device.architecture().to_string(),
        firmware_version: state.device.firmware_version().to_string(),
        temperature_celsius,
        temperature_error,
    };

    let networks = base
        .loaded_models
        .iter()
        .map(|model| {
            let filename = std::path::Path::new(&model.model_path)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| model.model_path.clone());
            (filename, model.clone())
        })
        .collect();

    DeviceStatusSnapshot { base, device, networks }
}

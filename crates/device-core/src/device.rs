//! Exclusive ownership of the accelerator device.
//!
//! No vendor SDK binding exists in this workspace, so `DeviceContext`
//! represents the device honestly as a simulated resource: it enforces the
//! "exactly one open handle" invariant and reports a fixed identity and a
//! canned but still fallible telemetry reading, rather than pretending to
//! call into real firmware.

use std::sync::atomic::{AtomicBool, Ordering};

static DEVICE_OPEN: AtomicBool = AtomicBool::new(false);

/// `-1` means "use whatever group the driver defaults to".
pub const DEFAULT_GROUP_ID: i64 = -1;

const SIMULATED_ARCHITECTURE: &str = "sim-hailo8";
const SIMULATED_FIRMWARE_VERSION: &str = "0.0.0-simulated";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device is already open by another handle in this process")]
    AlreadyOpen,
    #[error("no accelerator device was found")]
    NotFound,
}

/// A simulated accelerator identity, as would be returned by a device scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(pub String);

/// Enumerate attached accelerators. Always reports exactly one simulated
/// device, matching the single-device assumption this daemon is built
/// around.
pub fn scan_devices() -> Vec<DeviceId> {
    vec![DeviceId("sim-hailo-0".to_string())]
}

/// Exclusive handle to the accelerator. Dropping it releases the process-wide
/// exclusivity lock so a later `open_exclusive` call (e.g. in tests) can
/// succeed again.
pub struct DeviceContext {
    id: DeviceId,
    group_id: i64,
}

impl DeviceContext {
    /// Open the sole accelerator device exclusively. `group_id` is passed
    /// through to the (simulated) driver; `-1` means "use the default".
    /// Fails if another `DeviceContext` in this process is already open, or
    /// if no device is present.
    pub fn open_exclusive(group_id: i64) -> Result<Self, DeviceError> {
        let devices = scan_devices();
        let id = devices.into_iter().next().ok_or(DeviceError::NotFound)?;

        if DEVICE_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::AlreadyOpen);
        }

        Ok(Self { id, group_id })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn architecture(&self) -> &'static str {
        SIMULATED_ARCHITECTURE
    }

    pub fn firmware_version(&self) -> &'static str {
        SIMULATED_FIRMWARE_VERSION
    }

    /// A canned telemetry reading. Still `Result`-wrapped because a real
    /// binding would have a fallible read here.
    pub fn chip_temperature_celsius(&self) -> Result<f32, DeviceError> {
        Ok(42.0)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        DEVICE_OPEN.store(false, Ordering::Release);
    }
}

/// Serializes tests (in this module and others in the crate) that exercise
/// `DeviceContext`'s process-wide exclusivity state.
#[cfg(test)]
pub(crate) static DEVICE_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

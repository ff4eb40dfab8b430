//! # Compute Device Selection
//!
//! Maps the `models.device` setting onto a Candle device. GPU requests fall
//! back to the CPU when the backend is unavailable, so a bad setting slows
//! transcription down but never blocks it.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached result of auto-detection.
static DETECTED_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available: CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a configured preference string to a device.
///
/// Unknown strings are treated as `auto` with a warning.
pub fn resolve_device(preference: &str) -> Device {
    let preference = preference.parse().unwrap_or_else(|err: String| {
        warn!("{}, falling back to automatic selection", err);
        DevicePreference::Auto
    });

    match preference {
        DevicePreference::Auto => DETECTED_DEVICE.get_or_init(detect_device).clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or_else(|| {
            warn!("CUDA requested but unavailable, using CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => metal_device().unwrap_or_else(|| {
            warn!("Metal requested but unavailable, using CPU");
            Device::Cpu
        }),
    }
}

fn detect_device() -> Device {
    if let Some(device) = cuda_device() {
        info!("Selected CUDA GPU for transcription");
        return device;
    }
    if let Some(device) = metal_device() {
        info!("Selected Metal GPU for transcription");
        return device;
    }
    info!("Using CPU for transcription");
    Device::Cpu
}

fn cuda_device() -> Option<Device> {
    Device::new_cuda(0)
        .map_err(|e| debug!("CUDA not available: {}", e))
        .ok()
}

fn metal_device() -> Option<Device> {
    Device::new_metal(0)
        .map_err(|e| debug!("Metal not available: {}", e))
        .ok()
}

/// Short name for logs and the health endpoint.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

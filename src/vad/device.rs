//! Inference device selection for local models (spec. §4.2, §9).
//!
//! Fixed priority order: CUDA > ROCm > DirectML > CPU. A non-CPU device is
//! only chosen when the corresponding `ort` execution-provider feature was
//! compiled in; this mirrors the teacher's `ort-cuda` cargo feature gate in
//! `backend/onnx_utils.rs`, generalized to the full provider list the spec
//! calls for.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cpu,
    Cuda,
    Rocm,
    Dml,
}

impl Default for Device {
    fn default() -> Self {
        Device::Auto
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Rocm => "rocm",
            Device::Dml => "dml",
        };
        write!(f, "{s}")
    }
}

/// Resolve a requested device preference to the concrete device that will
/// actually be used, given which execution-provider features were compiled
/// into this build. `Device::Auto` probes in fixed priority order.
pub fn select_device(requested: Device) -> Device {
    match requested {
        Device::Auto => {
            if cfg!(feature = "ort-cuda") {
                Device::Cuda
            } else if cfg!(feature = "ort-rocm") {
                Device::Rocm
            } else if cfg!(feature = "ort-directml") {
                Device::Dml
            } else {
                Device::Cpu
            }
        }
        Device::Cuda if !cfg!(feature = "ort-cuda") => {
            tracing::warn!("requested device cuda but ort-cuda feature not compiled in, using cpu");
            Device::Cpu
        }
        Device::Rocm if !cfg!(feature = "ort-rocm") => {
            tracing::warn!("requested device rocm but ort-rocm feature not compiled in, using cpu");
            Device::Cpu
        }
        Device::Dml if !cfg!(feature = "ort-directml") => {
            tracing::warn!("requested device dml but ort-directml feature not compiled in, using cpu");
            Device::Cpu
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_falls_back_to_cpu_without_gpu_features() {
        // None of the ort-* features are enabled in the default test build.
        assert_eq!(select_device(Device::Auto), Device::Cpu);
    }

    #[test]
    fn unavailable_explicit_device_falls_back_to_cpu() {
        assert_eq!(select_device(Device::Cuda), Device::Cpu);
    }
}

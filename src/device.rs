//! Accelerator device detection.
//!
//! Priority: CUDA, then Metal (Apple Silicon unified memory), then CPU.
//! Run once at startup; the chosen device is fixed for the
//! process lifetime and reused across model loads/swaps.

use candle_core::Device;
#[cfg(feature = "cuda")]
use candle_core::utils::cuda_is_available;
#[cfg(feature = "metal")]
use candle_core::utils::metal_is_available;
use log::{info, warn};

use crate::config::MEMORY_OCCUPANCY_FRACTION;

/// Coarse device class, independent of the underlying `candle_core::Device`
/// ordinal. Used to look up batch-size hints and to
/// report `gpu_available` on `health_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Cuda,
    Metal,
    Cpu,
}

impl DeviceClass {
    pub fn is_gpu(self) -> bool {
        !matches!(self, DeviceClass::Cpu)
    }
}

/// Result of the one-time device probe: the `candle_core::Device` to run
/// inference on, its class, and a human-readable name for `health_check`.
#[derive(Debug, Clone)]
pub struct ProbedDevice {
    pub device: Device,
    pub class: DeviceClass,
    pub name: String,
}

/// Detect the best available compute device. Sets no accelerator memory
/// watermark: candle exposes no per-process allocator fraction knob the way
/// some other frameworks do, so `MEMORY_OCCUPANCY_FRACTION` is enforced
/// entirely in software by the memory governor's batch sizing instead, and
/// the device-level watermark is simply left unbounded.
pub fn detect_best_device() -> candle_core::Result<ProbedDevice> {
    let _ = MEMORY_OCCUPANCY_FRACTION; // enforced in software by the memory governor

    #[cfg(feature = "cuda")]
    {
        if cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA GPU (device 0) for inference");
                    return Ok(ProbedDevice {
                        device,
                        class: DeviceClass::Cuda,
                        name: "CUDA GPU 0".to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "CUDA available but failed to initialize: {}. Falling back to next option.",
                        e
                    );
                }
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if metal_is_available() {
            match Device::new_metal(0) {
                Ok(device) => {
                    info!("Using Metal GPU (device 0) for inference");
                    return Ok(ProbedDevice {
                        device,
                        class: DeviceClass::Metal,
                        name: "Metal GPU 0 (unified memory)".to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Metal available but failed to initialize: {}. Falling back to CPU.",
                        e
                    );
                }
            }
        }
    }

    info!("Using CPU for inference (no GPU available or GPU initialization failed)");
    Ok(ProbedDevice {
        device: Device::Cpu,
        class: DeviceClass::Cpu,
        name: "CPU".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_available() {
        // On a machine without CUDA/Metal features compiled in, this must
        // still succeed and return the CPU class.
        let probed = detect_best_device().expect("device probe never fails outright");
        if !cfg!(any(feature = "cuda", feature = "metal")) {
            assert_eq!(probed.class, DeviceClass::Cpu);
        }
    }
}

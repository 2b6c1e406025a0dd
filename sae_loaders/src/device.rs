use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

use crate::env_utils::EnvVar;

/// Placement tag carried by configs and arrays.
///
/// Array bytes always live in host memory; the tag records where the caller
/// asked the tensors to be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
    Metal,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceParseError {
    #[error("Unknown device \"{0}\", expected cpu, cuda, cuda:<ordinal> or mps")]
    UnknownDevice(String),
    #[error("Invalid CUDA ordinal in \"{0}\"")]
    InvalidOrdinal(String),
}

const NVIDIA_DRIVER_VERSION_PATH: &str = "/proc/driver/nvidia/version";

impl Device {
    /// Default placement when the caller passes none: CUDA when the runtime
    /// reports a usable NVIDIA driver, otherwise CPU.
    pub fn default_available() -> Self {
        Self::choose_default(
            EnvVar::ForceCpu.is_enabled(),
            cuda_is_available(),
        )
    }

    pub fn choose_default(
        force_cpu: bool,
        cuda_available: bool,
    ) -> Self {
        if !force_cpu && cuda_available {
            Device::Cuda(0)
        } else {
            Device::Cpu
        }
    }

    pub fn or_default(device: Option<Device>) -> Self {
        device.unwrap_or_else(Self::default_available)
    }
}

pub fn cuda_is_available() -> bool {
    cuda_visible(EnvVar::CudaVisibleDevices.get().as_deref())
        && Path::new(NVIDIA_DRIVER_VERSION_PATH).exists()
}

fn cuda_visible(visible_devices: Option<&str>) -> bool {
    match visible_devices {
        None => true,
        Some(devices) => {
            let devices = devices.trim();
            !devices.is_empty() && devices != "-1"
        },
    }
}

impl fmt::Display for Device {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Device::Metal => write!(f, "mps"),
        }
    }
}

impl FromStr for Device {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            "mps" | "metal" => Ok(Device::Metal),
            other => {
                let Some(ordinal) = other.strip_prefix("cuda:") else {
                    return Err(DeviceParseError::UnknownDevice(s.to_string()));
                };
                ordinal
                    .parse::<usize>()
                    .map(Device::Cuda)
                    .map_err(|_| DeviceParseError::InvalidOrdinal(s.to_string()))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        assert_eq!("cpu".parse::<Device>(), Ok(Device::Cpu));
        assert_eq!("CUDA".parse::<Device>(), Ok(Device::Cuda(0)));
        assert_eq!("cuda:3".parse::<Device>(), Ok(Device::Cuda(3)));
        assert_eq!("mps".parse::<Device>(), Ok(Device::Metal));
        assert_eq!("metal".parse::<Device>(), Ok(Device::Metal));
        assert!(matches!(
            "cuda:x".parse::<Device>(),
            Err(DeviceParseError::InvalidOrdinal(_))
        ));
        assert!(matches!(
            "tpu".parse::<Device>(),
            Err(DeviceParseError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        for device in [Device::Cpu, Device::Cuda(0), Device::Cuda(2), Device::Metal]
        {
            assert_eq!(device.to_string().parse::<Device>(), Ok(device));
        }
    }

    #[test]
    fn test_choose_default() {
        assert_eq!(Device::choose_default(false, true), Device::Cuda(0));
        assert_eq!(Device::choose_default(true, true), Device::Cpu);
        assert_eq!(Device::choose_default(false, false), Device::Cpu);
    }

    #[test]
    fn test_cuda_visible() {
        assert!(cuda_visible(None));
        assert!(cuda_visible(Some("0,1")));
        assert!(!cuda_visible(Some("")));
        assert!(!cuda_visible(Some("-1")));
    }

    #[test]
    fn test_default_is_usable() {
        let device = Device::or_default(None);
        assert!(matches!(device, Device::Cpu | Device::Cuda(0)));
        assert_eq!(Device::or_default(Some(Device::Metal)), Device::Metal);
    }
}

//! Compute device enumeration
//!
//! Detects the accelerator family available to this process and how many
//! devices it exposes. Only CUDA devices can host more than one worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Accelerator family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Cuda,
    Mps,
    Cpu,
}

impl DeviceFamily {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceFamily::Cuda => "cuda",
            DeviceFamily::Mps => "mps",
            DeviceFamily::Cpu => "cpu",
        }
    }

    /// Whether several workers may run concurrently, one per device ordinal
    #[inline]
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, DeviceFamily::Cuda)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "gpu" => Ok(DeviceFamily::Cuda),
            "mps" => Ok(DeviceFamily::Mps),
            "cpu" => Ok(DeviceFamily::Cpu),
            other => Err(format!("unknown device family '{}'", other)),
        }
    }
}

/// One device a worker can be pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub family: DeviceFamily,
    pub ordinal: usize,
}

impl Device {
    pub fn new(family: DeviceFamily, ordinal: usize) -> Self {
        Self { family, ordinal }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            DeviceFamily::Cuda => write!(f, "cuda:{}", self.ordinal),
            family => f.write_str(family.name()),
        }
    }
}

/// Result of device detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInventory {
    pub family: DeviceFamily,
    /// Number of addressable devices of `family` (at least 1)
    pub count: usize,
}

impl DeviceInventory {
    /// Default worker parallelism: one per device when multiplexable, else 1
    pub fn default_parallelism(&self) -> usize {
        if self.family.supports_multiplexing() {
            self.count.max(1)
        } else {
            1
        }
    }

    /// Devices for `num_workers` workers
    ///
    /// CUDA workers get consecutive ordinals; other families share ordinal 0.
    pub fn devices(&self, num_workers: usize) -> Vec<Device> {
        (0..num_workers)
            .map(|i| match self.family {
                DeviceFamily::Cuda => Device::new(DeviceFamily::Cuda, i),
                family => Device::new(family, 0),
            })
            .collect()
    }
}

/// Detect available devices
///
/// An explicit `family` skips autodetection of the family but still counts
/// CUDA devices.
pub fn detect(family: Option<DeviceFamily>) -> DeviceInventory {
    let cuda_count = cuda_device_count();

    let family = family.unwrap_or_else(|| {
        if cuda_count > 0 {
            DeviceFamily::Cuda
        } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            DeviceFamily::Mps
        } else {
            DeviceFamily::Cpu
        }
    });

    let count = match family {
        DeviceFamily::Cuda => cuda_count.max(1),
        _ => 1,
    };

    tracing::info!(target: "pool", "Autodetected device type as {} ({} device(s))", family, count);

    DeviceInventory { family, count }
}

/// Count CUDA devices visible to this process
///
/// `CUDA_VISIBLE_DEVICES` wins when set; otherwise `/dev/nvidia<N>` nodes are counted.
fn cuda_device_count() -> usize {
    if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
        return parse_visible_devices(&visible);
    }
    count_nvidia_nodes(Path::new("/dev"))
}

fn parse_visible_devices(value: &str) -> usize {
    value
        .split(',')
        .map(str::trim)
        .take_while(|id| !id.is_empty() && *id != "-1")
        .count()
}

fn count_nvidia_nodes(dev: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dev) else {
        return 0;
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("nvidia"))
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        })
        .count()
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::KoreError;

/// Memory space a tensor lives in.
///
/// Placement drives the feed/fetch plan of nested graphs: a value whose
/// current device differs from where the consumer expects it needs a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    /// Page-locked host memory owned by a CUDA device. Readable from the host.
    CudaPinned(usize),
    Cuda(usize),
}

impl Device {
    /// Whether host code can read the memory directly.
    pub fn is_host_accessible(&self) -> bool {
        matches!(self, Device::Cpu | Device::CudaPinned(_))
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    pub fn cuda_index(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) | Device::CudaPinned(idx) => Some(*idx),
            Device::Cpu => None,
        }
    }

    /// Whether moving a value from `self` to `target` needs an explicit copy.
    ///
    /// Host-accessible memory (CPU and pinned) is interchangeable; device
    /// memory only matches the same device ordinal.
    pub fn requires_copy_to(&self, target: Device) -> bool {
        if self.is_host_accessible() && target.is_host_accessible() {
            return false;
        }
        *self != target
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::CudaPinned(idx) => write!(f, "cuda_pinned:{idx}"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

impl FromStr for Device {
    type Err = KoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_idx = |idx: &str| {
            idx.parse::<usize>()
                .map_err(|_| KoreError::invalid_argument(format!("bad device ordinal in '{s}'")))
        };
        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" => Ok(Device::Cuda(0)),
            Some(("cuda", idx)) => Ok(Device::Cuda(parse_idx(idx)?)),
            Some(("cuda_pinned", idx)) => Ok(Device::CudaPinned(parse_idx(idx)?)),
            _ => Err(KoreError::invalid_argument(format!("unknown device '{s}'"))),
        }
    }
}

//! Hardware acceleration backends
//!
//! A [`HardwareContext`] holds the first backend that initialises from a fixed
//! priority list, or nothing (software mode). "No hardware" is the common case
//! and is never an error. Contexts are shared between engines behind an `Arc`.

mod probe;

pub use probe::DeviceNodeProber;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AccelerationPreference;
use crate::error::Result;
use crate::video::format::PixelFormat;

/// Hardware acceleration backend identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwBackend {
    /// NVIDIA CUDA (NVDEC/NVENC)
    Cuda,
    /// Intel Quick Sync Video
    Qsv,
    /// VA-API (Intel/AMD)
    Vaapi,
    /// Rockchip MPP
    Rkmpp,
    /// V4L2 memory-to-memory codec (ARM SoCs)
    V4l2m2m,
}

impl HwBackend {
    /// Auto-probe order
    pub const PRIORITY: [HwBackend; 5] = [
        HwBackend::Cuda,
        HwBackend::Qsv,
        HwBackend::Vaapi,
        HwBackend::Rkmpp,
        HwBackend::V4l2m2m,
    ];

    /// Detect backend from an encoder/decoder name such as `h264_nvenc`
    pub fn from_codec_name(name: &str) -> Option<Self> {
        if name.contains("nvenc") || name.contains("cuvid") || name.contains("cuda") {
            Some(HwBackend::Cuda)
        } else if name.contains("qsv") {
            Some(HwBackend::Qsv)
        } else if name.contains("vaapi") {
            Some(HwBackend::Vaapi)
        } else if name.contains("rkmpp") {
            Some(HwBackend::Rkmpp)
        } else if name.contains("v4l2m2m") {
            Some(HwBackend::V4l2m2m)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HwBackend::Cuda => "CUDA",
            HwBackend::Qsv => "QSV",
            HwBackend::Vaapi => "VAAPI",
            HwBackend::Rkmpp => "RKMPP",
            HwBackend::V4l2m2m => "V4L2 M2M",
        }
    }

    /// Host pixel formats a decoded surface can be downloaded as
    pub fn output_formats(&self) -> &'static [PixelFormat] {
        match self {
            HwBackend::Cuda | HwBackend::Qsv | HwBackend::Rkmpp => &[PixelFormat::Nv12],
            HwBackend::Vaapi => &[PixelFormat::Nv12, PixelFormat::Yuv420p],
            HwBackend::V4l2m2m => &[PixelFormat::Nv12, PixelFormat::Yuv420p],
        }
    }
}

impl std::fmt::Display for HwBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for HwBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cuda" | "nvenc" | "nvdec" => Ok(HwBackend::Cuda),
            "qsv" => Ok(HwBackend::Qsv),
            "vaapi" => Ok(HwBackend::Vaapi),
            "rkmpp" => Ok(HwBackend::Rkmpp),
            "v4l2m2m" | "v4l2-m2m" => Ok(HwBackend::V4l2m2m),
            _ => Err(format!("Unknown hardware backend: {}", s)),
        }
    }
}

/// An initialised backend device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwDevice {
    pub backend: HwBackend,
    /// Device node the backend was opened through
    pub device_path: PathBuf,
}

/// Attempts to initialise a single backend
pub trait BackendProber: Send + Sync {
    /// Open `backend`, or explain why it is unavailable
    fn try_init(&self, backend: HwBackend) -> Result<HwDevice>;
}

/// Identity and capabilities of an accepted backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwDescription {
    pub backend: Option<HwBackend>,
    pub device_path: Option<PathBuf>,
    pub formats: Vec<PixelFormat>,
}

impl HwDescription {
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }
}

impl From<&HwDevice> for HwDescription {
    fn from(device: &HwDevice) -> Self {
        Self {
            backend: Some(device.backend),
            device_path: Some(device.device_path.clone()),
            formats: device.backend.output_formats().to_vec(),
        }
    }
}

/// Shared handle to a probed backend, or software mode
#[derive(Debug, Default)]
pub struct HardwareContext {
    device: Option<HwDevice>,
}

impl HardwareContext {
    /// Software mode (no backend)
    pub fn software() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Probe with the system device-node prober
    pub fn probe(preference: AccelerationPreference) -> Arc<Self> {
        Self::probe_with(preference, &DeviceNodeProber::default())
    }

    /// Probe with a specific prober.
    ///
    /// A named backend is the only one attempted; `Auto` walks
    /// [`HwBackend::PRIORITY`] and keeps the first that initialises.
    pub fn probe_with(preference: AccelerationPreference, prober: &dyn BackendProber) -> Arc<Self> {
        let candidates: Vec<HwBackend> = match preference {
            AccelerationPreference::Software => Vec::new(),
            AccelerationPreference::Auto => HwBackend::PRIORITY.to_vec(),
            named => named.to_backend().into_iter().collect(),
        };

        for backend in candidates {
            match prober.try_init(backend) {
                Ok(device) => {
                    info!(
                        "Using {} hardware acceleration ({})",
                        backend,
                        device.device_path.display()
                    );
                    return Arc::new(Self {
                        device: Some(device),
                    });
                }
                Err(e) => debug!("{} unavailable: {}", backend, e),
            }
        }

        info!("No hardware acceleration available, using software");
        Self::software()
    }

    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }

    pub fn backend(&self) -> Option<HwBackend> {
        self.device.as_ref().map(|d| d.backend)
    }

    pub fn device(&self) -> Option<&HwDevice> {
        self.device.as_ref()
    }

    /// Accepted backend and its host formats; empty in software mode
    pub fn describe(&self) -> HwDescription {
        self.device
            .as_ref()
            .map(HwDescription::from)
            .unwrap_or_default()
    }
}

/// Every backend that initialises on this machine, in priority order
pub fn available_backends() -> Vec<HwDescription> {
    available_backends_with(&DeviceNodeProber::default())
}

pub fn available_backends_with(prober: &dyn BackendProber) -> Vec<HwDescription> {
    HwBackend::PRIORITY
        .iter()
        .filter_map(|&backend| prober.try_init(backend).ok())
        .map(|device| HwDescription::from(&device))
        .collect()
}

pub fn has_hardware_support() -> bool {
    !available_backends().is_empty()
}

pub fn is_backend_available(backend: HwBackend) -> bool {
    DeviceNodeProber::default().try_init(backend).is_ok()
}

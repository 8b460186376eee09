use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hwaccel::HwBackend;
use crate::video::format::{PixelFormat, Resolution};

/// Accepted bitrate range in bits per second
pub const MIN_BITRATE: u32 = 100_000;
pub const MAX_BITRATE: u32 = 50_000_000;
/// Accepted frame rate range
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Input locator: `/dev/videoN`, a camera index, a stream URL or an MJPEG file
    pub input: String,
    /// Capture and decode settings
    pub capture: CaptureConfig,
    /// Network source settings (used when `input` is a URL)
    pub network: NetworkSourceConfig,
    /// Re-streaming server settings
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: "/dev/video0".to_string(),
            capture: CaptureConfig::default(),
            network: NetworkSourceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Check every section; the first violation is returned as `Error::Config`
    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(Error::Config("input must not be empty".to_string()));
        }
        self.capture.validate()?;
        self.network.validate()?;
        self.server.validate()
    }
}

/// Hardware acceleration preference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationPreference {
    /// Probe backends in priority order, fall back to software
    #[default]
    Auto,
    /// Never use hardware
    #[serde(alias = "none")]
    Software,
    /// NVIDIA CUDA / NVDEC / NVENC
    Cuda,
    /// Intel Quick Sync
    Qsv,
    /// VA-API
    Vaapi,
    /// Rockchip MPP
    Rkmpp,
    /// V4L2 memory-to-memory codec
    V4l2m2m,
}

impl AccelerationPreference {
    /// The single backend requested, or None for Auto/Software
    pub fn to_backend(&self) -> Option<HwBackend> {
        match self {
            AccelerationPreference::Auto | AccelerationPreference::Software => None,
            AccelerationPreference::Cuda => Some(HwBackend::Cuda),
            AccelerationPreference::Qsv => Some(HwBackend::Qsv),
            AccelerationPreference::Vaapi => Some(HwBackend::Vaapi),
            AccelerationPreference::Rkmpp => Some(HwBackend::Rkmpp),
            AccelerationPreference::V4l2m2m => Some(HwBackend::V4l2m2m),
        }
    }
}

/// Capture parameters shared by every source kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Requested frame rate
    pub fps: u32,
    /// Bitrate hint in bits per second
    pub bitrate: u32,
    /// Device capture format (None = whatever the device is set to)
    pub format: Option<PixelFormat>,
    /// Hardware decode preference
    pub acceleration: AccelerationPreference,
    /// Frames buffered for pull-mode consumers
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 4_000_000,
            format: None,
            acceleration: AccelerationPreference::Auto,
            queue_capacity: 8,
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn validate(&self) -> Result<()> {
        validate_resolution(self.resolution())?;
        validate_fps(self.fps)?;
        validate_bitrate(self.bitrate)?;
        validate_capacity("capture.queue_capacity", self.queue_capacity)
    }
}

/// Network transport for stream sources
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Tcp => write!(f, "tcp"),
            TransportMode::Udp => write!(f, "udp"),
        }
    }
}

/// Network stream source parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSourceConfig {
    /// Stream URL (filled from `AppConfig::input` when empty)
    pub url: String,
    /// Transport protocol
    pub transport: TransportMode,
    /// Connect/read timeout in microseconds
    pub timeout_micros: u64,
    /// Reconnect after read failures
    pub reconnect_enabled: bool,
    /// Consecutive reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Flat delay between reconnect attempts in milliseconds
    pub reconnect_cooldown_ms: u64,
    /// Receive buffer size in bytes
    pub buffer_size: usize,
    /// Prefer latency over smoothness (no input buffering)
    pub low_latency: bool,
}

impl Default for NetworkSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            transport: TransportMode::Tcp,
            timeout_micros: 5_000_000,
            reconnect_enabled: true,
            max_reconnect_attempts: 5,
            reconnect_cooldown_ms: 1000,
            buffer_size: 1024 * 1024,
            low_latency: true,
        }
    }
}

impl NetworkSourceConfig {
    /// Defaults with `url` filled in
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_micros(self.timeout_micros)
    }

    pub fn cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_micros == 0 {
            return Err(Error::Config("network.timeout_micros must be > 0".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config("network.buffer_size must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Re-streaming server parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// Listen port (0 picks an ephemeral port)
    pub port: u16,
    /// Path clients request, without the leading slash
    pub stream_name: String,
    /// Maximum concurrent clients
    pub max_clients: usize,
    /// Encoder name; unknown or unavailable names fall back to "mjpeg"
    pub encoder_name: String,
    /// Encoded width
    pub width: u32,
    /// Encoded height
    pub height: u32,
    /// Encoded frame rate
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Keyframe interval in frames
    pub gop_size: u32,
    /// Disable encoder lookahead/B-frames
    pub low_latency: bool,
    /// Ingress queue capacity
    pub queue_capacity: usize,
    /// JPEG quality (1-100) for the mjpeg encoder
    pub quality: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8554,
            stream_name: "stream".to_string(),
            max_clients: 10,
            encoder_name: "mjpeg".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 4_000_000,
            gop_size: 30,
            low_latency: true,
            queue_capacity: 30,
            quality: 80,
        }
    }
}

impl ServerConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// `bind_address:port` as a socket address
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        let ip: std::net::IpAddr = self.bind_address.parse().map_err(|_| {
            Error::Config(format!("invalid bind address: {}", self.bind_address))
        })?;
        Ok(std::net::SocketAddr::new(ip, self.port))
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        validate_resolution(self.resolution())?;
        validate_fps(self.fps)?;
        validate_bitrate(self.bitrate)?;
        if self.stream_name.trim_matches('/').is_empty() {
            return Err(Error::Config("server.stream_name must not be empty".to_string()));
        }
        if self.max_clients == 0 {
            return Err(Error::Config("server.max_clients must be >= 1".to_string()));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(Error::Config(format!(
                "server.quality {} out of range 1-100",
                self.quality
            )));
        }
        validate_capacity("server.queue_capacity", self.queue_capacity)
    }
}

fn validate_resolution(resolution: Resolution) -> Result<()> {
    if resolution.is_valid() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "resolution {} must be positive and even",
            resolution
        )))
    }
}

fn validate_fps(fps: u32) -> Result<()> {
    if (MIN_FPS..=MAX_FPS).contains(&fps) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "fps {} out of range {}-{}",
            fps, MIN_FPS, MAX_FPS
        )))
    }
}

fn validate_bitrate(bitrate: u32) -> Result<()> {
    if (MIN_BITRATE..=MAX_BITRATE).contains(&bitrate) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "bitrate {} out of range {}-{}",
            bitrate, MIN_BITRATE, MAX_BITRATE
        )))
    }
}

fn validate_capacity(name: &str, capacity: usize) -> Result<()> {
    if capacity == 0 {
        Err(Error::Config(format!("{} must be >= 1", name)))
    } else {
        Ok(())
    }
}

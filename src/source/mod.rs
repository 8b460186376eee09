//! Capture side: sources, the capture engine and its reconnection policy

mod engine;
mod factory;
mod file;
mod http;
mod input;
mod mjpeg;
mod rtp;
mod supervisor;
#[cfg(feature = "v4l2")]
mod v4l2;

pub use engine::{CaptureEngine, CaptureEngineBuilder, EngineState, FrameCallback, StateCallback};
pub use factory::{CameraInfo, LocalOpener, SourceFactory};
pub use file::MjpegFileInput;
pub use http::{HttpMjpegConnector, HttpMjpegInput};
pub use input::{DeviceOpener, MediaInput, StreamConnector};
pub use mjpeg::{find_jpeg_bounds, jpeg_dimensions, JpegSplitter};
pub use rtp::{parse_rtp_packet, RtpJpegConnector, RtpJpegInput, RtpPacket};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorAction};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Input;

use std::sync::Arc;

use crate::config::{CaptureConfig, NetworkSourceConfig};
use crate::error::Result;
use crate::runtime;

/// Source variants sharing one control plane
#[derive(Clone)]
pub enum SourceKind {
    /// Camera or local file; read failures are transient
    LocalDevice {
        locator: String,
        opener: Arc<dyn DeviceOpener>,
    },
    /// Network stream; read failures go through the connection supervisor.
    /// Without an explicit connector the runtime registry picks one by scheme.
    NetworkStream {
        config: NetworkSourceConfig,
        connector: Option<Arc<dyn StreamConnector>>,
    },
}

impl SourceKind {
    /// Camera or file opened by the built-in local opener
    pub fn local(locator: impl Into<String>) -> Self {
        SourceKind::LocalDevice {
            locator: locator.into(),
            opener: Arc::new(LocalOpener),
        }
    }

    /// Network stream resolved through the runtime registry
    pub fn network(config: NetworkSourceConfig) -> Self {
        SourceKind::NetworkStream {
            config,
            connector: None,
        }
    }

    pub fn locator(&self) -> &str {
        match self {
            SourceKind::LocalDevice { locator, .. } => locator,
            SourceKind::NetworkStream { config, .. } => &config.url,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SourceKind::NetworkStream { .. })
    }

    pub fn network_config(&self) -> Option<&NetworkSourceConfig> {
        match self {
            SourceKind::NetworkStream { config, .. } => Some(config),
            SourceKind::LocalDevice { .. } => None,
        }
    }

    /// Open the device or connection with this variant's parameters
    pub fn open(&self, capture: &CaptureConfig) -> Result<Box<dyn MediaInput>> {
        match self {
            SourceKind::LocalDevice { locator, opener } => opener.open(locator, capture),
            SourceKind::NetworkStream {
                config,
                connector: Some(connector),
            } => connector.open(config),
            SourceKind::NetworkStream {
                config,
                connector: None,
            } => runtime::connector_for(&config.url)?.open(config),
        }
    }
}

impl std::fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::LocalDevice { locator, .. } => {
                f.debug_struct("LocalDevice").field("locator", locator).finish()
            }
            SourceKind::NetworkStream { config, connector } => f
                .debug_struct("NetworkStream")
                .field("url", &config.url)
                .field("transport", &config.transport)
                .field("explicit_connector", &connector.is_some())
                .finish(),
        }
    }
}

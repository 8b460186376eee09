//! Locator classification and engine construction

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::engine::CaptureEngine;
use super::file::MjpegFileInput;
use super::input::{DeviceOpener, MediaInput};
use super::SourceKind;
use crate::config::{CaptureConfig, NetworkSourceConfig, TransportMode};
use crate::error::{Error, Result};
use crate::hwaccel::HardwareContext;
use crate::video::format::PixelFormat;

/// A V4L2 capture device found by [`SourceFactory::list_cameras`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub formats: Vec<PixelFormat>,
}

/// Opens cameras through V4L2 and anything else as an MJPEG file
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOpener;

impl DeviceOpener for LocalOpener {
    fn open(&self, locator: &str, capture: &CaptureConfig) -> Result<Box<dyn MediaInput>> {
        if SourceFactory::is_camera(locator) {
            #[cfg(feature = "v4l2")]
            {
                return Ok(Box::new(super::v4l2::V4l2Input::open(locator, capture)?));
            }
            #[cfg(not(feature = "v4l2"))]
            {
                return Err(Error::Unsupported(format!(
                    "camera {} (built without v4l2)",
                    locator
                )));
            }
        }
        Ok(Box::new(MjpegFileInput::open(locator, capture.fps)?))
    }
}

/// Stateless helpers turning a locator string into a capture engine
pub struct SourceFactory;

impl SourceFactory {
    /// `/dev/video*` paths
    pub fn is_camera(locator: &str) -> bool {
        locator.starts_with("/dev/video")
    }

    /// `scheme://...` locators
    pub fn is_network(locator: &str) -> bool {
        match locator.split_once("://") {
            Some((scheme, rest)) => {
                !scheme.is_empty()
                    && !rest.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            }
            None => false,
        }
    }

    /// Map a locator to a source kind.
    ///
    /// A bare integer `N` means `/dev/videoN`.
    pub fn classify(locator: &str) -> Result<SourceKind> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(Error::Config("empty input locator".to_string()));
        }
        if locator.chars().all(|c| c.is_ascii_digit()) {
            return Ok(SourceKind::local(format!("/dev/video{}", locator)));
        }
        if Self::is_network(locator) {
            return Ok(SourceKind::network(Self::network_config(locator)));
        }
        if Self::is_camera(locator) || Path::new(locator).is_file() {
            return Ok(SourceKind::local(locator));
        }
        Err(Error::OpenFailed {
            locator: locator.to_string(),
            reason: "not a camera, stream URL or existing file".to_string(),
        })
    }

    /// Default network parameters: reconnect enabled, 5 s timeout, transport
    /// derived from the scheme (`udp` uses UDP, everything else TCP)
    pub fn network_config(url: &str) -> NetworkSourceConfig {
        let mut config = NetworkSourceConfig::for_url(url);
        config.transport = if url.starts_with("udp://") {
            TransportMode::Udp
        } else {
            TransportMode::Tcp
        };
        config.reconnect_enabled = true;
        config.timeout_micros = 5_000_000;
        config
    }

    /// Build an engine for `locator`.
    ///
    /// `network` overrides the defaults for stream URLs (its `url` is replaced).
    pub fn create(
        locator: &str,
        capture: CaptureConfig,
        network: Option<NetworkSourceConfig>,
        hw: Option<Arc<HardwareContext>>,
    ) -> Result<CaptureEngine> {
        let kind = match (Self::classify(locator)?, network) {
            (SourceKind::NetworkStream { config, connector }, Some(mut overrides)) => {
                overrides.url = config.url;
                if overrides.url.starts_with("udp://") {
                    overrides.transport = TransportMode::Udp;
                }
                SourceKind::NetworkStream {
                    config: overrides,
                    connector,
                }
            }
            (kind, _) => kind,
        };
        debug!("Creating capture engine for {:?}", kind);

        let mut builder = CaptureEngine::builder(kind, capture);
        if let Some(hw) = hw {
            builder = builder.hardware(hw);
        }
        Ok(builder.build())
    }

    /// Enumerate V4L2 capture devices
    #[cfg(feature = "v4l2")]
    pub fn list_cameras() -> Result<Vec<CameraInfo>> {
        use v4l::capability::Flags;
        use v4l::video::Capture;

        let mut cameras = Vec::new();
        for entry in std::fs::read_dir("/dev")?.flatten() {
            let path = entry.path();
            let is_video_node = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"));
            if !is_video_node {
                continue;
            }

            let device = match v4l::Device::with_path(&path) {
                Ok(device) => device,
                Err(e) => {
                    debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                debug!("Skipping non-capture node {:?}", path);
                continue;
            }

            let formats = device
                .enum_formats()
                .map(|descs| {
                    descs
                        .iter()
                        .filter_map(|d| PixelFormat::from_fourcc(d.fourcc))
                        .collect()
                })
                .unwrap_or_default();

            cameras.push(CameraInfo {
                path: path.display().to_string(),
                name: caps.card,
                driver: caps.driver,
                formats,
            });
        }

        cameras.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(cameras)
    }

    #[cfg(not(feature = "v4l2"))]
    pub fn list_cameras() -> Result<Vec<CameraInfo>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_cameras() {
        let kind = SourceFactory::classify("2").unwrap();
        assert_eq!(kind.locator(), "/dev/video2");
        assert!(!kind.is_network());

        let kind = SourceFactory::classify("/dev/video0").unwrap();
        assert_eq!(kind.locator(), "/dev/video0");
    }

    #[test]
    fn test_classify_network_defaults() {
        let kind = SourceFactory::classify("http://cam.local:8080/stream").unwrap();
        let config = kind.network_config().unwrap();
        assert_eq!(config.transport, TransportMode::Tcp);
        assert!(config.reconnect_enabled);
        assert_eq!(config.timeout_micros, 5_000_000);

        let kind = SourceFactory::classify("udp://0.0.0.0:5004").unwrap();
        assert_eq!(
            kind.network_config().unwrap().transport,
            TransportMode::Udp
        );
    }

    #[test]
    fn test_classify_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        let kind = SourceFactory::classify(path).unwrap();
        assert!(!kind.is_network());
        assert_eq!(kind.locator(), path);

        assert!(SourceFactory::classify("/nonexistent/clip.mjpeg").is_err());
        assert!(matches!(
            SourceFactory::classify("  "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_create_applies_network_overrides() {
        let overrides = NetworkSourceConfig {
            max_reconnect_attempts: 9,
            ..Default::default()
        };
        let engine = SourceFactory::create(
            "udp://127.0.0.1:5004",
            CaptureConfig::default(),
            Some(overrides),
            Some(HardwareContext::software()),
        )
        .unwrap();
        assert_eq!(engine.locator(), "udp://127.0.0.1:5004");
        assert!(!engine.hardware().is_available());
    }

    #[test]
    fn test_scheme_detection() {
        assert!(SourceFactory::is_network("rtsp://host/path"));
        assert!(!SourceFactory::is_network("://nothing"));
        assert!(!SourceFactory::is_network("/tmp/clip.mjpeg"));
    }
}

//! V4L2 camera capture (memory-mapped streaming)

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::input::MediaInput;
use crate::codec::{CodecId, RawUnit, StreamInfo};
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::video::format::{PixelFormat, Rational, Resolution};

/// Number of mmap buffers queued to the driver
const BUFFER_COUNT: u32 = 4;
/// Dequeue timeout, so a stalled device surfaces as a read error
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);
/// Anything smaller is a truncated buffer
const MIN_FRAME_SIZE: usize = 128;

pub struct V4l2Input {
    path: String,
    stream: Option<MmapStream<'static>>,
    resolution: Resolution,
    format: PixelFormat,
    fps: u32,
    opened_at: Instant,
}

impl V4l2Input {
    /// Open `path` and negotiate the closest format to `capture`.
    ///
    /// Without an explicit format, MJPEG is preferred when the device offers it.
    pub fn open(path: impl AsRef<Path>, capture: &CaptureConfig) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();
        let open_failed = |reason: String| Error::OpenFailed {
            locator: locator.clone(),
            reason,
        };

        let device = Device::with_path(path).map_err(|e| open_failed(e.to_string()))?;
        let caps = device
            .query_caps()
            .map_err(|e| open_failed(format!("query caps: {}", e)))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(Error::Unsupported(format!(
                "{} ({}) is not a capture device",
                locator, caps.card
            )));
        }

        let fourcc = Self::pick_fourcc(&device, capture.format)
            .map_err(|e| open_failed(format!("get format: {}", e)))?;
        let requested = Format::new(capture.width, capture.height, fourcc);
        let actual = Capture::set_format(&device, &requested)
            .map_err(|e| open_failed(format!("set format: {}", e)))?;
        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            Error::Unsupported(format!("device format {} on {}", actual.fourcc, locator))
        })?;
        if actual.width != capture.width || actual.height != capture.height {
            info!(
                "{} adjusted {}x{} to {}x{}",
                locator, capture.width, capture.height, actual.width, actual.height
            );
        }

        let fps = match Capture::set_params(&device, &Parameters::with_fps(capture.fps)) {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator / params.interval.numerator
            }
            Ok(_) => capture.fps,
            Err(e) => {
                warn!("{} refused {} fps: {}", locator, capture.fps, e);
                capture.fps
            }
        };

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| open_failed(format!("stream setup: {}", e)))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        info!(
            "Opened {} ({}): {}x{} {} @ {} fps",
            locator, caps.card, actual.width, actual.height, format, fps
        );

        Ok(Self {
            path: locator,
            stream: Some(stream),
            resolution: Resolution::new(actual.width, actual.height),
            format,
            fps,
            opened_at: Instant::now(),
        })
    }

    fn pick_fourcc(device: &Device, wanted: Option<PixelFormat>) -> std::io::Result<FourCC> {
        if let Some(format) = wanted {
            return Ok(format.to_fourcc());
        }
        let mjpeg = PixelFormat::Mjpeg.to_fourcc();
        let offers_mjpeg = device
            .enum_formats()
            .map(|descs| descs.iter().any(|d| d.fourcc == mjpeg))
            .unwrap_or(false);
        if offers_mjpeg {
            Ok(mjpeg)
        } else {
            Ok(Capture::format(device)?.fourcc)
        }
    }

    fn codec(&self) -> CodecId {
        if self.format.is_compressed() {
            CodecId::Mjpeg
        } else {
            CodecId::Raw(self.format)
        }
    }
}

impl MediaInput for V4l2Input {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            width: self.resolution.width,
            height: self.resolution.height,
            pixel_format: (!self.format.is_compressed()).then_some(self.format),
            codec: self.codec(),
            time_base: Rational::MICROS,
            frame_rate: Rational::new(self.fps as i32, 1),
            ..Default::default()
        }
    }

    fn read_unit(&mut self) -> Result<RawUnit> {
        let stream = self.stream.as_mut().ok_or(Error::NotRunning)?;
        let (buf, meta) = CaptureStream::next(stream).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::Timeout(format!("no frame from {}", self.path))
            }
            _ => Error::Transport(format!("dequeue on {}: {}", self.path, e)),
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            return Err(Error::InvalidFrame(format!("{} byte buffer", used)));
        }

        let ts = meta.timestamp;
        let pts = if ts.sec == 0 && ts.usec == 0 {
            self.opened_at.elapsed().as_micros() as i64
        } else {
            ts.sec as i64 * 1_000_000 + ts.usec as i64
        };

        Ok(RawUnit::video(buf[..used].to_vec(), Some(pts)))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Released {}", self.path);
        }
    }
}

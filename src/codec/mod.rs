//! Decode/encode collaborator seams
//!
//! The capture and transmission loops only talk to codecs through the
//! [`FrameDecoder`] and [`FrameEncoder`] traits. Both follow a send/receive
//! model: a submission may yield zero or more outputs, and "need more input" is
//! a normal status rather than an error.

mod raw;
#[cfg(feature = "jpeg")]
mod jpeg;

pub use raw::RawDecoder;
#[cfg(feature = "jpeg")]
pub use jpeg::{JpegEncoder, MjpegDecoder};

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hwaccel::{HardwareContext, HwBackend};
use crate::video::format::{PixelFormat, Rational, Resolution};
use crate::video::frame::FrameBuffer;

/// Name of the always-available software encoder
pub const DEFAULT_ENCODER: &str = "mjpeg";

/// Elementary stream codec of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecId {
    #[default]
    Unknown,
    /// Motion JPEG (one complete JPEG per unit)
    Mjpeg,
    /// Uncompressed frames in the given layout
    Raw(PixelFormat),
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Unknown => write!(f, "unknown"),
            CodecId::Mjpeg => write!(f, "mjpeg"),
            CodecId::Raw(format) => write!(f, "rawvideo({})", format),
        }
    }
}

/// One unit read from a source (a packet or a whole device buffer)
#[derive(Debug, Clone)]
pub struct RawUnit {
    /// Channel the unit belongs to; only the video channel is decoded
    pub stream_index: usize,
    pub data: Bytes,
    /// Presentation timestamp in the stream time base, if the source knows it
    pub pts: Option<i64>,
    pub key: bool,
}

impl RawUnit {
    pub fn video(data: impl Into<Bytes>, pts: Option<i64>) -> Self {
        Self {
            stream_index: 0,
            data: data.into(),
            pts,
            key: true,
        }
    }
}

/// Last-known properties of an opened source. Zero-valued until a source opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Host pixel format frames are delivered in
    pub pixel_format: Option<PixelFormat>,
    pub codec: CodecId,
    pub time_base: Rational,
    pub frame_rate: Rational,
    /// Total duration for finite sources
    pub duration: Option<Duration>,
    /// Bits per second, 0 if unknown
    pub bit_rate: u64,
    /// Index of the tracked video channel
    pub video_stream: usize,
}

impl StreamInfo {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// A decoded picture still resident in device memory
pub trait DeviceSurface: Send {
    /// Copy the picture to host memory
    fn download(self: Box<Self>) -> Result<FrameBuffer>;
}

pub enum DecodedPicture {
    Host(FrameBuffer),
    Device(Box<dyn DeviceSurface>),
}

impl std::fmt::Debug for DecodedPicture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedPicture::Host(frame) => f.debug_tuple("Host").field(frame).finish(),
            DecodedPicture::Device(_) => f.write_str("Device(..)"),
        }
    }
}

#[derive(Debug)]
pub enum DecodeStatus {
    Picture(DecodedPicture),
    NeedMoreInput,
    EndOfStream,
}

/// Turns raw units into pictures
pub trait FrameDecoder: Send {
    fn name(&self) -> &str;

    fn send_unit(&mut self, unit: &RawUnit) -> Result<()>;

    /// Take the next available picture
    fn receive_picture(&mut self) -> Result<DecodeStatus>;

    /// Drop buffered input and pictures (after a seek or reconnect)
    fn flush(&mut self);
}

/// Builds a decoder for an opened stream
pub type DecoderFactory =
    Arc<dyn Fn(&StreamInfo, &Arc<HardwareContext>) -> Result<Box<dyn FrameDecoder>> + Send + Sync>;

/// Software decoder for the stream's codec
pub fn open_decoder(
    info: &StreamInfo,
    _hw: &Arc<HardwareContext>,
) -> Result<Box<dyn FrameDecoder>> {
    match info.codec {
        CodecId::Raw(format) => Ok(Box::new(RawDecoder::new(info.resolution(), format)?)),
        #[cfg(feature = "jpeg")]
        CodecId::Mjpeg => Ok(Box::new(MjpegDecoder::new()?)),
        other => Err(Error::Unsupported(format!("no decoder for {}", other))),
    }
}

pub fn default_decoder_factory() -> DecoderFactory {
    Arc::new(open_decoder)
}

/// Encoder parameters derived from the server configuration
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub resolution: Resolution,
    pub fps: u32,
    /// Bits per second
    pub bitrate: u32,
    pub gop_size: u32,
    pub low_latency: bool,
    /// JPEG quality 1-100
    pub quality: u8,
    pub hw: Arc<HardwareContext>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::HD1080,
            fps: 30,
            bitrate: 4_000_000,
            gop_size: 30,
            low_latency: true,
            quality: 80,
            hw: HardwareContext::software(),
        }
    }
}

/// Encoded output
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub data: Bytes,
    /// In the encoder's time base
    pub pts: i64,
    pub dts: i64,
    pub key: bool,
}

impl EncodedPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
pub enum EncodeStatus {
    Packet(EncodedPacket),
    NeedMoreInput,
    EndOfStream,
}

/// Turns frames into packets
/// Not Sync: encoders (turbojpeg included) are driven from one thread
pub trait FrameEncoder: Send {
    fn name(&self) -> &str;

    /// Unit of the pts values passed in and returned
    fn time_base(&self) -> Rational;

    /// MIME type of a packet, for outputs that label their payload
    fn mime_type(&self) -> &str;

    fn send_frame(&mut self, frame: &FrameBuffer, pts: i64) -> Result<()>;

    /// Signal end of input so buffered packets can be drained
    fn send_eof(&mut self) -> Result<()>;

    fn receive_packet(&mut self) -> Result<EncodeStatus>;
}

type EncoderCtor = Arc<dyn Fn(&EncoderSettings) -> Result<Box<dyn FrameEncoder>> + Send + Sync>;

#[derive(Clone)]
struct EncoderEntry {
    /// Backend the encoder needs, None for software
    backend: Option<HwBackend>,
    ctor: EncoderCtor,
}

/// Named encoders the server can open
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    entries: HashMap<String, EncoderEntry>,
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("encoders", &self.names())
            .finish()
    }
}

impl EncoderRegistry {
    /// Registry with the built-in software encoder
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::default();
        #[cfg(feature = "jpeg")]
        registry.register(DEFAULT_ENCODER, None, |settings| {
            Ok(Box::new(JpegEncoder::new(settings)?) as Box<dyn FrameEncoder>)
        });
        registry
    }

    /// Add or replace an encoder. `backend` marks encoders that need hardware.
    pub fn register<F>(&mut self, name: &str, backend: Option<HwBackend>, ctor: F)
    where
        F: Fn(&EncoderSettings) -> Result<Box<dyn FrameEncoder>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            EncoderEntry {
                backend,
                ctor: Arc::new(ctor),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the encoder to open for `requested`.
    ///
    /// A hardware encoder is used only when the shared context holds its
    /// backend; unknown or unusable names fall back to [`DEFAULT_ENCODER`].
    pub fn select(&self, requested: &str, hw: &HardwareContext) -> Option<&str> {
        if let Some((name, entry)) = self.entries.get_key_value(requested) {
            let usable = match entry.backend {
                None => true,
                Some(backend) => hw.backend() == Some(backend),
            };
            if usable {
                return Some(name.as_str());
            }
            warn!(
                "Encoder {} needs {:?} but hardware context is {:?}, falling back to {}",
                requested,
                entry.backend,
                hw.backend(),
                DEFAULT_ENCODER
            );
        } else if requested != DEFAULT_ENCODER {
            warn!(
                "Encoder {} is not registered, falling back to {}",
                requested, DEFAULT_ENCODER
            );
        }

        self.entries
            .get_key_value(DEFAULT_ENCODER)
            .map(|(name, _)| name.as_str())
    }

    /// Open the encoder `select` resolves to
    pub fn open(&self, requested: &str, settings: &EncoderSettings) -> Result<Box<dyn FrameEncoder>> {
        let name = self.select(requested, &settings.hw).ok_or_else(|| {
            Error::Unsupported(format!("no usable encoder for {}", requested))
        })?;
        let entry = &self.entries[name];
        (entry.ctor)(settings)
    }
}

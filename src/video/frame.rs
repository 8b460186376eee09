//! Owned raw pixel buffers

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Plane, Rational, Resolution, MAX_PLANES};
use crate::error::{Error, Result};

/// A decoded, uncompressed video frame.
///
/// The byte length always equals `format.frame_size(resolution)` and the plane
/// table is computed once at construction. The type is move-only: handing a
/// frame to a queue or callback transfers it.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    resolution: Resolution,
    format: PixelFormat,
    planes: [Option<Plane>; MAX_PLANES],
    /// Presentation timestamp in `time_base` units
    pub timestamp: i64,
    /// Unit of `timestamp`
    pub time_base: Rational,
    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,
    /// When the raw unit this frame came from was read
    pub captured_at: Instant,
}

impl FrameBuffer {
    /// Wrap `data` as a frame, validating its length against the format
    pub fn new(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        timestamp: i64,
    ) -> Result<Self> {
        let planes = Self::layout(resolution, format)?;
        let expected: usize = planes.iter().flatten().map(|p| p.len).sum();
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{} {} needs {} bytes, got {}",
                resolution,
                format,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            data,
            resolution,
            format,
            planes,
            timestamp,
            time_base: Rational::MICROS,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// Allocate a zero-filled frame
    pub fn zeroed(resolution: Resolution, format: PixelFormat) -> Result<Self> {
        let planes = Self::layout(resolution, format)?;
        let size: usize = planes.iter().flatten().map(|p| p.len).sum();
        Self::new(vec![0u8; size], resolution, format, 0)
    }

    /// Copy `data` into a new frame (for callers holding borrowed pixels)
    pub fn copy_from_slice(
        data: &[u8],
        resolution: Resolution,
        format: PixelFormat,
        timestamp: i64,
    ) -> Result<Self> {
        Self::new(data.to_vec(), resolution, format, timestamp)
    }

    fn layout(resolution: Resolution, format: PixelFormat) -> Result<[Option<Plane>; MAX_PLANES]> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty resolution {}",
                resolution
            )));
        }
        format.plane_layout(resolution).ok_or_else(|| {
            Error::InvalidFrame(format!("{} is not a raw pixel format", format))
        })
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access; the length cannot change
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Plane descriptors; unused slots are `None`
    pub fn planes(&self) -> &[Option<Plane>; MAX_PLANES] {
        &self.planes
    }

    /// Byte offsets of the planes in use
    pub fn plane_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.planes.iter().flatten().map(|p| p.offset)
    }

    /// Borrow one plane's bytes
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let plane = self.planes.get(index).copied().flatten()?;
        self.data.get(plane.offset..plane.offset + plane.len)
    }

    /// Time since the source unit was read
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Release the pixels without copying
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}

//! Pass-through decoder for uncompressed sources

use tracing::trace;

use super::{DecodeStatus, DecodedPicture, FrameDecoder, RawUnit};
use crate::error::{Error, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::FrameBuffer;

/// Wraps each raw unit as a frame of a fixed layout.
///
/// Device buffers may carry trailing padding; anything past the frame size is
/// ignored, anything short of it is a decode error.
pub struct RawDecoder {
    resolution: Resolution,
    format: PixelFormat,
    frame_size: usize,
    pending: Option<RawUnit>,
}

impl RawDecoder {
    pub fn new(resolution: Resolution, format: PixelFormat) -> Result<Self> {
        let frame_size = format
            .frame_size(resolution)
            .filter(|&size| size > 0)
            .ok_or_else(|| {
                Error::Unsupported(format!("{} {} is not a raw layout", resolution, format))
            })?;
        Ok(Self {
            resolution,
            format,
            frame_size,
            pending: None,
        })
    }
}

impl FrameDecoder for RawDecoder {
    fn name(&self) -> &str {
        "rawvideo"
    }

    fn send_unit(&mut self, unit: &RawUnit) -> Result<()> {
        if unit.data.len() < self.frame_size {
            return Err(Error::Decode(format!(
                "short {} buffer: {} < {}",
                self.format,
                unit.data.len(),
                self.frame_size
            )));
        }
        self.pending = Some(unit.clone());
        Ok(())
    }

    fn receive_picture(&mut self) -> Result<DecodeStatus> {
        let Some(unit) = self.pending.take() else {
            return Ok(DecodeStatus::NeedMoreInput);
        };
        trace!("raw unit: {} bytes", unit.data.len());
        let frame = FrameBuffer::copy_from_slice(
            &unit.data[..self.frame_size],
            self.resolution,
            self.format,
            unit.pts.unwrap_or(0),
        )?;
        Ok(DecodeStatus::Picture(DecodedPicture::Host(frame)))
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

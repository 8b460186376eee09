//! JPEG decode and encode through turbojpeg (libjpeg-turbo, SIMD accelerated)

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::trace;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp, YuvImage};

use super::{
    DecodeStatus, DecodedPicture, EncodeStatus, EncodedPacket, EncoderSettings, FrameDecoder,
    FrameEncoder, RawUnit,
};
use crate::error::{Error, Result};
use crate::video::format::{PixelFormat, Rational, Resolution};
use crate::video::frame::FrameBuffer;

/// MJPEG decoder producing RGB24 frames
pub struct MjpegDecoder {
    decompressor: Decompressor,
    pending: Option<RawUnit>,
}

impl MjpegDecoder {
    pub fn new() -> Result<Self> {
        let decompressor = Decompressor::new().map_err(|e| {
            Error::Decode(format!("Failed to create turbojpeg decoder: {}", e))
        })?;
        Ok(Self {
            decompressor,
            pending: None,
        })
    }

    fn decode(&mut self, jpeg: &[u8], pts: i64) -> Result<FrameBuffer> {
        let header = self
            .decompressor
            .read_header(jpeg)
            .map_err(|e| Error::Decode(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        let mut image = Image {
            pixels: vec![0u8; header.height * pitch],
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(jpeg, image.as_deref_mut())
            .map_err(|e| Error::Decode(format!("turbojpeg decode failed: {}", e)))?;

        FrameBuffer::new(
            image.pixels,
            Resolution::new(header.width as u32, header.height as u32),
            PixelFormat::Rgb24,
            pts,
        )
    }
}

impl FrameDecoder for MjpegDecoder {
    fn name(&self) -> &str {
        "mjpeg (turbojpeg)"
    }

    fn send_unit(&mut self, unit: &RawUnit) -> Result<()> {
        if unit.data.len() < 4 || unit.data[0] != 0xFF || unit.data[1] != 0xD8 {
            return Err(Error::Decode("unit is not a JPEG image".to_string()));
        }
        self.pending = Some(unit.clone());
        Ok(())
    }

    fn receive_picture(&mut self) -> Result<DecodeStatus> {
        let Some(unit) = self.pending.take() else {
            return Ok(DecodeStatus::NeedMoreInput);
        };
        let frame = self.decode(&unit.data, unit.pts.unwrap_or(0))?;
        Ok(DecodeStatus::Picture(DecodedPicture::Host(frame)))
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Software MJPEG encoder.
///
/// Planar YUV and grey input is compressed directly (no colour conversion);
/// packed RGB variants go through turbojpeg's RGB path. Other layouts are
/// rejected. Every packet is a key frame, so the GOP size is irrelevant.
///
/// Not thread-safe (turbojpeg); the server drives it from its worker only.
pub struct JpegEncoder {
    compressor: Compressor,
    time_base: Rational,
    packets: VecDeque<EncodedPacket>,
    eof: bool,
}

impl JpegEncoder {
    pub fn new(settings: &EncoderSettings) -> Result<Self> {
        let mut compressor = Compressor::new().map_err(|e| {
            Error::Encode(format!("Failed to create turbojpeg compressor: {}", e))
        })?;
        compressor
            .set_quality(settings.quality.clamp(1, 100) as i32)
            .map_err(|e| Error::Encode(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(Subsamp::Sub2x2)
            .map_err(|e| Error::Encode(format!("Failed to set JPEG subsampling: {}", e)))?;

        Ok(Self {
            compressor,
            time_base: Rational::new(1, settings.fps.max(1) as i32),
            packets: VecDeque::new(),
            eof: false,
        })
    }

    pub fn supports_format(format: PixelFormat) -> bool {
        Self::yuv_subsamp(format).is_some() || Self::packed_format(format).is_some()
    }

    fn yuv_subsamp(format: PixelFormat) -> Option<Subsamp> {
        match format {
            PixelFormat::Yuv420p => Some(Subsamp::Sub2x2),
            PixelFormat::Yuv422p => Some(Subsamp::Sub2x1),
            PixelFormat::Yuv444p => Some(Subsamp::None),
            PixelFormat::Grey => Some(Subsamp::Gray),
            _ => None,
        }
    }

    fn packed_format(format: PixelFormat) -> Option<TJPixelFormat> {
        match format {
            PixelFormat::Rgb24 => Some(TJPixelFormat::RGB),
            PixelFormat::Bgr24 => Some(TJPixelFormat::BGR),
            PixelFormat::Rgba => Some(TJPixelFormat::RGBA),
            PixelFormat::Bgra => Some(TJPixelFormat::BGRA),
            _ => None,
        }
    }

    fn compress(&mut self, frame: &FrameBuffer) -> Result<Vec<u8>> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        if let Some(subsamp) = Self::yuv_subsamp(frame.format()) {
            let yuv = YuvImage {
                pixels: frame.data(),
                width,
                align: 1,
                height,
                subsamp,
            };
            return self
                .compressor
                .compress_yuv_to_vec(yuv)
                .map_err(|e| Error::Encode(format!("JPEG compression failed: {}", e)));
        }

        if let Some(format) = Self::packed_format(frame.format()) {
            let image = Image {
                pixels: frame.data(),
                width,
                pitch: frame.data().len() / height.max(1),
                height,
                format,
            };
            return self
                .compressor
                .compress_to_vec(image)
                .map_err(|e| Error::Encode(format!("JPEG compression failed: {}", e)));
        }

        Err(Error::Encode(format!(
            "Unsupported input format for JPEG: {}",
            frame.format()
        )))
    }
}

impl FrameEncoder for JpegEncoder {
    fn name(&self) -> &str {
        "mjpeg"
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn mime_type(&self) -> &str {
        "image/jpeg"
    }

    fn send_frame(&mut self, frame: &FrameBuffer, pts: i64) -> Result<()> {
        if self.eof {
            return Err(Error::Encode("frame sent after end of stream".to_string()));
        }
        let started = Instant::now();
        let jpeg = self.compress(frame)?;
        trace!(
            "JPEG {} {} -> {} bytes in {:.2}ms",
            frame.resolution(),
            frame.format(),
            jpeg.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        self.packets.push_back(EncodedPacket {
            data: Bytes::from(jpeg),
            pts,
            dts: pts,
            key: true,
        });
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<EncodeStatus> {
        match self.packets.pop_front() {
            Some(packet) => Ok(EncodeStatus::Packet(packet)),
            None if self.eof => Ok(EncodeStatus::EndOfStream),
            None => Ok(EncodeStatus::NeedMoreInput),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(res: Resolution, format: PixelFormat) -> FrameBuffer {
        let mut frame = FrameBuffer::zeroed(res, format).unwrap();
        for (i, b) in frame.data_mut().iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        frame
    }

    fn encode_one(encoder: &mut JpegEncoder, frame: &FrameBuffer, pts: i64) -> EncodedPacket {
        encoder.send_frame(frame, pts).unwrap();
        match encoder.receive_packet().unwrap() {
            EncodeStatus::Packet(p) => p,
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_then_decode_yuv420p() {
        let settings = EncoderSettings {
            fps: 25,
            ..Default::default()
        };
        let mut encoder = JpegEncoder::new(&settings).unwrap();
        assert_eq!(encoder.time_base(), Rational::new(1, 25));

        let frame = gradient(Resolution::new(64, 48), PixelFormat::Yuv420p);
        let packet = encode_one(&mut encoder, &frame, 3);
        assert_eq!(&packet.data[..2], &[0xFF, 0xD8]);
        assert_eq!(packet.pts, 3);
        assert!(matches!(
            encoder.receive_packet().unwrap(),
            EncodeStatus::NeedMoreInput
        ));

        let mut decoder = MjpegDecoder::new().unwrap();
        decoder
            .send_unit(&RawUnit::video(packet.data.clone(), Some(3)))
            .unwrap();
        match decoder.receive_picture().unwrap() {
            DecodeStatus::Picture(DecodedPicture::Host(decoded)) => {
                assert_eq!(decoded.resolution(), Resolution::new(64, 48));
                assert_eq!(decoded.format(), PixelFormat::Rgb24);
                assert_eq!(decoded.timestamp, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_packed_rgb_input() {
        let mut encoder = JpegEncoder::new(&EncoderSettings::default()).unwrap();
        let frame = gradient(Resolution::new(32, 16), PixelFormat::Bgra);
        let packet = encode_one(&mut encoder, &frame, 0);
        assert!(packet.key);
    }

    #[test]
    fn test_unsupported_input_rejected() {
        let mut encoder = JpegEncoder::new(&EncoderSettings::default()).unwrap();
        let frame = gradient(Resolution::new(16, 16), PixelFormat::Nv12);
        let err = encoder.send_frame(&frame, 0).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
        assert!(!JpegEncoder::supports_format(PixelFormat::Yuyv));
    }

    #[test]
    fn test_eof_drains_then_ends() {
        let mut encoder = JpegEncoder::new(&EncoderSettings::default()).unwrap();
        let frame = gradient(Resolution::new(16, 16), PixelFormat::Grey);
        encoder.send_frame(&frame, 0).unwrap();
        encoder.send_eof().unwrap();
        assert!(matches!(encoder.receive_packet().unwrap(), EncodeStatus::Packet(_)));
        assert!(matches!(encoder.receive_packet().unwrap(), EncodeStatus::EndOfStream));
        assert!(encoder.send_frame(&frame, 1).is_err());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = MjpegDecoder::new().unwrap();
        assert!(decoder.send_unit(&RawUnit::video(vec![0u8; 16], None)).is_err());
    }
}

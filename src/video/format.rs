//! Pixel format definitions, plane layouts and time bases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of planes a frame can carry
pub const MAX_PLANES: usize = 4;

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// MJPEG compressed format (capture side only, never held in a FrameBuffer)
    Mjpeg,
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// UYVY 4:2:2 packed format
    Uyvy,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
    /// YUV420 planar format (I420)
    Yuv420p,
    /// YUV422 planar format
    Yuv422p,
    /// YUV444 planar format
    Yuv444p,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
    /// RGBA format (4 bytes per pixel)
    Rgba,
    /// BGRA format (4 bytes per pixel)
    Bgra,
    /// Grayscale format
    Grey,
}

/// Offset, length and stride of one plane inside a contiguous frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub len: usize,
    pub stride: usize,
}

impl PixelFormat {
    /// Check if format is compressed (JPEG/MJPEG)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Number of planes for uncompressed formats (0 for compressed)
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Mjpeg => 0,
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 3,
            _ => 1,
        }
    }

    /// Compute the tightly packed plane layout (no row padding) for a resolution.
    ///
    /// Chroma dimensions round up for odd sizes. Returns None for compressed formats.
    pub fn plane_layout(&self, resolution: Resolution) -> Option<[Option<Plane>; MAX_PLANES]> {
        let w = resolution.width as usize;
        let h = resolution.height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        let mut planes = [None; MAX_PLANES];
        let mut offset = 0usize;
        let mut push = |idx: usize, stride: usize, rows: usize| {
            let len = stride * rows;
            planes[idx] = Some(Plane {
                offset,
                len,
                stride,
            });
            offset += len;
        };

        match self {
            PixelFormat::Mjpeg => return None,
            PixelFormat::Yuyv | PixelFormat::Uyvy => push(0, cw * 4, h),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => push(0, w * 3, h),
            PixelFormat::Rgba | PixelFormat::Bgra => push(0, w * 4, h),
            PixelFormat::Grey => push(0, w, h),
            PixelFormat::Nv12 => {
                push(0, w, h);
                push(1, cw * 2, ch);
            }
            PixelFormat::Yuv420p => {
                push(0, w, h);
                push(1, cw, ch);
                push(2, cw, ch);
            }
            PixelFormat::Yuv422p => {
                push(0, w, h);
                push(1, cw, h);
                push(2, cw, h);
            }
            PixelFormat::Yuv444p => {
                push(0, w, h);
                push(1, w, h);
                push(2, w, h);
            }
        }

        Some(planes)
    }

    /// Calculate expected frame size for a given resolution
    /// Returns None for compressed formats (variable size)
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        let planes = self.plane_layout(resolution)?;
        Some(planes.iter().flatten().map(|p| p.len).sum())
    }

    /// Convert to V4L2 FourCC
    #[cfg(feature = "v4l2")]
    pub fn to_fourcc(&self) -> v4l::FourCC {
        match self {
            PixelFormat::Mjpeg => v4l::FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => v4l::FourCC::new(b"YUYV"),
            PixelFormat::Uyvy => v4l::FourCC::new(b"UYVY"),
            PixelFormat::Nv12 => v4l::FourCC::new(b"NV12"),
            PixelFormat::Yuv420p => v4l::FourCC::new(b"YU12"),
            PixelFormat::Yuv422p => v4l::FourCC::new(b"422P"),
            PixelFormat::Yuv444p => v4l::FourCC::new(b"444P"),
            PixelFormat::Rgb24 => v4l::FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => v4l::FourCC::new(b"BGR3"),
            PixelFormat::Rgba => v4l::FourCC::new(b"AB24"),
            PixelFormat::Bgra => v4l::FourCC::new(b"AR24"),
            PixelFormat::Grey => v4l::FourCC::new(b"GREY"),
        }
    }

    /// Try to convert from V4L2 FourCC
    #[cfg(feature = "v4l2")]
    pub fn from_fourcc(fourcc: v4l::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"UYVY" => Some(PixelFormat::Uyvy),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YU12" | b"I420" => Some(PixelFormat::Yuv420p),
            b"422P" => Some(PixelFormat::Yuv422p),
            b"444P" => Some(PixelFormat::Yuv444p),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"AB24" => Some(PixelFormat::Rgba),
            b"AR24" => Some(PixelFormat::Bgra),
            b"GREY" | b"Y800" => Some(PixelFormat::Grey),
            _ => None,
        }
    }

    /// Get all supported formats
    pub fn all() -> &'static [PixelFormat] {
        &[
            PixelFormat::Mjpeg,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::Nv12,
            PixelFormat::Yuv420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Grey,
        ]
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuv420p => "YUV420P",
            PixelFormat::Yuv422p => "YUV422P",
            PixelFormat::Yuv444p => "YUV444P",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Grey => "GREY",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MJPEG" | "MJPG" | "JPEG" => Ok(PixelFormat::Mjpeg),
            "YUYV" | "YUYV422" | "YUY2" => Ok(PixelFormat::Yuyv),
            "UYVY" | "UYVY422" => Ok(PixelFormat::Uyvy),
            "NV12" => Ok(PixelFormat::Nv12),
            "YUV420P" | "YUV420" | "I420" => Ok(PixelFormat::Yuv420p),
            "YUV422P" => Ok(PixelFormat::Yuv422p),
            "YUV444P" => Ok(PixelFormat::Yuv444p),
            "RGB24" => Ok(PixelFormat::Rgb24),
            "BGR24" => Ok(PixelFormat::Bgr24),
            "RGBA" => Ok(PixelFormat::Rgba),
            "BGRA" => Ok(PixelFormat::Bgra),
            "GREY" | "GRAY" | "GRAY8" => Ok(PixelFormat::Grey),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Positive and even in both dimensions (encoders reject odd chroma sizes)
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.width % 2 == 0 && self.height % 2 == 0
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Rational number used for time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Microsecond time base
    pub const MICROS: Rational = Rational::new(1, 1_000_000);
    /// Millisecond time base
    pub const MILLIS: Rational = Rational::new(1, 1_000);
    /// RTP video clock
    pub const RTP_90K: Rational = Rational::new(1, 90_000);

    pub fn is_zero(&self) -> bool {
        self.num == 0 || self.den == 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Rescale `value` expressed in `from` units into `to` units, rounding to nearest
    /// (halves away from zero). Zero-valued bases leave the value untouched.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        if from.is_zero() || to.is_zero() || from == to {
            return value;
        }
        let mut num = value as i128 * from.num as i128 * to.den as i128;
        let mut den = from.den as i128 * to.num as i128;
        if den < 0 {
            num = -num;
            den = -den;
        }
        let rounded = (num + den / 2 * num.signum()) / den;
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let res = Resolution::new(640, 480);
        assert_eq!(PixelFormat::Yuv420p.frame_size(res), Some(640 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Nv12.frame_size(res), Some(640 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Yuyv.frame_size(res), Some(640 * 480 * 2));
        assert_eq!(PixelFormat::Yuv422p.frame_size(res), Some(640 * 480 * 2));
        assert_eq!(PixelFormat::Yuv444p.frame_size(res), Some(640 * 480 * 3));
        assert_eq!(PixelFormat::Rgb24.frame_size(res), Some(640 * 480 * 3));
        assert_eq!(PixelFormat::Bgra.frame_size(res), Some(640 * 480 * 4));
        assert_eq!(PixelFormat::Grey.frame_size(res), Some(640 * 480));
        assert_eq!(PixelFormat::Mjpeg.frame_size(res), None);
    }

    #[test]
    fn test_odd_resolution_rounds_chroma_up() {
        let res = Resolution::new(5, 3);
        // Y = 15, U = V = 3 * 2
        assert_eq!(PixelFormat::Yuv420p.frame_size(res), Some(15 + 6 + 6));
        // NV12 UV row holds 3 interleaved pairs
        assert_eq!(PixelFormat::Nv12.frame_size(res), Some(15 + 12));
    }

    #[test]
    fn test_plane_layouts_are_disjoint_and_in_bounds() {
        let resolutions = [
            Resolution::new(2, 2),
            Resolution::new(17, 9),
            Resolution::new(640, 480),
            Resolution::new(1920, 1080),
        ];
        for &format in PixelFormat::all() {
            for &res in &resolutions {
                let Some(planes) = format.plane_layout(res) else {
                    assert!(format.is_compressed());
                    continue;
                };
                let total = format.frame_size(res).unwrap();
                let planes: Vec<_> = planes.iter().flatten().collect();
                assert_eq!(planes.len(), format.plane_count());
                assert_eq!(planes[0].offset, 0);
                for pair in planes.windows(2) {
                    assert!(pair[0].offset + pair[0].len <= pair[1].offset, "{} {}", format, res);
                }
                let last = planes.last().unwrap();
                assert!(last.offset + last.len <= total);
            }
        }
    }

    #[test]
    fn test_format_roundtrip_names() {
        for &format in PixelFormat::all() {
            let parsed: PixelFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
        assert_eq!("i420".parse::<PixelFormat>(), Ok(PixelFormat::Yuv420p));
        assert!("h264".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_resolution_validity() {
        assert!(Resolution::HD1080.is_valid());
        assert!(!Resolution::new(641, 480).is_valid());
        assert!(!Resolution::new(0, 480).is_valid());
    }

    #[test]
    fn test_rescale() {
        // encoder tick at 30 fps -> 90 kHz clock
        assert_eq!(Rational::rescale(1, Rational::new(1, 30), Rational::RTP_90K), 3000);
        assert_eq!(Rational::rescale(45, Rational::new(1, 30), Rational::MILLIS), 1500);
        // rounding to nearest
        assert_eq!(Rational::rescale(1, Rational::new(1, 3), Rational::MILLIS), 333);
        assert_eq!(Rational::rescale(2, Rational::new(1, 3), Rational::MILLIS), 667);
        assert_eq!(Rational::rescale(-2, Rational::new(1, 3), Rational::MILLIS), -667);
        // zero base leaves the value alone
        assert_eq!(Rational::rescale(42, Rational::default(), Rational::MILLIS), 42);
    }

    #[test]
    fn test_rescale_negative_rounds_away_from_zero() {
        assert_eq!(Rational::rescale(-1, Rational::new(1, 3), Rational::MILLIS), -333);
        assert_eq!(Rational::rescale(-5, Rational::new(1, 3), Rational::MILLIS), -1667);
        // exact half
        assert_eq!(Rational::rescale(-1, Rational::new(1, 2), Rational::new(1, 1)), -1);
        assert_eq!(Rational::rescale(1, Rational::new(1, 2), Rational::new(1, 1)), 1);
        // negative denominator in a base
        assert_eq!(Rational::rescale(2, Rational::new(1, 3), Rational::new(-1, 1000)), -667);
        assert_eq!(Rational::rescale(-2, Rational::new(1, 3), Rational::new(-1, 1000)), 667);
    }
}

//! Local concatenated-JPEG (`.mjpeg`) files
//!
//! The whole file is indexed at open time. Frame `i` is stamped `i` in a
//! `1/fps` time base, so a seek target maps straight to a frame index.

use bytes::Bytes;
use std::ops::Range;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::input::MediaInput;
use super::mjpeg::{find_jpeg_bounds, jpeg_dimensions};
use crate::codec::{CodecId, RawUnit, StreamInfo};
use crate::error::{Error, Result};
use crate::video::format::Rational;

pub struct MjpegFileInput {
    path: String,
    data: Bytes,
    frames: Vec<Range<usize>>,
    fps: u32,
    width: u32,
    height: u32,
    position: usize,
    /// Real-time pacing anchor: (when, frame index)
    pace_from: Option<(Instant, usize)>,
    paced: bool,
}

impl MjpegFileInput {
    /// Open and index `path`, reading at `fps` in real time
    pub fn open(path: impl AsRef<Path>, fps: u32) -> Result<Self> {
        Self::open_with(path, fps, true)
    }

    /// Open without pacing; `read_unit` returns frames as fast as they are asked for
    pub fn open_unpaced(path: impl AsRef<Path>, fps: u32) -> Result<Self> {
        Self::open_with(path, fps, false)
    }

    fn open_with(path: impl AsRef<Path>, fps: u32, paced: bool) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();
        let data = std::fs::read(path).map_err(|e| Error::OpenFailed {
            locator: locator.clone(),
            reason: e.to_string(),
        })?;
        let data = Bytes::from(data);

        let frames = index_frames(&data);
        let Some(first) = frames.first() else {
            return Err(Error::OpenFailed {
                locator,
                reason: "no JPEG frames found".to_string(),
            });
        };
        let (width, height) = jpeg_dimensions(&data[first.clone()]).unwrap_or((0, 0));

        debug!(
            "Indexed {} frames ({}x{}) in {}",
            frames.len(),
            width,
            height,
            locator
        );

        Ok(Self {
            path: locator,
            data,
            frames,
            fps: fps.max(1),
            width,
            height,
            position: 0,
            pace_from: None,
            paced,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, self.fps as i32)
    }

    fn pace(&mut self) {
        if !self.paced {
            return;
        }
        let (anchor, anchor_index) = *self
            .pace_from
            .get_or_insert((Instant::now(), self.position));
        let frames_ahead = self.position.saturating_sub(anchor_index) as u64;
        let due = anchor + Duration::from_micros(frames_ahead * 1_000_000 / self.fps as u64);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

fn index_frames(data: &[u8]) -> Vec<Range<usize>> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while let Some((start, end)) = find_jpeg_bounds(&data[offset..]) {
        frames.push(offset + start..offset + end);
        offset += end;
    }
    frames
}

impl MediaInput for MjpegFileInput {
    fn stream_info(&self) -> StreamInfo {
        let count = self.frames.len() as u64;
        let fps = self.fps as u64;
        StreamInfo {
            width: self.width,
            height: self.height,
            pixel_format: None,
            codec: CodecId::Mjpeg,
            time_base: self.time_base(),
            frame_rate: Rational::new(self.fps as i32, 1),
            duration: Some(Duration::from_micros(count * 1_000_000 / fps)),
            bit_rate: self.data.len() as u64 * 8 * fps / count.max(1),
            video_stream: 0,
        }
    }

    fn read_unit(&mut self) -> Result<RawUnit> {
        let Some(range) = self.frames.get(self.position).cloned() else {
            return Err(Error::EndOfStream);
        };
        self.pace();

        let unit = RawUnit {
            stream_index: 0,
            data: self.data.slice(range),
            pts: Some(self.position as i64),
            key: true,
        };
        self.position += 1;
        Ok(unit)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, target: Duration) -> Result<()> {
        let ts = (target.as_micros() * self.fps as u128 / 1_000_000) as usize;
        self.position = ts.min(self.frames.len().saturating_sub(1));
        self.pace_from = None;
        debug!("Seeked {} to frame {}", self.path, self.position);
        Ok(())
    }

    fn expected_units(&self) -> Option<u64> {
        Some(self.position as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mjpeg::tests::fake_jpeg;
    use std::io::Write;

    fn write_clip(frames: u8) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..frames {
            file.write_all(&fake_jpeg(320, 240, i)).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn fill_of(unit: &RawUnit) -> u8 {
        // first scan byte after the SOS marker
        let sos = unit.data.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
        unit.data[sos + 2]
    }

    #[test]
    fn test_reads_every_frame_then_eos() {
        let clip = write_clip(4);
        let mut input = MjpegFileInput::open_unpaced(clip.path(), 10).unwrap();
        assert_eq!(input.frame_count(), 4);

        let info = input.stream_info();
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!(info.codec, CodecId::Mjpeg);
        assert_eq!(info.time_base, Rational::new(1, 10));
        assert_eq!(info.duration, Some(Duration::from_millis(400)));

        for i in 0..4 {
            let unit = input.read_unit().unwrap();
            assert_eq!(unit.pts, Some(i));
            assert_eq!(fill_of(&unit), i as u8);
        }
        assert!(matches!(input.read_unit(), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_seek_lands_on_frame_at_or_before_target() {
        let clip = write_clip(10);
        let mut input = MjpegFileInput::open_unpaced(clip.path(), 10).unwrap();
        while input.read_unit().is_ok() {}

        // 350ms at 10fps: frames at 300 and 400, take 300
        input.seek(Duration::from_millis(350)).unwrap();
        assert_eq!(input.read_unit().unwrap().pts, Some(3));

        input.seek(Duration::from_secs(60)).unwrap();
        assert_eq!(input.read_unit().unwrap().pts, Some(9));

        input.seek(Duration::ZERO).unwrap();
        assert_eq!(input.read_unit().unwrap().pts, Some(0));
    }

    #[test]
    fn test_empty_or_missing_file_fails_open() {
        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            MjpegFileInput::open(empty.path(), 30),
            Err(Error::OpenFailed { .. })
        ));
        assert!(matches!(
            MjpegFileInput::open("/nonexistent/clip.mjpeg", 30),
            Err(Error::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_paced_reads_follow_frame_rate() {
        let clip = write_clip(3);
        let mut input = MjpegFileInput::open(clip.path(), 50).unwrap();
        let started = Instant::now();
        for _ in 0..3 {
            input.read_unit().unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}

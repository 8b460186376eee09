//! Helpers for locating JPEG images inside byte streams

use std::io::Read;

use crate::error::{Error, Result};

/// Largest single JPEG accepted from a stream
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// Bounds of the first complete SOI..EOI image in `buffer`
pub fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let body = &buffer[start + 2..];
    let end = body.windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

/// Width and height from the first start-of-frame segment
pub fn jpeg_dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return None;
        }
        let marker = jpeg[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            return None;
        }

        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let seg = jpeg.get(pos + 4..pos + 9)?;
            let height = u16::from_be_bytes([seg[1], seg[2]]) as u32;
            let width = u16::from_be_bytes([seg[3], seg[4]]) as u32;
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}

/// Splits a byte stream (e.g. a multipart HTTP body) into JPEG images.
///
/// Boundary lines and part headers between images are skipped.
pub struct JpegSplitter<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> JpegSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Read until one complete image is buffered
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self.reader.read(&mut chunk).map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    Error::Timeout(format!("stream read: {}", e))
                }
                _ => Error::Transport(format!("stream read: {}", e)),
            })?;
            if read == 0 {
                return Err(Error::EndOfStream);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                // keep a possible split SOI marker
                let drain_len = self.buffer.len() - 1;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal marker skeleton with a SOF0 segment; not decodable
    pub(crate) fn fake_jpeg(width: u16, height: u16, fill: u8) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        jpeg.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        jpeg.extend_from_slice(&height.to_be_bytes());
        jpeg.extend_from_slice(&width.to_be_bytes());
        jpeg.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
        jpeg.extend_from_slice(&[0xFF, 0xDA, fill, fill, fill]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_find_bounds_skips_leading_garbage() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let offset = data.len();
        let jpeg = fake_jpeg(4, 2, 7);
        data.extend_from_slice(&jpeg);
        data.extend_from_slice(b"\r\n--frame");

        assert_eq!(find_jpeg_bounds(&data), Some((offset, offset + jpeg.len())));
        assert_eq!(find_jpeg_bounds(&data[..offset + 10]), None);
    }

    #[test]
    fn test_dimensions_from_sof() {
        assert_eq!(jpeg_dimensions(&fake_jpeg(640, 480, 1)), Some((640, 480)));
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
    }

    #[test]
    fn test_splitter_yields_each_image() {
        let mut stream = Vec::new();
        for i in 0..3u8 {
            stream.extend_from_slice(b"--frame\r\n\r\n");
            stream.extend_from_slice(&fake_jpeg(8, 8, i));
        }
        let mut splitter = JpegSplitter::new(std::io::Cursor::new(stream));
        for i in 0..3u8 {
            let jpeg = splitter.next_jpeg().unwrap();
            assert_eq!(jpeg, fake_jpeg(8, 8, i));
        }
        assert!(matches!(splitter.next_jpeg(), Err(Error::EndOfStream)));
    }
}

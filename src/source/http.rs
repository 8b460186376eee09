//! Multipart MJPEG over HTTP (`http://`, `https://`)

use std::io::Read;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

use super::input::{MediaInput, StreamConnector};
use super::mjpeg::{jpeg_dimensions, JpegSplitter, MAX_JPEG_BYTES};
use crate::codec::{CodecId, RawUnit, StreamInfo};
use crate::config::{NetworkSourceConfig, TransportMode};
use crate::error::{Error, Result};
use crate::video::format::Rational;

type BodyReader = Box<dyn Read + Send + Sync + 'static>;

enum Body {
    /// `multipart/x-mixed-replace` stream
    Multipart(JpegSplitter<BodyReader>),
    /// Plain `image/jpeg` endpoint, re-fetched for every unit
    Snapshot,
}

/// Built-in connector for HTTP MJPEG cameras
#[derive(Debug, Default)]
pub struct HttpMjpegConnector;

impl StreamConnector for HttpMjpegConnector {
    fn open(&self, config: &NetworkSourceConfig) -> Result<Box<dyn MediaInput>> {
        Ok(Box::new(HttpMjpegInput::connect(config)?))
    }
}

pub struct HttpMjpegInput {
    url: String,
    agent: ureq::Agent,
    body: Body,
    pending: Option<Vec<u8>>,
    width: u32,
    height: u32,
    connected_at: Instant,
}

impl HttpMjpegInput {
    pub fn connect(config: &NetworkSourceConfig) -> Result<Self> {
        if config.transport == TransportMode::Udp {
            return Err(Error::Unsupported(format!(
                "UDP transport for HTTP stream {}",
                config.url
            )));
        }
        let url = Url::parse(&config.url).map_err(|e| Error::OpenFailed {
            locator: config.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Unsupported(format!("scheme {}", url.scheme())));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout())
            .timeout_read(config.timeout())
            .build();

        let response = get(&agent, &config.url)?;
        let content_type = response
            .header("Content-Type")
            .unwrap_or("")
            .to_ascii_lowercase();
        debug!("{} answered with {}", config.url, content_type);

        // the first image tells us the resolution
        let (body, first) = if content_type.contains("multipart") {
            let mut splitter = JpegSplitter::new(response.into_reader());
            let first = splitter.next_jpeg();
            (Body::Multipart(splitter), first)
        } else {
            (Body::Snapshot, read_snapshot(response))
        };
        let first = first.map_err(|e| Error::OpenFailed {
            locator: config.url.clone(),
            reason: e.to_string(),
        })?;
        let (width, height) = jpeg_dimensions(&first).unwrap_or((0, 0));

        info!(
            "Connected to {} ({}x{}, {})",
            config.url,
            width,
            height,
            if matches!(body, Body::Multipart(_)) {
                "multipart"
            } else {
                "snapshot"
            }
        );

        Ok(Self {
            url: config.url.clone(),
            agent,
            body,
            pending: Some(first),
            width,
            height,
            connected_at: Instant::now(),
        })
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        if let Some(jpeg) = self.pending.take() {
            return Ok(jpeg);
        }
        match &mut self.body {
            Body::Multipart(splitter) => splitter.next_jpeg(),
            Body::Snapshot => read_snapshot(get(&self.agent, &self.url)?),
        }
    }
}

fn get(agent: &ureq::Agent, url: &str) -> Result<ureq::Response> {
    agent.get(url).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => Error::OpenFailed {
            locator: url.to_string(),
            reason: format!("HTTP {}", code),
        },
        ureq::Error::Transport(t) => Error::OpenFailed {
            locator: url.to_string(),
            reason: t.to_string(),
        },
    })
}

fn read_snapshot(response: ureq::Response) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut jpeg)
        .map_err(|e| Error::Transport(format!("snapshot read: {}", e)))?;
    if jpeg.is_empty() {
        return Err(Error::Transport("empty snapshot".to_string()));
    }
    Ok(jpeg)
}

impl MediaInput for HttpMjpegInput {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            width: self.width,
            height: self.height,
            codec: CodecId::Mjpeg,
            time_base: Rational::MICROS,
            ..Default::default()
        }
    }

    fn read_unit(&mut self) -> Result<RawUnit> {
        let jpeg = self.next_jpeg()?;
        let pts = self.connected_at.elapsed().as_micros() as i64;
        Ok(RawUnit::video(jpeg, Some(pts)))
    }

    fn close(&mut self) {
        debug!("Closing {}", self.url);
        self.body = Body::Snapshot;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mjpeg::tests::fake_jpeg;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    /// Serve one multipart response with `frames` images, then hang up
    fn serve_multipart(frames: u8) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
                      Connection: close\r\n\r\n",
                )
                .unwrap();
            for i in 0..frames {
                let jpeg = fake_jpeg(64, 32, i);
                let header = format!(
                    "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    jpeg.len()
                );
                stream.write_all(header.as_bytes()).unwrap();
                stream.write_all(&jpeg).unwrap();
                stream.write_all(b"\r\n").unwrap();
            }
        });
        format!("http://{}/stream", addr)
    }

    #[test]
    fn test_reads_multipart_frames() {
        let url = serve_multipart(3);
        let mut input = HttpMjpegInput::connect(&NetworkSourceConfig::for_url(&url)).unwrap();
        let info = input.stream_info();
        assert_eq!((info.width, info.height), (64, 32));
        assert_eq!(info.codec, CodecId::Mjpeg);

        let mut last_pts = -1;
        for i in 0..3u8 {
            let unit = input.read_unit().unwrap();
            assert_eq!(unit.data.as_ref(), fake_jpeg(64, 32, i).as_slice());
            let pts = unit.pts.unwrap();
            assert!(pts >= last_pts);
            last_pts = pts;
        }
        assert!(input.read_unit().is_err());
    }

    #[test]
    fn test_udp_transport_rejected() {
        let config = NetworkSourceConfig {
            transport: TransportMode::Udp,
            ..NetworkSourceConfig::for_url("http://127.0.0.1:1/stream")
        };
        assert!(matches!(
            HttpMjpegInput::connect(&config),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_refused_connection_is_open_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{}/stream", addr);
        assert!(matches!(
            HttpMjpegInput::connect(&NetworkSourceConfig::for_url(url)),
            Err(Error::OpenFailed { .. })
        ));
    }
}

//! Multipart MJPEG over HTTP
//!
//! Each client that requests `GET /<stream_name>` gets a
//! `multipart/x-mixed-replace` response and every later packet as one part.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ClientEvent, StreamOutput};
use crate::codec::EncodedPacket;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::utils::bind_tcp_listener;
use crate::video::format::Rational;

const BOUNDARY: &str = "frame";
/// How long a new connection gets to send its request line
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// A client that cannot take a part within this is dropped
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_REQUEST_HEAD: usize = 8 * 1024;

struct Client {
    addr: SocketAddr,
    stream: TcpStream,
}

pub struct MjpegHttpOutput {
    listener: Option<TcpListener>,
    path: String,
    max_clients: usize,
    mime_type: String,
    clients: Vec<Client>,
    /// Clients lost while writing, reported on the next poll
    departed: Vec<ClientEvent>,
}

impl Default for MjpegHttpOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegHttpOutput {
    pub fn new() -> Self {
        Self {
            listener: None,
            path: String::new(),
            max_clients: 0,
            mime_type: "image/jpeg".to_string(),
            clients: Vec::new(),
            departed: Vec::new(),
        }
    }

    /// Bound address, once opened
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn read_request_path(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        let mut head = Vec::with_capacity(512);
        let mut chunk = [0u8; 512];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            if head.len() >= MAX_REQUEST_HEAD {
                return Ok(None);
            }
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            head.extend_from_slice(&chunk[..n]);
        }

        let head = String::from_utf8_lossy(&head);
        let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("GET"), Some(target)) => {
                let path = target.split('?').next().unwrap_or(target);
                Ok(Some(path.trim_start_matches('/').to_string()))
            }
            _ => Ok(None),
        }
    }

    fn respond(stream: &mut TcpStream, status: &str) {
        let body = format!(
            "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        let _ = stream.write_all(body.as_bytes());
    }

    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) -> Option<ClientEvent> {
        if let Err(e) = stream.set_nonblocking(false) {
            debug!("Dropping {}: {}", addr, e);
            return None;
        }
        let path = match Self::read_request_path(&mut stream) {
            Ok(Some(path)) => path,
            Ok(None) => {
                Self::respond(&mut stream, "400 Bad Request");
                return None;
            }
            Err(e) => {
                debug!("No request from {}: {}", addr, e);
                return None;
            }
        };

        if path != self.path {
            debug!("{} requested unknown path /{}", addr, path);
            Self::respond(&mut stream, "404 Not Found");
            return None;
        }
        if self.clients.len() >= self.max_clients {
            warn!(
                "Rejecting {}: client limit {} reached",
                addr, self.max_clients
            );
            Self::respond(&mut stream, "503 Service Unavailable");
            return None;
        }

        let header = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
             Cache-Control: no-cache, no-store\r\n\
             Pragma: no-cache\r\n\
             Connection: close\r\n\r\n",
            BOUNDARY
        );
        let ready = stream
            .set_write_timeout(Some(WRITE_TIMEOUT))
            .and_then(|_| stream.set_nodelay(true))
            .and_then(|_| stream.write_all(header.as_bytes()));
        if let Err(e) = ready {
            debug!("Client {} went away during handshake: {}", addr, e);
            return None;
        }

        self.clients.push(Client { addr, stream });
        Some(ClientEvent::Connected(addr))
    }
}

impl StreamOutput for MjpegHttpOutput {
    fn open(&mut self, config: &ServerConfig) -> Result<()> {
        let addr = config.socket_addr()?;
        let listener = bind_tcp_listener(addr).map_err(|e| Error::OpenFailed {
            locator: addr.to_string(),
            reason: e.to_string(),
        })?;
        self.path = config.stream_name.trim_matches('/').to_string();
        self.max_clients = config.max_clients;
        info!(
            "Serving MJPEG on http://{}/{}",
            listener.local_addr().unwrap_or(addr),
            self.path
        );
        self.listener = Some(listener);
        Ok(())
    }

    fn time_base(&self) -> Rational {
        Rational::MICROS
    }

    fn write_header(&mut self, mime_type: &str) -> Result<()> {
        if self.listener.is_none() {
            return Err(Error::NotRunning);
        }
        self.mime_type = mime_type.to_string();
        Ok(())
    }

    fn poll_clients(&mut self) -> Vec<ClientEvent> {
        let mut events = std::mem::take(&mut self.departed);
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => break,
            };
            match accepted {
                Ok((stream, addr)) => events.extend(self.admit(stream, addr)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
        events
    }

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<usize> {
        if self.clients.is_empty() {
            return Ok(0);
        }
        let head = format!(
            "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            self.mime_type,
            packet.len()
        );

        let mut written = 0;
        let mut failures = 0;
        let departed = &mut self.departed;
        self.clients.retain_mut(|client| {
            let result = client
                .stream
                .write_all(head.as_bytes())
                .and_then(|_| client.stream.write_all(&packet.data))
                .and_then(|_| client.stream.write_all(b"\r\n"));
            match result {
                Ok(()) => {
                    written += head.len() + packet.len() + 2;
                    true
                }
                Err(e) => {
                    debug!("Write to {} failed: {}", client.addr, e);
                    departed.push(ClientEvent::Disconnected(client.addr));
                    failures += 1;
                    false
                }
            }
        });

        if written == 0 && failures > 0 {
            return Err(Error::Transport(format!(
                "all {} clients failed",
                failures
            )));
        }
        Ok(written)
    }

    fn write_trailer(&mut self) -> Result<()> {
        let trailer = format!("--{}--\r\n", BOUNDARY);
        for client in &mut self.clients {
            let _ = client.stream.write_all(trailer.as_bytes());
        }
        Ok(())
    }

    fn close(&mut self) -> Vec<ClientEvent> {
        self.listener = None;
        let mut events = std::mem::take(&mut self.departed);
        events.extend(
            self.clients
                .drain(..)
                .map(|client| ClientEvent::Disconnected(client.addr)),
        );
        events
    }

    fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn open_output(max_clients: usize) -> MjpegHttpOutput {
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            stream_name: "/cam".into(),
            max_clients,
            ..Default::default()
        };
        let mut output = MjpegHttpOutput::new();
        output.open(&config).unwrap();
        output.write_header("image/jpeg").unwrap();
        output
    }

    fn request(output: &MjpegHttpOutput, path: &str) -> TcpStream {
        let mut stream = TcpStream::connect(output.local_addr().unwrap()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).unwrap();
        stream
    }

    fn poll_until(output: &mut MjpegHttpOutput, count: usize) -> Vec<ClientEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            events.extend(output.poll_clients());
            std::thread::sleep(Duration::from_millis(5));
        }
        events
    }

    fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        let mut byte = [0u8; 1];
        while !seen.ends_with(needle) {
            match stream.read(&mut byte) {
                Ok(1) => seen.push(byte[0]),
                _ => break,
            }
        }
        seen
    }

    #[test]
    fn test_serves_multipart_parts() {
        let mut output = open_output(4);
        let mut client = request(&output, "/cam?fps=30");
        let events = poll_until(&mut output, 1);
        assert!(matches!(events.as_slice(), [ClientEvent::Connected(_)]));
        assert_eq!(output.client_count(), 1);

        let head = String::from_utf8(read_until(&mut client, b"\r\n\r\n")).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));

        let packet = EncodedPacket {
            data: vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9].into(),
            pts: 0,
            dts: 0,
            key: true,
        };
        let written = output.write_packet(&packet).unwrap();
        assert!(written > packet.len());

        let part = String::from_utf8_lossy(&read_until(&mut client, b"\r\n\r\n")).to_string();
        assert!(part.starts_with("--frame\r\n"));
        assert!(part.contains("Content-Type: image/jpeg"));
        assert!(part.contains("Content-Length: 5"));
        let mut body = [0u8; 7];
        client.read_exact(&mut body).unwrap();
        assert_eq!(&body[..5], &packet.data[..]);

        output.write_trailer().unwrap();
        let events = output.close();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ClientEvent::Disconnected(_)));
        assert_eq!(output.client_count(), 0);
    }

    #[test]
    fn test_rejects_unknown_path_and_excess_clients() {
        let mut output = open_output(1);

        let mut stray = request(&output, "/other");
        let _first = request(&output, "/cam");
        let events = poll_until(&mut output, 1);
        assert_eq!(events.len(), 1);
        let reply = String::from_utf8(read_until(&mut stray, b"\r\n\r\n")).unwrap();
        assert!(reply.starts_with("HTTP/1.1 404"));

        let mut extra = request(&output, "/cam");
        let reply = {
            let deadline = Instant::now() + Duration::from_secs(5);
            while output.poll_clients().is_empty() && Instant::now() < deadline {
                extra.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
                let mut peek = [0u8; 1];
                if extra.peek(&mut peek).is_ok() {
                    break;
                }
            }
            extra.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            String::from_utf8(read_until(&mut extra, b"\r\n\r\n")).unwrap()
        };
        assert!(reply.starts_with("HTTP/1.1 503"));
        assert_eq!(output.client_count(), 1);
    }

    #[test]
    fn test_no_clients_writes_nothing() {
        let mut output = open_output(1);
        let packet = EncodedPacket {
            data: vec![1, 2, 3].into(),
            pts: 0,
            dts: 0,
            key: true,
        };
        assert_eq!(output.write_packet(&packet).unwrap(), 0);
        assert!(output.close().is_empty());
    }

    #[test]
    fn test_header_requires_open() {
        let mut output = MjpegHttpOutput::new();
        assert!(matches!(
            output.write_header("image/jpeg"),
            Err(Error::NotRunning)
        ));
    }
}

//! Transmission side: encode pushed frames and serve them to clients

mod mjpeg_http;
mod streamer;

pub use mjpeg_http::MjpegHttpOutput;
pub use streamer::{ClientCallback, StreamServer, StreamServerBuilder};

use std::net::SocketAddr;

use crate::codec::EncodedPacket;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::video::format::Rational;

/// Connection lifecycle reported by an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected(SocketAddr),
    Disconnected(SocketAddr),
}

/// Where encoded packets go (a muxer plus its transport).
///
/// Driven only from the server's transmission thread.
pub trait StreamOutput: Send {
    /// Bind or connect using the server parameters
    fn open(&mut self, config: &ServerConfig) -> Result<()>;

    /// Unit of the pts/dts values `write_packet` expects
    fn time_base(&self) -> Rational;

    /// Stream header; `mime_type` labels each packet
    fn write_header(&mut self, mime_type: &str) -> Result<()>;

    /// Accept or reject pending connections; also reports clients dropped
    /// during earlier writes
    fn poll_clients(&mut self) -> Vec<ClientEvent>;

    /// Send one packet (timestamps already in [`time_base`](Self::time_base));
    /// returns the bytes written
    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<usize>;

    /// Stream trailer, written once after the final packet
    fn write_trailer(&mut self) -> Result<()>;

    /// Release the transport; returns the clients that were still attached
    fn close(&mut self) -> Vec<ClientEvent>;

    fn client_count(&self) -> usize;
}

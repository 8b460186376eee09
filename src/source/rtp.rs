//! JPEG over RTP/UDP (`udp://host:port`)
//!
//! Each RTP frame carries a complete JPEG image split across packets that share
//! one RTP timestamp; the marker bit closes the frame. A sequence gap inside a
//! frame discards it and counts it as lost.

use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info, trace};
use url::Url;

use super::input::{MediaInput, StreamConnector};
use super::mjpeg::MAX_JPEG_BYTES;
use crate::codec::{CodecId, RawUnit, StreamInfo};
use crate::config::{NetworkSourceConfig, TransportMode};
use crate::error::{Error, Result};
use crate::utils::bind_udp_receiver;
use crate::video::format::Rational;

/// Static payload type for JPEG (RFC 3551)
pub const RTP_JPEG_PAYLOAD_TYPE: u8 = 26;

const RTP_HEADER_LEN: usize = 12;
const MAX_DATAGRAM: usize = 64 * 1024;

/// Parsed view of one RTP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub sequence: u16,
    pub timestamp: u32,
    pub marker: bool,
    pub payload: &'a [u8],
}

/// Parse an RTP header and return the JPEG payload
pub fn parse_rtp_packet(packet: &[u8]) -> Result<RtpPacket<'_>> {
    if packet.len() < RTP_HEADER_LEN {
        return Err(Error::Transport("RTP packet too small".to_string()));
    }
    let b0 = packet[0];
    let b1 = packet[1];
    let version = b0 >> 6;
    if version != 2 {
        return Err(Error::Transport(format!("unsupported RTP version {}", version)));
    }
    let payload_type = b1 & 0x7F;
    if payload_type != RTP_JPEG_PAYLOAD_TYPE {
        return Err(Error::Transport(format!(
            "unexpected RTP payload type {}",
            payload_type
        )));
    }

    let padding = b0 & 0x20 != 0;
    let extension = b0 & 0x10 != 0;
    let csrc_count = (b0 & 0x0F) as usize;

    let mut offset = RTP_HEADER_LEN + csrc_count * 4;
    if extension {
        let ext = packet
            .get(offset..offset + 4)
            .ok_or_else(|| Error::Transport("RTP extension header truncated".to_string()))?;
        let words = u16::from_be_bytes([ext[2], ext[3]]) as usize;
        offset += 4 + words * 4;
    }
    if packet.len() < offset {
        return Err(Error::Transport("RTP packet truncated".to_string()));
    }

    let mut end = packet.len();
    if padding {
        let pad = packet[end - 1] as usize;
        if pad == 0 || pad > end - offset {
            return Err(Error::Transport("invalid RTP padding".to_string()));
        }
        end -= pad;
    }

    Ok(RtpPacket {
        sequence: u16::from_be_bytes([packet[2], packet[3]]),
        timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        marker: b1 & 0x80 != 0,
        payload: &packet[offset..end],
    })
}

/// Built-in connector for RTP/JPEG streams
#[derive(Debug, Default)]
pub struct RtpJpegConnector;

impl StreamConnector for RtpJpegConnector {
    fn open(&self, config: &NetworkSourceConfig) -> Result<Box<dyn MediaInput>> {
        Ok(Box::new(RtpJpegInput::bind(config)?))
    }
}

/// Frame being reassembled
#[derive(Default)]
struct Assembly {
    timestamp: Option<u32>,
    data: Vec<u8>,
    corrupt: bool,
}

impl Assembly {
    fn reset(&mut self) {
        self.timestamp = None;
        self.data.clear();
        self.corrupt = false;
    }
}

pub struct RtpJpegInput {
    url: String,
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    assembly: Assembly,
    next_sequence: Option<u16>,
    /// RTP timestamp of the first completed frame, and the unwrapped last one
    first_timestamp: Option<u32>,
    last_pts: i64,
    frames_expected: u64,
}

impl RtpJpegInput {
    pub fn bind(config: &NetworkSourceConfig) -> Result<Self> {
        if config.transport != TransportMode::Udp {
            return Err(Error::Unsupported(format!(
                "{} transport for RTP stream {}",
                config.transport, config.url
            )));
        }
        let addr = bind_address(&config.url)?;
        let socket = bind_udp_receiver(addr, config.timeout(), config.buffer_size).map_err(
            |e| Error::OpenFailed {
                locator: config.url.clone(),
                reason: e.to_string(),
            },
        )?;
        let local_addr = socket.local_addr()?;
        info!("Listening for RTP/JPEG on {}", local_addr);

        Ok(Self {
            url: config.url.clone(),
            socket: Some(socket),
            local_addr,
            assembly: Assembly::default(),
            next_sequence: None,
            first_timestamp: None,
            last_pts: 0,
            frames_expected: 0,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Feed one packet; returns a complete frame when the marker closes one
    fn accept(&mut self, packet: RtpPacket<'_>) -> Option<(Vec<u8>, u32)> {
        if let Some(expected) = self.next_sequence {
            if packet.sequence != expected {
                trace!(
                    "RTP sequence gap: expected {}, got {}",
                    expected,
                    packet.sequence
                );
                self.assembly.corrupt = true;
            }
        }
        self.next_sequence = Some(packet.sequence.wrapping_add(1));

        if let Some(ts) = self.assembly.timestamp {
            if ts != packet.timestamp {
                // previous frame never saw its marker
                self.frames_expected += 1;
                self.assembly.reset();
            }
        }
        if self.assembly.timestamp.is_none() {
            self.assembly.timestamp = Some(packet.timestamp);
            // a gap before the first packet of a frame does not damage it
            self.assembly.corrupt = false;
        }

        if self.assembly.data.len() + packet.payload.len() > MAX_JPEG_BYTES {
            self.assembly.corrupt = true;
        } else {
            self.assembly.data.extend_from_slice(packet.payload);
        }

        if !packet.marker {
            return None;
        }

        self.frames_expected += 1;
        let complete = !self.assembly.corrupt && !self.assembly.data.is_empty();
        let data = std::mem::take(&mut self.assembly.data);
        self.assembly.reset();
        if complete {
            Some((data, packet.timestamp))
        } else {
            debug!("Discarding damaged RTP frame ts={}", packet.timestamp);
            None
        }
    }

    fn pts_for(&mut self, timestamp: u32) -> i64 {
        let first = *self.first_timestamp.get_or_insert(timestamp);
        // RTP timestamps wrap at 2^32; keep the unwrapped value monotonic
        let delta = timestamp.wrapping_sub(first) as i64;
        let wraps = self.last_pts >> 32;
        let mut pts = (wraps << 32) | delta;
        if pts < self.last_pts - (1 << 31) {
            pts += 1 << 32;
        }
        self.last_pts = pts;
        pts
    }
}

fn bind_address(url: &str) -> Result<SocketAddr> {
    let parsed = Url::parse(url).map_err(|e| Error::OpenFailed {
        locator: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "udp" {
        return Err(Error::Unsupported(format!("scheme {}", parsed.scheme())));
    }
    let host = parsed.host_str().unwrap_or("0.0.0.0");
    let port = parsed.port().ok_or_else(|| Error::OpenFailed {
        locator: url.to_string(),
        reason: "missing port".to_string(),
    })?;
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e: std::net::AddrParseError| Error::OpenFailed {
            locator: url.to_string(),
            reason: e.to_string(),
        })
}

impl MediaInput for RtpJpegInput {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            codec: CodecId::Mjpeg,
            time_base: Rational::RTP_90K,
            ..Default::default()
        }
    }

    fn read_unit(&mut self) -> Result<RawUnit> {
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        loop {
            let socket = self.socket.as_ref().ok_or(Error::NotRunning)?;
            let len = match socket.recv_from(&mut datagram) {
                Ok((len, _)) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(Error::Timeout(format!("no RTP data on {}", self.url)));
                }
                Err(e) => return Err(Error::Transport(format!("RTP receive: {}", e))),
            };

            let packet = match parse_rtp_packet(&datagram[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    trace!("Ignoring datagram: {}", e);
                    continue;
                }
            };
            if let Some((jpeg, timestamp)) = self.accept(packet) {
                let pts = self.pts_for(timestamp);
                return Ok(RawUnit::video(jpeg, Some(pts)));
            }
        }
    }

    fn expected_units(&self) -> Option<u64> {
        Some(self.frames_expected)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed RTP socket {}", self.local_addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(sequence: u16, timestamp: u32, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x80, RTP_JPEG_PAYLOAD_TYPE | if marker { 0x80 } else { 0 }];
        packet.extend_from_slice(&sequence.to_be_bytes());
        packet.extend_from_slice(&timestamp.to_be_bytes());
        packet.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    fn input() -> (RtpJpegInput, UdpSocket) {
        let config = NetworkSourceConfig {
            transport: TransportMode::Udp,
            timeout_micros: 500_000,
            ..NetworkSourceConfig::for_url("udp://127.0.0.1:0")
        };
        let input = RtpJpegInput::bind(&config).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(input.local_addr()).unwrap();
        (input, sender)
    }

    #[test]
    fn test_parse_header_fields() {
        let packet = rtp(7, 90_000, true, b"jpeg");
        let parsed = parse_rtp_packet(&packet).unwrap();
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.timestamp, 90_000);
        assert!(parsed.marker);
        assert_eq!(parsed.payload, b"jpeg");
    }

    #[test]
    fn test_parse_csrc_extension_and_padding() {
        let mut packet = rtp(1, 0, false, &[]);
        packet[0] |= 0x20 | 0x10 | 0x01;
        packet.extend_from_slice(&[0; 4]); // one CSRC
        packet.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]);
        packet.extend_from_slice(b"data");
        packet.extend_from_slice(&[0, 0, 3]);
        assert_eq!(parse_rtp_packet(&packet).unwrap().payload, b"data");
    }

    #[test]
    fn test_parse_rejects_bad_packets() {
        assert!(parse_rtp_packet(&[0x80; 4]).is_err());
        let mut v1 = rtp(0, 0, true, b"x");
        v1[0] = 0x40;
        assert!(parse_rtp_packet(&v1).is_err());
        let mut pt = rtp(0, 0, true, b"x");
        pt[1] = 96;
        assert!(parse_rtp_packet(&pt).is_err());
    }

    #[test]
    fn test_reassembles_on_marker() {
        let (mut input, sender) = input();
        sender.send(&rtp(10, 3000, false, b"ab")).unwrap();
        sender.send(&rtp(11, 3000, false, b"cd")).unwrap();
        sender.send(&rtp(12, 3000, true, b"ef")).unwrap();
        sender.send(&rtp(13, 6000, true, b"gh")).unwrap();

        let first = input.read_unit().unwrap();
        assert_eq!(first.data.as_ref(), b"abcdef");
        assert_eq!(first.pts, Some(0));

        let second = input.read_unit().unwrap();
        assert_eq!(second.data.as_ref(), b"gh");
        assert_eq!(second.pts, Some(3000));
        assert_eq!(input.expected_units(), Some(2));
        assert_eq!(input.stream_info().time_base, Rational::RTP_90K);
    }

    #[test]
    fn test_gap_discards_frame_and_counts_it() {
        let (mut input, sender) = input();
        sender.send(&rtp(1, 100, false, b"a")).unwrap();
        // seq 2 lost
        sender.send(&rtp(3, 100, true, b"c")).unwrap();
        sender.send(&rtp(4, 200, true, b"ok")).unwrap();

        let unit = input.read_unit().unwrap();
        assert_eq!(unit.data.as_ref(), b"ok");
        assert_eq!(input.expected_units(), Some(2));
    }

    #[test]
    fn test_silence_times_out() {
        let (mut input, _sender) = input();
        assert!(matches!(input.read_unit(), Err(Error::Timeout(_))));
        input.close();
        assert!(input.read_unit().is_err());
    }

    #[test]
    fn test_tcp_transport_rejected() {
        let config = NetworkSourceConfig::for_url("udp://127.0.0.1:0");
        assert!(matches!(
            RtpJpegInput::bind(&config),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_timestamp_wraparound_stays_monotonic() {
        let (mut input, _sender) = input();
        assert_eq!(input.pts_for(u32::MAX - 10), 0);
        assert_eq!(input.pts_for(5), 16);
    }
}

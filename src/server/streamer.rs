//! Stream server: bounded ingress queue, one encoder, one output
//!
//! Producers call [`StreamServer::push_frame`] from any thread; pushing never
//! blocks beyond a short queue lock. The transmission thread takes frames in
//! FIFO order, stamps them with a monotonically increasing pts, encodes, drains
//! every packet the encoder has ready and writes each to the output.

use parking_lot::{Condvar, Mutex};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::mjpeg_http::MjpegHttpOutput;
use super::{ClientEvent, StreamOutput};
use crate::codec::{EncodeStatus, EncodedPacket, EncoderRegistry, EncoderSettings, FrameEncoder};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::hwaccel::HardwareContext;
use crate::utils::LogThrottler;
use crate::video::format::{PixelFormat, Rational, Resolution};
use crate::video::frame::FrameBuffer;
use crate::video::queue::FrameQueue;
use crate::video::stats::{RateWindow, ServerStats};
use crate::{error_throttled, warn_throttled};

/// Idle wait between client polls when no frame is queued
const CLIENT_POLL: Duration = Duration::from_millis(10);

/// Invoked with the peer address on connect/disconnect (transmission thread)
pub type ClientCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

struct Queued {
    frame: FrameBuffer,
    pushed_at: Instant,
}

struct StatsInner {
    stats: ServerStats,
    window: RateWindow,
    started: Option<Instant>,
}

impl StatsInner {
    fn fresh() -> Self {
        Self {
            stats: ServerStats::default(),
            window: RateWindow::default(),
            started: None,
        }
    }
}

struct Shared {
    config: ServerConfig,
    registry: EncoderRegistry,
    hw: Arc<HardwareContext>,
    output: Mutex<Box<dyn StreamOutput>>,

    running: AtomicBool,
    stop_flag: AtomicBool,
    ingress: Mutex<FrameQueue<Queued>>,
    frame_ready: Condvar,
    stats: Mutex<StatsInner>,

    on_connect: Mutex<Option<ClientCallback>>,
    on_disconnect: Mutex<Option<ClientCallback>>,
}

impl Shared {
    fn fire(&self, events: Vec<ClientEvent>) {
        for event in events {
            let (callback, addr) = match event {
                ClientEvent::Connected(addr) => {
                    info!("Client connected: {}", addr);
                    (self.on_connect.lock().clone(), addr)
                }
                ClientEvent::Disconnected(addr) => {
                    info!("Client disconnected: {}", addr);
                    (self.on_disconnect.lock().clone(), addr)
                }
            };
            if let Some(callback) = callback {
                callback(addr);
            }
        }
    }
}

struct Transmitter {
    shared: Arc<Shared>,
    encoder: Box<dyn FrameEncoder>,
    encoder_tb: Rational,
    output_tb: Rational,
    next_pts: i64,
    trailer_written: bool,
    throttler: LogThrottler,
}

impl Transmitter {
    fn run(&mut self) {
        info!(
            "Transmission loop started ({} -> {})",
            self.encoder.name(),
            self.shared.config.stream_name
        );

        while !self.shared.stop_flag.load(Ordering::Acquire) {
            self.poll_clients();

            let next = {
                let mut queue = self.shared.ingress.lock();
                if queue.is_empty() && !self.shared.stop_flag.load(Ordering::Acquire) {
                    self.shared.frame_ready.wait_for(&mut queue, CLIENT_POLL);
                }
                queue.pop()
            };
            if let Some(item) = next {
                self.transmit(item);
            }

            self.tick_stats();
        }

        info!("Transmission loop stopped");
    }

    fn poll_clients(&mut self) {
        let (events, clients) = {
            let mut output = self.shared.output.lock();
            let events = output.poll_clients();
            (events, output.client_count())
        };
        self.shared.stats.lock().stats.connected_clients = clients;
        self.shared.fire(events);
    }

    fn transmit(&mut self, item: Queued) {
        let pts = self.next_pts;
        self.next_pts += 1;

        if let Err(e) = self.encoder.send_frame(&item.frame, pts) {
            warn_throttled!(self.throttler, "encode", "Dropping frame {}: {}", pts, e);
            return;
        }
        trace!("Encoded frame pts={}", pts);
        self.drain(Some(item.pushed_at));
    }

    /// Write every packet the encoder has ready
    fn drain(&mut self, pushed_at: Option<Instant>) {
        loop {
            match self.encoder.receive_packet() {
                Ok(EncodeStatus::Packet(mut packet)) => {
                    packet.pts = Rational::rescale(packet.pts, self.encoder_tb, self.output_tb);
                    packet.dts = Rational::rescale(packet.dts, self.encoder_tb, self.output_tb);
                    self.write(&packet, pushed_at);
                }
                Ok(EncodeStatus::NeedMoreInput) | Ok(EncodeStatus::EndOfStream) => break,
                Err(e) => {
                    warn_throttled!(self.throttler, "receive", "Encoder error: {}", e);
                    break;
                }
            }
        }
    }

    fn write(&mut self, packet: &EncodedPacket, pushed_at: Option<Instant>) {
        let result = self.shared.output.lock().write_packet(packet);
        let mut inner = self.shared.stats.lock();
        match result {
            Ok(bytes) => {
                inner.stats.frames_transferred += 1;
                inner.stats.bytes_transferred += bytes as u64;
                inner.window.record(bytes, pushed_at.map(|t| t.elapsed()));
            }
            Err(e) => {
                inner.stats.write_errors += 1;
                drop(inner);
                if e.is_transient() {
                    warn_throttled!(self.throttler, "write", "Packet write failed: {}", e);
                } else {
                    error_throttled!(self.throttler, "output", "Output error: {}", e);
                }
            }
        }
    }

    fn tick_stats(&self) {
        let mut inner = self.shared.stats.lock();
        if let Some(rates) = inner.window.tick(Instant::now()) {
            inner.stats.fps = rates.fps;
            inner.stats.bitrate = rates.bitrate;
            inner.stats.average_latency_ms = rates.average_latency_ms;
        }
    }

    /// Flush the encoder, write the trailer once and release the output
    fn finish(&mut self) {
        if self.trailer_written {
            return;
        }
        self.trailer_written = true;

        match self.encoder.send_eof() {
            Ok(()) => self.drain(None),
            Err(e) => warn!("Encoder flush failed: {}", e),
        }

        let events = {
            let mut output = self.shared.output.lock();
            if let Err(e) = output.write_trailer() {
                warn!("Failed to write stream trailer: {}", e);
            }
            output.close()
        };
        self.shared.stats.lock().stats.connected_clients = 0;
        self.shared.fire(events);
        debug!("Output closed after {} frames", self.next_pts);
    }
}

fn transmit_main(mut tx: Transmitter) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| tx.run()));
    if outcome.is_err() {
        error!("Transmission loop panicked, closing output");
    }
    if panic::catch_unwind(AssertUnwindSafe(|| tx.finish())).is_err() {
        error!("Panic while closing output");
    }
    tx.shared.running.store(false, Ordering::Release);
}

/// Builder for [`StreamServer`]
pub struct StreamServerBuilder {
    config: ServerConfig,
    registry: Option<EncoderRegistry>,
    output: Option<Box<dyn StreamOutput>>,
    hw: Option<Arc<HardwareContext>>,
}

impl StreamServerBuilder {
    pub fn encoders(mut self, registry: EncoderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Output to write to (default: MJPEG over HTTP)
    pub fn output(mut self, output: Box<dyn StreamOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Hardware context shared with the capture side
    pub fn hardware(mut self, hw: Arc<HardwareContext>) -> Self {
        self.hw = Some(hw);
        self
    }

    pub fn build(self) -> StreamServer {
        let queue_capacity = self.config.queue_capacity;
        StreamServer {
            shared: Arc::new(Shared {
                config: self.config,
                registry: self.registry.unwrap_or_else(EncoderRegistry::with_defaults),
                hw: self.hw.unwrap_or_else(HardwareContext::software),
                output: Mutex::new(self.output.unwrap_or_else(|| {
                    Box::new(MjpegHttpOutput::new()) as Box<dyn StreamOutput>
                })),
                running: AtomicBool::new(false),
                stop_flag: AtomicBool::new(false),
                ingress: Mutex::new(FrameQueue::new(queue_capacity)),
                frame_ready: Condvar::new(),
                stats: Mutex::new(StatsInner::fresh()),
                on_connect: Mutex::new(None),
                on_disconnect: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }
}

pub struct StreamServer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamServer {
    pub fn builder(config: ServerConfig) -> StreamServerBuilder {
        StreamServerBuilder {
            config,
            registry: None,
            output: None,
            hw: None,
        }
    }

    pub fn new(config: ServerConfig) -> Self {
        Self::builder(config).build()
    }

    /// Open the encoder and output, write the stream header and start the
    /// transmission thread. On error nothing is left running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.running.load(Ordering::Acquire) {
            return Err(Error::AlreadyRunning);
        }

        let config = &self.shared.config;
        let settings = EncoderSettings {
            resolution: config.resolution(),
            fps: config.fps,
            bitrate: config.bitrate,
            gop_size: config.gop_size,
            low_latency: config.low_latency,
            quality: config.quality,
            hw: Arc::clone(&self.shared.hw),
        };
        let encoder = self.shared.registry.open(&config.encoder_name, &settings)?;

        let output_tb = {
            let mut output = self.shared.output.lock();
            output.open(config)?;
            if let Err(e) = output.write_header(encoder.mime_type()) {
                output.close();
                return Err(e);
            }
            output.time_base()
        };

        self.shared.ingress.lock().reset();
        *self.shared.stats.lock() = StatsInner {
            started: Some(Instant::now()),
            ..StatsInner::fresh()
        };
        self.shared.stop_flag.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        info!(
            "Stream server started: encoder {} {} @ {} fps, /{}",
            encoder.name(),
            config.resolution(),
            config.fps,
            config.stream_name
        );

        let tx = Transmitter {
            shared: Arc::clone(&self.shared),
            encoder_tb: encoder.time_base(),
            encoder,
            output_tb,
            next_pts: 0,
            trailer_written: false,
            throttler: LogThrottler::default(),
        };
        match thread::Builder::new()
            .name("vidrelay-transmit".to_string())
            .spawn(move || transmit_main(tx))
        {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.output.lock().close();
                Err(Error::Io(e))
            }
        }
    }

    /// Stop transmission: flush, write the trailer, close the output.
    ///
    /// Idempotent; frames still queued are discarded.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        info!("Stopping stream server");
        self.shared.stop_flag.store(true, Ordering::Release);
        {
            let _queue = self.shared.ingress.lock();
            self.shared.frame_ready.notify_all();
        }
        if handle.join().is_err() {
            error!("Transmission thread panicked");
        }
        self.shared.running.store(false, Ordering::Release);

        let discarded = self.shared.ingress.lock().clear();
        if discarded > 0 {
            debug!("Discarded {} queued frames", discarded);
        }
    }

    /// Queue a frame for transmission. A full queue evicts its oldest frame.
    pub fn push_frame(&self, frame: FrameBuffer) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        let evicted = self.shared.ingress.lock().push(Queued {
            frame,
            pushed_at: Instant::now(),
        });
        self.shared.frame_ready.notify_one();
        if evicted.is_some() {
            self.shared.stats.lock().stats.dropped_frames += 1;
            trace!("Ingress queue full, dropped oldest frame");
        }
        Ok(())
    }

    /// Copy raw pixels into a frame and queue it
    pub fn push_bytes(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<()> {
        let frame = FrameBuffer::copy_from_slice(data, Resolution::new(width, height), format, 0)?;
        self.push_frame(frame)
    }

    pub fn get_stats(&self) -> ServerStats {
        let inner = self.shared.stats.lock();
        let mut stats = inner.stats.clone();
        stats.uptime_secs = inner
            .started
            .filter(|_| self.is_running())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        stats
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Frames waiting for the transmission thread
    pub fn queue_len(&self) -> usize {
        self.shared.ingress.lock().len()
    }

    pub fn set_client_connected_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        *self.shared.on_connect.lock() = Some(Arc::new(callback));
    }

    pub fn set_client_disconnected_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        *self.shared.on_disconnect.lock() = Some(Arc::new(callback));
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    #[derive(Default)]
    struct OutputLog {
        packets: Vec<(i64, i64)>,
        header: Option<String>,
        trailers: u32,
        closes: u32,
        fail_writes: bool,
        pending_events: Vec<ClientEvent>,
        clients: usize,
    }

    struct MockOutput(Arc<Mutex<OutputLog>>);

    impl StreamOutput for MockOutput {
        fn open(&mut self, _config: &ServerConfig) -> Result<()> {
            Ok(())
        }

        fn time_base(&self) -> Rational {
            Rational::RTP_90K
        }

        fn write_header(&mut self, mime_type: &str) -> Result<()> {
            self.0.lock().header = Some(mime_type.to_string());
            Ok(())
        }

        fn poll_clients(&mut self) -> Vec<ClientEvent> {
            std::mem::take(&mut self.0.lock().pending_events)
        }

        fn write_packet(&mut self, packet: &EncodedPacket) -> Result<usize> {
            let mut log = self.0.lock();
            if log.fail_writes {
                return Err(Error::Transport("broken pipe".into()));
            }
            log.packets.push((packet.pts, packet.dts));
            Ok(packet.len())
        }

        fn write_trailer(&mut self) -> Result<()> {
            self.0.lock().trailers += 1;
            Ok(())
        }

        fn close(&mut self) -> Vec<ClientEvent> {
            let mut log = self.0.lock();
            log.closes += 1;
            log.clients = 0;
            vec![ClientEvent::Disconnected("127.0.0.1:9000".parse().unwrap())]
        }

        fn client_count(&self) -> usize {
            self.0.lock().clients
        }
    }

    /// Holds each frame back by one, like an encoder with lookahead
    struct DelayEncoder {
        held: Option<i64>,
        ready: VecDeque<i64>,
        eof: bool,
        gate: Option<Gate>,
    }

    #[derive(Clone)]
    struct Gate {
        entered: Arc<Mutex<Option<mpsc::Sender<()>>>>,
        open: Arc<(Mutex<bool>, Condvar)>,
    }

    impl Gate {
        fn new() -> (Self, mpsc::Receiver<()>) {
            let (tx, rx) = mpsc::channel();
            let gate = Self {
                entered: Arc::new(Mutex::new(Some(tx))),
                open: Arc::new((Mutex::new(false), Condvar::new())),
            };
            (gate, rx)
        }

        fn wait(&self) {
            if let Some(tx) = self.entered.lock().take() {
                let _ = tx.send(());
            }
            let (lock, cvar) = &*self.open;
            let mut open = lock.lock();
            while !*open {
                cvar.wait(&mut open);
            }
        }

        fn release(&self) {
            let (lock, cvar) = &*self.open;
            *lock.lock() = true;
            cvar.notify_all();
        }
    }

    impl FrameEncoder for DelayEncoder {
        fn name(&self) -> &str {
            "delay"
        }

        fn time_base(&self) -> Rational {
            Rational::new(1, 30)
        }

        fn mime_type(&self) -> &str {
            "application/test"
        }

        fn send_frame(&mut self, _frame: &FrameBuffer, pts: i64) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.wait();
            }
            if let Some(prev) = self.held.replace(pts) {
                self.ready.push_back(prev);
            }
            Ok(())
        }

        fn send_eof(&mut self) -> Result<()> {
            self.eof = true;
            if let Some(prev) = self.held.take() {
                self.ready.push_back(prev);
            }
            Ok(())
        }

        fn receive_packet(&mut self) -> Result<EncodeStatus> {
            Ok(match self.ready.pop_front() {
                Some(pts) => EncodeStatus::Packet(EncodedPacket {
                    data: vec![0u8; 100].into(),
                    pts,
                    dts: pts,
                    key: true,
                }),
                None if self.eof => EncodeStatus::EndOfStream,
                None => EncodeStatus::NeedMoreInput,
            })
        }
    }

    fn server_with(gate: Option<Gate>) -> (StreamServer, Arc<Mutex<OutputLog>>) {
        let log = Arc::new(Mutex::new(OutputLog::default()));
        let mut registry = EncoderRegistry::default();
        registry.register("delay", None, move |_| {
            Ok(Box::new(DelayEncoder {
                held: None,
                ready: VecDeque::new(),
                eof: false,
                gate: gate.clone(),
            }) as Box<dyn FrameEncoder>)
        });
        let config = ServerConfig {
            encoder_name: "delay".into(),
            ..Default::default()
        };
        let server = StreamServer::builder(config)
            .encoders(registry)
            .output(Box::new(MockOutput(Arc::clone(&log))))
            .build();
        (server, log)
    }

    fn frame() -> FrameBuffer {
        FrameBuffer::zeroed(Resolution::new(2, 2), PixelFormat::Grey).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_packets_rescaled_and_flushed_on_stop() {
        let (server, log) = server_with(None);
        server.start().unwrap();
        assert!(server.is_running());
        assert_eq!(log.lock().header.as_deref(), Some("application/test"));

        for _ in 0..3 {
            server.push_frame(frame()).unwrap();
        }
        // the third packet stays inside the encoder until flush
        assert!(wait_until(|| log.lock().packets.len() == 2));
        server.stop();

        let log = log.lock();
        assert_eq!(log.packets, vec![(0, 0), (3000, 3000), (6000, 6000)]);
        assert_eq!(log.trailers, 1);
        assert_eq!(log.closes, 1);
        assert!(!server.is_running());
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let (gate, entered) = Gate::new();
        let (server, _log) = server_with(Some(gate.clone()));
        server.start().unwrap();

        server.push_frame(frame()).unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..35 {
            server.push_frame(frame()).unwrap();
        }
        assert_eq!(server.queue_len(), 30);
        assert_eq!(server.get_stats().dropped_frames, 5);

        gate.release();
        server.stop();
        assert_eq!(server.queue_len(), 0);
    }

    #[test]
    fn test_stats_snapshot_after_overflow() {
        let (gate, entered) = Gate::new();
        let (server, _log) = server_with(Some(gate.clone()));
        server.start().unwrap();

        server.push_frame(frame()).unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..35 {
            server.push_frame(frame()).unwrap();
        }
        let stats = server.get_stats();
        assert_eq!(stats.dropped_frames, 5);
        assert_eq!(stats.frames_transferred, 0);

        // 31 frames reach the encoder; the last stays held back until flush
        gate.release();
        assert!(wait_until(|| server.get_stats().frames_transferred == 30));
        let stats = server.get_stats();
        assert_eq!(stats.dropped_frames, 5);
        assert_eq!(stats.frames_transferred, 30);
        assert_eq!(stats.bytes_transferred, 3000);
        assert_eq!(server.queue_len(), 0);
        server.stop();
    }

    #[test]
    fn test_lifecycle_errors() {
        let (server, log) = server_with(None);
        assert!(matches!(server.push_frame(frame()), Err(Error::NotRunning)));
        server.stop();
        assert_eq!(log.lock().trailers, 0);

        server.start().unwrap();
        assert!(matches!(server.start(), Err(Error::AlreadyRunning)));
        server.stop();
        server.stop();
        assert_eq!(log.lock().trailers, 1);

        // restartable
        server.start().unwrap();
        server.stop();
        assert_eq!(log.lock().trailers, 2);
    }

    #[test]
    fn test_no_usable_encoder_leaves_server_stopped() {
        let config = ServerConfig {
            encoder_name: "h264_nvenc".into(),
            ..Default::default()
        };
        let log = Arc::new(Mutex::new(OutputLog::default()));
        let server = StreamServer::builder(config)
            .encoders(EncoderRegistry::default())
            .output(Box::new(MockOutput(Arc::clone(&log))))
            .build();
        assert!(matches!(server.start(), Err(Error::Unsupported(_))));
        assert!(!server.is_running());
        assert!(log.lock().header.is_none());
    }

    #[test]
    fn test_write_errors_counted_and_loop_survives() {
        let (server, log) = server_with(None);
        server.start().unwrap();
        log.lock().fail_writes = true;
        for _ in 0..3 {
            server.push_frame(frame()).unwrap();
        }
        assert!(wait_until(|| server.get_stats().write_errors == 2));
        assert!(server.is_running());

        log.lock().fail_writes = false;
        server.push_frame(frame()).unwrap();
        assert!(wait_until(|| server.get_stats().frames_transferred == 1));
        let stats = server.get_stats();
        assert_eq!(stats.bytes_transferred, 100);
        server.stop();
    }

    #[test]
    fn test_client_callbacks() {
        let (server, log) = server_with(None);
        let connected = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&connected);
        let d = Arc::clone(&disconnected);
        server.set_client_connected_callback(move |addr| c.lock().push(addr));
        server.set_client_disconnected_callback(move |addr| d.lock().push(addr));

        server.start().unwrap();
        let addr: SocketAddr = "10.0.0.7:51000".parse().unwrap();
        {
            let mut log = log.lock();
            log.clients = 1;
            log.pending_events.push(ClientEvent::Connected(addr));
        }
        assert!(wait_until(|| connected.lock().len() == 1));
        assert!(wait_until(|| server.get_stats().connected_clients == 1));
        server.stop();

        assert_eq!(connected.lock()[0], addr);
        assert_eq!(disconnected.lock().len(), 1);
        assert_eq!(server.get_stats().connected_clients, 0);
    }

    #[test]
    fn test_push_bytes_validates_length() {
        let (server, _log) = server_with(None);
        server.start().unwrap();
        assert!(server.push_bytes(&[0u8; 4], 2, 2, PixelFormat::Grey).is_ok());
        assert!(matches!(
            server.push_bytes(&[0u8; 3], 2, 2, PixelFormat::Grey),
            Err(Error::InvalidFrame(_))
        ));
        server.stop();
    }
}

//! Capture engine: one source, one worker thread, one decoder
//!
//! Control methods may be called from any thread. The worker owns the opened
//! input and decoder; everything the control plane reads lives in `Shared`
//! behind short-lived locks. Frame delivery holds the delivery mutex for the
//! duration of the callback, so callbacks never run concurrently and `stop()`
//! cannot return while one is in flight.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::input::MediaInput;
use super::supervisor::{ConnectionSupervisor, SupervisorAction};
use super::SourceKind;
use crate::codec::{
    default_decoder_factory, DecodeStatus, DecodedPicture, DecoderFactory, FrameDecoder, RawUnit,
    StreamInfo,
};
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::hwaccel::HardwareContext;
use crate::utils::LogThrottler;
use crate::video::format::Rational;
use crate::video::frame::FrameBuffer;
use crate::video::queue::FrameQueue;
use crate::video::stats::{packet_loss, RateWindow, SourceStatus};
use crate::{error_throttled, warn_throttled};

/// Sleep between pause-flag checks
const PAUSE_POLL: Duration = Duration::from_millis(10);
/// Back-off after a failed local read
const LOCAL_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(10);
/// How long `seek` waits for the worker to apply the request
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Receives each decoded frame on the capture thread
pub type FrameCallback = Box<dyn FnMut(FrameBuffer) + Send>;

/// Receives state transitions (with the error for `Failed`)
pub type StateCallback = Arc<dyn Fn(EngineState, Option<&Error>) + Send + Sync>;

struct Delivery {
    queue: FrameQueue,
    callback: Option<FrameCallback>,
}

struct StatusInner {
    status: SourceStatus,
    window: RateWindow,
}

struct SeekRequest {
    target: Duration,
    reply: mpsc::Sender<Result<()>>,
}

struct Shared {
    kind: SourceKind,
    capture: CaptureConfig,
    hw: Arc<HardwareContext>,
    decoder_factory: DecoderFactory,

    state: Mutex<EngineState>,
    state_callback: Mutex<Option<StateCallback>>,
    stop_flag: AtomicBool,
    paused: AtomicBool,
    worker_alive: AtomicBool,
    seekable: AtomicBool,

    delivery: Mutex<Delivery>,
    frame_ready: Condvar,
    sequence: AtomicU64,

    stream_info: Mutex<StreamInfo>,
    status: Mutex<StatusInner>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn notify(&self, state: EngineState, err: Option<&Error>) {
        let callback = self.state_callback.lock().clone();
        if let Some(callback) = callback {
            callback(state, err);
        }
    }

    fn set_state(&self, new: EngineState, err: Option<&Error>) {
        let old = std::mem::replace(&mut *self.state.lock(), new);
        if old != new {
            info!("Capture {} : {} -> {}", self.kind.locator(), old, new);
            self.notify(new, err);
        }
    }

    /// Move to `to` only from one of `from`
    fn transition(&self, from: &[EngineState], to: EngineState, op: &'static str) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !from.contains(&state) {
                return Err(Error::invalid_state(op, *state));
            }
            *state = to;
        }
        info!("Capture {} : {}", self.kind.locator(), to);
        self.notify(to, None);
        Ok(())
    }

    /// Terminal worker failure
    fn fail(&self, err: Error) {
        error!("Capture {} failed: {}", self.kind.locator(), err);
        *self.last_error.lock() = Some(err.to_string());
        self.status.lock().status.connected = false;
        {
            let mut state = self.state.lock();
            if matches!(*state, EngineState::Stopping | EngineState::Idle) {
                return;
            }
            *state = EngineState::Failed;
        }
        self.notify(EngineState::Failed, Some(&err));
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Sleep in slices; false if stop was requested meanwhile
    fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    fn reset_for_start(&self) {
        self.stop_flag.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.sequence.store(0, Ordering::Relaxed);
        self.delivery.lock().queue.reset();
        *self.last_error.lock() = None;
        *self.status.lock() = StatusInner {
            status: SourceStatus::default(),
            window: RateWindow::default(),
        };
    }

    fn set_connection(&self, connected: bool, attempts: u32) {
        let mut inner = self.status.lock();
        inner.status.connected = connected;
        inner.status.reconnect_attempts = attempts;
    }

    fn record_bytes(&self, bytes: usize) {
        let mut inner = self.status.lock();
        inner.status.bytes_received += bytes as u64;
        inner.window.record_bytes(bytes);
    }

    fn tick_status(&self, expected_units: Option<u64>) {
        let mut inner = self.status.lock();
        if let Some(rates) = inner.window.tick(Instant::now()) {
            inner.status.fps = rates.fps;
            inner.status.bitrate = rates.bitrate;
            inner.status.average_latency_ms = rates.average_latency_ms;
            inner.status.packet_loss = packet_loss(expected_units, inner.status.frames_received);
        }
    }

    /// Hand one frame to the callback, or to the pull queue without one
    fn deliver(&self, frame: FrameBuffer, read_at: Instant) {
        let evicted = {
            let mut delivery = self.delivery.lock();
            if self.paused.load(Ordering::Acquire) {
                trace!("Discarding frame decoded across pause");
                return;
            }

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let frame = frame.with_sequence(sequence).with_captured_at(read_at);
            match delivery.callback.as_mut() {
                Some(callback) => {
                    callback(frame);
                    false
                }
                None => {
                    let evicted = delivery.queue.push(frame).is_some();
                    self.frame_ready.notify_all();
                    evicted
                }
            }
        };

        let mut inner = self.status.lock();
        inner.status.frames_received += 1;
        if evicted {
            inner.status.dropped_frames += 1;
        }
        inner.window.record(0, Some(read_at.elapsed()));
    }
}

/// Clears the liveness flag when the worker exits, panics included
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CaptureWorker {
    shared: Arc<Shared>,
    input: Box<dyn MediaInput>,
    decoder: Box<dyn FrameDecoder>,
    supervisor: Option<ConnectionSupervisor>,
    seek_rx: mpsc::Receiver<SeekRequest>,
    info: StreamInfo,
    time_base: Rational,
    started: Instant,
    throttler: LogThrottler,
}

impl CaptureWorker {
    fn run(&mut self) -> Result<()> {
        info!(
            "Capture loop started on {} ({}x{} {})",
            self.shared.kind.locator(),
            self.info.width,
            self.info.height,
            self.info.codec
        );

        while !self.shared.stop_requested() {
            self.service_seeks();

            if self.shared.paused.load(Ordering::Acquire) {
                thread::sleep(PAUSE_POLL);
                continue;
            }

            self.shared.tick_status(self.input.expected_units());

            let read_at = Instant::now();
            match self.input.read_unit() {
                Ok(unit) => self.handle_unit(unit, read_at),
                Err(e) if self.supervisor.is_some() => self.recover(e)?,
                Err(e) => self.local_read_failed(e),
            }
        }

        info!("Capture loop stopped on {}", self.shared.kind.locator());
        Ok(())
    }

    fn handle_unit(&mut self, mut unit: RawUnit, read_at: Instant) {
        if let Some(supervisor) = self.supervisor.as_mut() {
            if supervisor.attempts() > 0 {
                info!(
                    "Stream {} recovered after {} reconnect attempts",
                    self.shared.kind.locator(),
                    supervisor.attempts()
                );
                self.shared.set_connection(true, 0);
            }
            supervisor.on_read_success();
        }
        self.throttler.clear("read");

        if unit.stream_index != self.info.video_stream {
            trace!("Skipping unit from stream {}", unit.stream_index);
            return;
        }
        self.shared.record_bytes(unit.data.len());

        if unit.pts.is_none() {
            let elapsed_us = self.started.elapsed().as_micros() as i64;
            unit.pts = Some(Rational::rescale(elapsed_us, Rational::MICROS, self.time_base));
        }

        if let Err(e) = self.decoder.send_unit(&unit) {
            warn_throttled!(
                self.throttler,
                "decode",
                "Decode error on {}: {}",
                self.shared.kind.locator(),
                e
            );
            return;
        }

        loop {
            match self.decoder.receive_picture() {
                Ok(DecodeStatus::Picture(picture)) => {
                    let frame = match picture {
                        DecodedPicture::Host(frame) => frame,
                        DecodedPicture::Device(surface) => match surface.download() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn_throttled!(
                                    self.throttler,
                                    "transfer",
                                    "Dropping frame, device transfer failed: {}",
                                    e
                                );
                                continue;
                            }
                        },
                    };
                    self.note_frame_layout(&frame);
                    self.shared
                        .deliver(frame.with_time_base(self.time_base), read_at);
                }
                Ok(DecodeStatus::NeedMoreInput) | Ok(DecodeStatus::EndOfStream) => break,
                Err(e) => {
                    warn_throttled!(
                        self.throttler,
                        "decode",
                        "Decode error on {}: {}",
                        self.shared.kind.locator(),
                        e
                    );
                    break;
                }
            }
        }
    }

    /// Fill in the delivered layout once the first frame is known
    fn note_frame_layout(&mut self, frame: &FrameBuffer) {
        if self.info.pixel_format == Some(frame.format())
            && self.info.width == frame.width()
            && self.info.height == frame.height()
        {
            return;
        }
        self.info.pixel_format = Some(frame.format());
        self.info.width = frame.width();
        self.info.height = frame.height();
        *self.shared.stream_info.lock() = self.info.clone();
        debug!(
            "Delivering {} {} frames from {}",
            frame.resolution(),
            frame.format(),
            self.shared.kind.locator()
        );
    }

    fn local_read_failed(&mut self, err: Error) {
        match err {
            Error::EndOfStream => {
                if self.throttler.should_log("eos") {
                    info!("End of stream on {}, waiting", self.shared.kind.locator());
                }
            }
            e if e.is_transient() => {
                warn_throttled!(
                    self.throttler,
                    "read",
                    "Read failed on {}: {}",
                    self.shared.kind.locator(),
                    e
                );
            }
            e => {
                error_throttled!(
                    self.throttler,
                    "device",
                    "Device error on {}, retrying: {}",
                    self.shared.kind.locator(),
                    e
                );
            }
        }
        self.shared.sleep_unless_stopped(LOCAL_RETRY_DELAY);
    }

    /// Close, wait, reopen until the supervisor gives up
    fn recover(&mut self, err: Error) -> Result<()> {
        let url = self.shared.kind.locator().to_string();
        warn!("Read failed on {}: {}", url, err);

        loop {
            let Some(supervisor) = self.supervisor.as_mut() else {
                return Err(err);
            };
            let max_attempts = supervisor.max_attempts();

            match supervisor.on_failure() {
                SupervisorAction::GiveUp { attempts } => {
                    return Err(Error::ConnectionLost { url, attempts });
                }
                SupervisorAction::Reconnect { attempt, delay } => {
                    warn!(
                        "Reconnecting to {} (attempt {}/{}) in {}ms",
                        url,
                        attempt,
                        max_attempts,
                        delay.as_millis()
                    );
                    self.input.close();
                    self.shared.set_connection(false, attempt);

                    if !self.shared.sleep_unless_stopped(delay) {
                        return Ok(());
                    }

                    match self.shared.kind.open(&self.shared.capture) {
                        Ok(input) => {
                            self.replace_input(input)?;
                            self.shared.set_connection(true, attempt);
                            info!("Reconnected to {}", url);
                            return Ok(());
                        }
                        Err(e) => {
                            error_throttled!(
                                self.throttler,
                                "reconnect",
                                "Reconnect to {} failed: {}",
                                url,
                                e
                            );
                        }
                    }
                }
            }
        }
    }

    fn replace_input(&mut self, input: Box<dyn MediaInput>) -> Result<()> {
        let info = input.stream_info();
        if info.codec != self.info.codec {
            debug!("Codec changed to {}, reopening decoder", info.codec);
            self.decoder = (self.shared.decoder_factory)(&info, &self.shared.hw)?;
        } else {
            self.decoder.flush();
        }
        self.input = input;
        self.time_base = effective_time_base(&info);
        self.info = info;
        *self.shared.stream_info.lock() = self.info.clone();
        Ok(())
    }

    fn service_seeks(&mut self) {
        while let Ok(request) = self.seek_rx.try_recv() {
            let result = self.input.seek(request.target);
            if result.is_ok() {
                self.decoder.flush();
                let cleared = self.shared.delivery.lock().queue.clear();
                debug!(
                    "Seeked {} to {:?}, discarded {} queued frames",
                    self.shared.kind.locator(),
                    request.target,
                    cleared
                );
            }
            let _ = request.reply.send(result);
        }
    }
}

fn effective_time_base(info: &StreamInfo) -> Rational {
    if info.time_base.is_zero() {
        Rational::MICROS
    } else {
        info.time_base
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_main(shared: Arc<Shared>, mut worker: CaptureWorker) {
    let _alive = AliveGuard(&shared.worker_alive);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run()));
    worker.input.close();

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => shared.fail(e),
        Err(payload) => shared.fail(Error::WorkerPanic(panic_message(payload.as_ref()))),
    }
}

#[derive(Default)]
struct Control {
    worker: Option<JoinHandle<()>>,
    seek_tx: Option<mpsc::Sender<SeekRequest>>,
}

/// Builder for [`CaptureEngine`]
pub struct CaptureEngineBuilder {
    kind: SourceKind,
    capture: CaptureConfig,
    hw: Option<Arc<HardwareContext>>,
    decoder_factory: Option<DecoderFactory>,
}

impl CaptureEngineBuilder {
    /// Share an already probed hardware context (otherwise one is probed
    /// from `capture.acceleration`)
    pub fn hardware(mut self, hw: Arc<HardwareContext>) -> Self {
        self.hw = Some(hw);
        self
    }

    /// Replace the software decoder selection (e.g. with a hardware decoder)
    pub fn decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    pub fn build(self) -> CaptureEngine {
        let hw = self
            .hw
            .unwrap_or_else(|| HardwareContext::probe(self.capture.acceleration));
        let queue_capacity = self.capture.queue_capacity;

        CaptureEngine {
            shared: Arc::new(Shared {
                kind: self.kind,
                capture: self.capture,
                hw,
                decoder_factory: self.decoder_factory.unwrap_or_else(default_decoder_factory),
                state: Mutex::new(EngineState::Idle),
                state_callback: Mutex::new(None),
                stop_flag: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                worker_alive: AtomicBool::new(false),
                seekable: AtomicBool::new(false),
                delivery: Mutex::new(Delivery {
                    queue: FrameQueue::new(queue_capacity),
                    callback: None,
                }),
                frame_ready: Condvar::new(),
                sequence: AtomicU64::new(0),
                stream_info: Mutex::new(StreamInfo::default()),
                status: Mutex::new(StatusInner {
                    status: SourceStatus::default(),
                    window: RateWindow::default(),
                }),
                last_error: Mutex::new(None),
            }),
            control: Mutex::new(Control::default()),
        }
    }
}

/// Capture engine for one source
pub struct CaptureEngine {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl CaptureEngine {
    pub fn builder(kind: SourceKind, capture: CaptureConfig) -> CaptureEngineBuilder {
        CaptureEngineBuilder {
            kind,
            capture,
            hw: None,
            decoder_factory: None,
        }
    }

    pub fn new(kind: SourceKind, capture: CaptureConfig) -> Self {
        Self::builder(kind, capture).build()
    }

    /// Open the source and spawn the capture worker.
    ///
    /// Open failures leave the engine `Idle` with no thread running. A `Failed`
    /// engine must be stopped before it can start again.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock();
        match self.shared.state() {
            EngineState::Idle => {}
            EngineState::Failed => return Err(Error::invalid_state("start", EngineState::Failed)),
            _ => return Err(Error::AlreadyRunning),
        }

        self.shared.set_state(EngineState::Starting, None);
        self.shared.reset_for_start();

        let locator = self.shared.kind.locator().to_string();
        info!("Opening {}", locator);

        let mut input = match self.shared.kind.open(&self.shared.capture) {
            Ok(input) => input,
            Err(e) => return Err(self.abort_start(e)),
        };
        let info = input.stream_info();
        let decoder = match (self.shared.decoder_factory)(&info, &self.shared.hw) {
            Ok(decoder) => decoder,
            Err(e) => {
                input.close();
                return Err(self.abort_start(e));
            }
        };
        info!(
            "Opened {}: {} {}x{} time base {} ({})",
            locator,
            info.codec,
            info.width,
            info.height,
            info.time_base,
            decoder.name()
        );

        *self.shared.stream_info.lock() = info.clone();
        self.shared.seekable.store(input.can_seek(), Ordering::Release);
        let supervisor = self
            .shared
            .kind
            .network_config()
            .map(ConnectionSupervisor::from_config);
        self.shared.set_connection(true, 0);

        let (seek_tx, seek_rx) = mpsc::channel();
        let worker = CaptureWorker {
            shared: Arc::clone(&self.shared),
            input,
            decoder,
            supervisor,
            seek_rx,
            time_base: effective_time_base(&info),
            info,
            started: Instant::now(),
            throttler: LogThrottler::default(),
        };

        self.shared.set_state(EngineState::Running, None);
        self.shared.worker_alive.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("vidrelay-capture".to_string())
            .spawn(move || worker_main(shared, worker));

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                control.seek_tx = Some(seek_tx);
                Ok(())
            }
            Err(e) => {
                self.shared.worker_alive.store(false, Ordering::Release);
                Err(self.abort_start(Error::Io(e)))
            }
        }
    }

    fn abort_start(&self, err: Error) -> Error {
        warn!("Failed to start capture on {}: {}", self.shared.kind.locator(), err);
        *self.shared.last_error.lock() = Some(err.to_string());
        self.shared.set_connection(false, 0);
        self.shared.set_state(EngineState::Idle, Some(&err));
        err
    }

    /// Stop the worker, release the source and drop buffered frames.
    ///
    /// Idempotent. Blocks until the worker (and any in-flight callback) finishes.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        let state = self.shared.state();
        if state == EngineState::Idle && control.worker.is_none() {
            return;
        }

        if state != EngineState::Failed {
            self.shared.set_state(EngineState::Stopping, None);
        }
        self.shared.stop_flag.store(true, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        control.seek_tx = None;

        if let Some(handle) = control.worker.take() {
            if handle.join().is_err() {
                error!("Capture worker for {} panicked", self.shared.kind.locator());
            }
        }

        let cleared = self.shared.delivery.lock().queue.clear();
        if cleared > 0 {
            debug!("Discarded {} buffered frames", cleared);
        }
        self.shared.set_connection(false, 0);
        self.shared.set_state(EngineState::Idle, None);
    }

    /// Suspend reads; the connection stays open
    pub fn pause(&self) -> Result<()> {
        self.shared
            .transition(&[EngineState::Running], EngineState::Paused, "pause")?;
        self.shared.paused.store(true, Ordering::Release);
        // wait out a delivery that began before the flag was set
        drop(self.shared.delivery.lock());
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.shared
            .transition(&[EngineState::Paused], EngineState::Running, "resume")?;
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Reposition a seekable local source; queued and decoder-buffered frames are discarded
    pub fn seek(&self, target: Duration) -> Result<()> {
        let state = self.shared.state();
        if !matches!(state, EngineState::Running | EngineState::Paused) {
            return Err(Error::invalid_state("seek", state));
        }
        if self.shared.kind.is_network() {
            return Err(Error::Unsupported("seek on a network stream".to_string()));
        }
        if !self.shared.seekable.load(Ordering::Acquire) {
            return Err(Error::Unsupported(format!(
                "{} is not seekable",
                self.shared.kind.locator()
            )));
        }

        let seek_tx = self.control.lock().seek_tx.clone().ok_or(Error::NotRunning)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        seek_tx
            .send(SeekRequest {
                target,
                reply: reply_tx,
            })
            .map_err(|_| Error::NotRunning)?;

        match reply_rx.recv_timeout(SEEK_TIMEOUT) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(Error::Timeout(format!("seek to {:?}", target)))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::NotRunning),
        }
    }

    /// Replace the frame callback; waits for an in-flight invocation to finish
    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: FnMut(FrameBuffer) + Send + 'static,
    {
        self.shared.delivery.lock().callback = Some(Box::new(callback));
    }

    /// Switch back to pull mode
    pub fn clear_frame_callback(&self) {
        self.shared.delivery.lock().callback = None;
    }

    pub fn set_state_callback<F>(&self, callback: F)
    where
        F: Fn(EngineState, Option<&Error>) + Send + Sync + 'static,
    {
        *self.shared.state_callback.lock() = Some(Arc::new(callback));
    }

    /// Take the oldest buffered frame (pull mode), waiting up to `timeout`
    pub fn next_frame(&self, timeout: Duration) -> Option<FrameBuffer> {
        let deadline = Instant::now() + timeout;
        let mut delivery = self.shared.delivery.lock();
        loop {
            if let Some(frame) = delivery.queue.pop() {
                return Some(frame);
            }
            if self
                .shared
                .frame_ready
                .wait_until(&mut delivery, deadline)
                .timed_out()
            {
                return delivery.queue.pop();
            }
        }
    }

    /// Frames waiting in the pull queue
    pub fn queued_frames(&self) -> usize {
        self.shared.delivery.lock().queue.len()
    }

    /// Last-known stream properties (zero-valued before the first open)
    pub fn stream_info(&self) -> StreamInfo {
        self.shared.stream_info.lock().clone()
    }

    pub fn status(&self) -> SourceStatus {
        self.shared.status.lock().status.clone()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Running or paused
    pub fn is_running(&self) -> bool {
        matches!(
            self.shared.state(),
            EngineState::Running | EngineState::Paused
        )
    }

    /// Whether a capture thread currently exists
    pub fn is_worker_alive(&self) -> bool {
        self.shared.worker_alive.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn locator(&self) -> &str {
        self.shared.kind.locator()
    }

    pub fn hardware(&self) -> &Arc<HardwareContext> {
        &self.shared.hw
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

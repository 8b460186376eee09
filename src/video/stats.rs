//! Throughput accounting for sources and servers

use serde::Serialize;
use std::time::{Duration, Instant};

/// Cadence at which derived rates are recomputed
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Rates derived from one completed window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowRates {
    pub fps: f64,
    /// Bits per second
    pub bitrate: f64,
    /// Mean latency of the samples recorded in the window, in milliseconds
    pub average_latency_ms: f64,
}

/// Rolling accumulator that yields rates once per interval
///
/// Counters inside the window restart each time rates are produced; lifetime
/// totals live in the stats structs themselves.
#[derive(Debug, Clone)]
pub struct RateWindow {
    interval: Duration,
    started: Instant,
    frames: u64,
    bytes: u64,
    latency_sum: Duration,
    latency_samples: u64,
}

impl RateWindow {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            started,
            frames: 0,
            bytes: 0,
            latency_sum: Duration::ZERO,
            latency_samples: 0,
        }
    }

    pub fn record(&mut self, bytes: usize, latency: Option<Duration>) {
        self.frames += 1;
        self.bytes += bytes as u64;
        if let Some(latency) = latency {
            self.latency_sum += latency;
            self.latency_samples += 1;
        }
    }

    /// Record bytes that did not complete a frame (e.g. partial packets)
    pub fn record_bytes(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
    }

    /// Produce rates if the interval has elapsed at `now`, then start a new window
    pub fn tick(&mut self, now: Instant) -> Option<WindowRates> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.interval {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let rates = WindowRates {
            fps: self.frames as f64 / secs,
            bitrate: self.bytes as f64 * 8.0 / secs,
            average_latency_ms: if self.latency_samples > 0 {
                self.latency_sum.as_secs_f64() * 1000.0 / self.latency_samples as f64
            } else {
                0.0
            },
        };

        *self = Self::starting_at(self.interval, now);
        Some(rates)
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(STATS_INTERVAL)
    }
}

/// Snapshot of a stream server's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerStats {
    /// Packets successfully written to the output
    pub frames_transferred: u64,
    pub bytes_transferred: u64,
    /// Frames evicted from the ingress queue
    pub dropped_frames: u64,
    /// Packets the output refused
    pub write_errors: u64,
    pub fps: f64,
    /// Bits per second
    pub bitrate: f64,
    /// Push to write-completion latency
    pub average_latency_ms: f64,
    pub connected_clients: usize,
    pub uptime_secs: f64,
}

/// Snapshot of a network source's health
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStatus {
    pub connected: bool,
    /// Consecutive failed reconnects since the last good read
    pub reconnect_attempts: u32,
    /// Read to callback-delivery latency
    pub average_latency_ms: f64,
    /// Approximate loss ratio in [0, 1], see [`packet_loss`]
    pub packet_loss: f64,
    pub bytes_received: u64,
    pub frames_received: u64,
    /// Frames evicted from the pull-mode queue
    pub dropped_frames: u64,
    pub fps: f64,
    pub bitrate: f64,
}

/// Loss heuristic: fraction of the units the input claims to have produced that
/// never reached the decoder. This is not protocol-level loss detection; inputs
/// that cannot report an expected count yield 0.
pub fn packet_loss(expected: Option<u64>, received: u64) -> f64 {
    match expected {
        Some(expected) if expected > 0 => {
            (expected.saturating_sub(received) as f64 / expected as f64).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_waits_for_interval() {
        let start = Instant::now();
        let mut window = RateWindow::starting_at(Duration::from_secs(1), start);
        window.record(1000, None);
        assert!(window.tick(start + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_window_rates() {
        let start = Instant::now();
        let mut window = RateWindow::starting_at(Duration::from_secs(1), start);
        for _ in 0..30 {
            window.record(1000, Some(Duration::from_millis(4)));
        }
        window.record(500, None);

        let rates = window.tick(start + Duration::from_secs(2)).unwrap();
        assert!((rates.fps - 15.5).abs() < 1e-9);
        assert!((rates.bitrate - 30_500.0 * 8.0 / 2.0).abs() < 1e-6);
        assert!((rates.average_latency_ms - 4.0).abs() < 1e-6);

        // next window starts empty
        let rates = window.tick(start + Duration::from_secs(3)).unwrap();
        assert_eq!(rates, WindowRates::default());
    }

    #[test]
    fn test_packet_loss_heuristic() {
        assert_eq!(packet_loss(None, 10), 0.0);
        assert_eq!(packet_loss(Some(0), 10), 0.0);
        assert!((packet_loss(Some(100), 90) - 0.1).abs() < 1e-9);
        // more received than expected clamps to zero
        assert_eq!(packet_loss(Some(10), 12), 0.0);
    }
}

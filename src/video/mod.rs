//! Frame primitives shared by the capture and transmission sides

pub mod format;
pub mod frame;
pub mod queue;
pub mod stats;

pub use format::{PixelFormat, Rational, Resolution};
pub use frame::FrameBuffer;
pub use queue::FrameQueue;
pub use stats::{packet_loss, RateWindow, ServerStats, SourceStatus};

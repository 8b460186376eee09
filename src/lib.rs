//! vidrelay - threaded video capture and re-streaming
//!
//! A [`CaptureEngine`] pulls frames from a camera, file or network stream on a
//! worker thread and hands decoded frames to a callback or a bounded queue. A
//! [`StreamServer`] takes pushed frames through its own bounded queue, encodes
//! them and serves them to connected clients.

pub mod codec;
pub mod config;
pub mod error;
pub mod hwaccel;
pub mod runtime;
pub mod server;
pub mod source;
pub mod utils;
pub mod video;

pub use error::{Error, Result};
pub use hwaccel::HardwareContext;
pub use server::{StreamOutput, StreamServer};
pub use source::{CaptureEngine, EngineState, SourceFactory, SourceKind};
pub use video::{FrameBuffer, FrameQueue, ServerStats, SourceStatus};

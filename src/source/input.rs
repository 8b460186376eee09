//! Source-side collaborator seams

use std::time::Duration;

use crate::codec::{RawUnit, StreamInfo};
use crate::config::{CaptureConfig, NetworkSourceConfig};
use crate::error::{Error, Result};

/// An opened device, file or network stream producing raw units.
///
/// `read_unit` may block up to the source's own timeout; it is only ever
/// called from the capture worker.
pub trait MediaInput: Send {
    /// Properties of the opened stream
    fn stream_info(&self) -> StreamInfo;

    /// Read the next unit. `Error::EndOfStream` marks a finite source running dry.
    fn read_unit(&mut self) -> Result<RawUnit>;

    /// Whether `seek` is supported
    fn can_seek(&self) -> bool {
        false
    }

    /// Position on the unit with the greatest timestamp not after `target`
    fn seek(&mut self, _target: Duration) -> Result<()> {
        Err(Error::Unsupported("source is not seekable".to_string()))
    }

    /// Units the source claims to have produced so far, for the loss heuristic
    fn expected_units(&self) -> Option<u64> {
        None
    }

    /// Release the device or connection
    fn close(&mut self) {}
}

/// Opens network streams for one URL scheme
pub trait StreamConnector: Send + Sync {
    fn open(&self, config: &NetworkSourceConfig) -> Result<Box<dyn MediaInput>>;
}

/// Opens local devices and files
pub trait DeviceOpener: Send + Sync {
    fn open(&self, locator: &str, capture: &CaptureConfig) -> Result<Box<dyn MediaInput>>;
}

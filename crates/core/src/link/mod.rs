//! Link transport to the downstream motion controller
//!
//! The link is a single half-duplex byte channel with no framing. Everything
//! above [`Transport`] goes through [`SharedLink`], which allows exactly one
//! request/response exchange in flight at a time.

use crate::error::Result;

pub mod mock;
#[cfg(feature = "serial")]
mod serial;
mod shared;

pub use mock::{MockHandle, MockReply, MockTransport, SimulatedController};
#[cfg(feature = "serial")]
pub use serial::SerialTransport;
pub use shared::{LinkTiming, SharedLink};

/// Transport trait for controller communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 when nothing is waiting)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Number of bytes ready to be read without blocking
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }
}

//! Serial transport for the groundlink telemetry stack.
//!
//! This is the lowest layer of groundlink. It owns the serial device handle,
//! configures it for 8N1 without flow control, and runs a reader thread that
//! forwards raw byte chunks to a [`ByteSink`]. Outgoing bytes leave through a
//! [`Link`], the write half handed to the layers above.

pub mod baud;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use baud::BaudRate;
pub use error::{Result, TransportError};
pub use traits::{ByteSink, Link};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialDevice, SerialLink, SerialPort};

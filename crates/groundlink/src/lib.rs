//! Serial telemetry ground station.
//!
//! groundlink talks to a sensor board over a serial line using a printable,
//! checksummed packet protocol, and fans decoded packets out to the handlers
//! registered for each packet type.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial device setup and the reader thread
//! - [`frame`]: packet model, wire codec and frame scanner
//! - [`mux`]: multiplexer, handler registry and the [`mux::Station`] helper

/// Re-export transport types.
pub mod transport {
    pub use groundlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use groundlink_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use groundlink_mux::*;
}

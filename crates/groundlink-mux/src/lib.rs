//! Packet multiplexing for the groundlink telemetry stack.
//!
//! Bytes read from the serial link are framed, decoded and fanned out to the
//! handlers registered for each packet type; packets queued by the
//! application are encoded and written back to the link. Both directions run
//! on dedicated worker threads behind bounded rings with an explicit
//! overflow policy.

pub mod error;
pub mod multiplexer;
pub mod registry;
pub mod ring;
#[cfg(unix)]
pub mod station;
pub mod stats;

pub use error::{MuxError, Result};
pub use multiplexer::{Multiplexer, MuxConfig};
pub use registry::{HandlerRef, HandlerRegistry, PacketHandler};
pub use ring::{OverflowPolicy, PacketRing, Push, DEFAULT_RING_CAPACITY};
#[cfg(unix)]
pub use station::{Station, StationConfig, CLOSE_FLUSH_TIMEOUT};
pub use stats::{MuxStats, StatsSnapshot};

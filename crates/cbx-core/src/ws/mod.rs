//! WebSocket transport seam and the shared connection registry.

pub mod client;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod registry;

pub use client::{Connector, FrameSink, FrameStream, TungsteniteConnector};
#[cfg(any(test, feature = "testing"))]
pub use memory::{ConnectPlan, MemoryConnector, MemoryServer};
pub use registry::{ConnEvent, ConnState, ConnectionHandle, ConnectionRegistry};

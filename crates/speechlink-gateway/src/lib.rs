//! WebSocket gateway for the speech pipeline.
//!
//! Each connection gets an outbound event queue, a control task that applies
//! control messages in arrival order, and a read loop that feeds binary audio
//! frames straight into the pipeline.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;

//! gattkit - a GATT client protocol engine for Bluetooth Low Energy
//!
//! This crate implements the client side of the Attribute Protocol: service
//! discovery, short and long attribute reads, plain and reliable writes,
//! MTU negotiation, and reception of server notifications and indications,
//! multiplexing any number of applications onto one ATT bearer per peer.
//!
//! The engine is transport-agnostic and event-driven. An integrator
//! implements [`AttBearer`] over its L2CAP stack, feeds inbound PDUs into
//! [`gatt::GattClient::handle_inbound`], and drives timers through
//! [`gatt::GattClient::process_timeouts`].

pub mod att;
pub mod bearer;
pub mod gatt;
pub mod uuid;

// Re-export common types for convenience
pub use bearer::{AttBearer, BearerStatus};
pub use gatt::{
    AppCallbacks, BdAddr, ClientOp, DiscoveryKind, GattClient, GattError, GattStatus, ReadParam,
    WriteKind,
};
pub use uuid::Uuid;

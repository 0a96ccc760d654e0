//! Attribute Protocol (ATT) client support.
//!
//! This module holds the wire-level half of the engine: protocol constants,
//! the error code vocabulary, and the PDU codec used to encode client
//! requests and decode server responses.

pub mod constants;
pub mod error;
pub mod pdu;

#[cfg(test)]
mod tests;

pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::pdu::*;

//! Downward interface to the L2CAP bearer carrying ATT PDUs.
//!
//! The engine is transport-agnostic: it hands fully encoded PDUs to an
//! [`AttBearer`] and receives inbound PDU bytes through
//! [`GattClient::handle_inbound`](crate::gatt::GattClient::handle_inbound).
//! Channel setup and teardown belong to the transport; the engine only
//! learns about them through `on_link_up`/`on_link_down`.

use crate::gatt::types::BdAddr;

/// Outcome of handing a PDU to the bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerStatus {
    /// The PDU was accepted for transmission.
    Success,
    /// The PDU was accepted but the channel is congested; the bearer will
    /// flush it and signal congestion-cleared later.
    Congested,
    /// The PDU was rejected.
    Error,
}

/// Transport capabilities the engine requires.
pub trait AttBearer {
    /// Queue one ATT PDU for transmission to the peer. Ownership of the
    /// bytes passes to the bearer on `Success` and `Congested`.
    fn send_pdu(&mut self, peer: BdAddr, pdu: &[u8]) -> BearerStatus;

    /// Push a newly negotiated MTU down to the fixed channel.
    fn set_fixed_channel_mtu(&mut self, peer: BdAddr, cid: u16, mtu: u16);
}

//! Per-bearer transaction state: the command queue and the TCB.

use super::types::{BdAddr, LinkEncryption};
use crate::att::constants::{ATT_DEFAULT_MTU, ATT_SIGNED_WRITE_CMD, ATT_WRITE_CMD};
use std::collections::VecDeque;
use std::time::Instant;

/// Ownership state of a queued request PDU.
///
/// A command is `Pending` while the queue still owns the encoded bytes, and
/// `Outstanding` once they have been handed to the bearer and the engine is
/// waiting for the matching response. Completion removes the command from
/// the queue altogether.
#[derive(Debug)]
pub(crate) enum PduState {
    Pending(Vec<u8>),
    Outstanding,
}

/// One queued client transaction.
#[derive(Debug)]
pub(crate) struct Command {
    /// Request opcode, used to compute the expected response opcode.
    pub op_code: u8,
    pub pdu: PduState,
    /// The operation this transaction belongs to, if any.
    pub clcb_idx: Option<usize>,
}

/// True for opcodes that never produce a server response.
pub(crate) fn opcode_has_response(op_code: u8) -> bool {
    op_code != ATT_WRITE_CMD && op_code != ATT_SIGNED_WRITE_CMD
}

/// Expected response opcode for a request, or 0 for commands.
pub(crate) fn cmd_to_rsp_code(cmd_code: u8) -> u8 {
    if cmd_code > 1 && opcode_has_response(cmd_code) {
        cmd_code + 1
    } else {
        0
    }
}

/// Per-bearer transaction control block.
pub(crate) struct Tcb {
    /// Peer address, used when talking to the bearer.
    pub peer: BdAddr,
    /// Effective ATT MTU. Starts at the default of 23 until an MTU
    /// exchange completes.
    pub payload_size: u16,
    /// FIFO of client transactions; at most the head is outstanding.
    pub cmd_queue: VecDeque<Command>,
    /// Server indications not yet confirmed by every subscribed app.
    pub ind_count: u16,
    /// Response-wait timer, armed whenever a request is outstanding.
    pub rsp_deadline: Option<Instant>,
    /// Indication-ack timer, armed while apps owe a confirmation.
    pub ind_ack_deadline: Option<Instant>,
    /// Snapshot source for notification/indication callbacks.
    pub link_encryption: LinkEncryption,
}

impl Tcb {
    pub fn new(peer: BdAddr) -> Self {
        Tcb {
            peer,
            payload_size: ATT_DEFAULT_MTU,
            cmd_queue: VecDeque::new(),
            ind_count: 0,
            rsp_deadline: None,
            ind_ack_deadline: None,
            link_encryption: LinkEncryption::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsp_code_mapping() {
        use crate::att::constants::*;
        assert_eq!(cmd_to_rsp_code(ATT_READ_REQ), ATT_READ_RSP);
        assert_eq!(cmd_to_rsp_code(ATT_WRITE_REQ), ATT_WRITE_RSP);
        assert_eq!(cmd_to_rsp_code(ATT_EXCHANGE_MTU_REQ), ATT_EXCHANGE_MTU_RSP);
        assert_eq!(cmd_to_rsp_code(ATT_WRITE_CMD), 0);
        assert_eq!(cmd_to_rsp_code(ATT_SIGNED_WRITE_CMD), 0);
        assert_eq!(cmd_to_rsp_code(ATT_ERROR_RSP), 0);
    }
}

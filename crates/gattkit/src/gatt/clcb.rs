//! Per-operation client control block.

use super::types::{
    AttributeValue, ClientOp, DiscoveryKind, GattStatus, ReadKind, WriteKind,
};
use crate::uuid::Uuid;

/// The procedure a CLCB is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Discovery(DiscoveryKind),
    Read(ReadKind),
    Write(WriteKind),
    /// Application-initiated Execute Write for a prepared queue.
    ExecuteWrite,
    Config,
}

impl Operation {
    /// The operation family reported to the completion callback.
    pub fn client_op(&self) -> ClientOp {
        match self {
            Operation::Discovery(_) => ClientOp::Discovery,
            Operation::Read(_) => ClientOp::Read,
            Operation::Write(_) | Operation::ExecuteWrite => ClientOp::Write,
            Operation::Config => ClientOp::Config,
        }
    }
}

/// State of a 128-bit included-service UUID read-back.
///
/// When an included-service record arrives with a 4-byte value, the service
/// UUID is 128-bit and must be fetched with a separate Read on the included
/// service's start handle before the record can be reported.
#[derive(Debug, Clone)]
pub(crate) struct PendingIncludedRead {
    /// Handle of the include declaration being completed.
    pub handle: u16,
    /// Handle range of the included service.
    pub incl_start: u16,
    pub incl_end: u16,
    /// Where discovery resumes once the UUID has been read.
    pub next_start: u16,
}

/// Per-operation client control block.
pub(crate) struct Clcb {
    pub conn_id: u16,
    pub tcb_idx: u8,
    pub operation: Operation,
    /// Discovery window / read-target cursor.
    pub s_handle: u16,
    pub e_handle: u16,
    /// Type filter for discover-by-UUID, read-by-type, and the
    /// characteristic filter of a read-char-by-UUID.
    pub uuid: Option<Uuid>,
    /// Bytes accumulated so far, or the chunk length of the prepared write
    /// in flight.
    pub counter: u16,
    /// Reassembly buffer for long reads, allocated lazily.
    pub attr_buf: Option<Vec<u8>>,
    /// Source value for writes; `offset` advances as chunks are prepared.
    pub write_value: Option<AttributeValue>,
    /// Caller-supplied base offset for reliable writes and partial reads.
    pub start_offset: u16,
    /// Handles of a Read Multiple request.
    pub read_multi: Vec<u16>,
    /// Toggled on every Read Blob issued during a read-by-handle, so the
    /// error path can recognize a NotLong on the first blob after the
    /// initial Read.
    pub first_blob_after_read: bool,
    /// Bearer MTU at the moment the read was submitted. Reassembly keeps
    /// terminating correctly when the MTU grows mid-operation.
    pub read_req_current_mtu: u16,
    pub pending_incl_read: Option<PendingIncludedRead>,
    /// Provisional status, finalized when the operation completes.
    pub status: GattStatus,
    pub retry_count: u8,
}

impl Clcb {
    pub fn new(conn_id: u16, tcb_idx: u8, operation: Operation) -> Self {
        Clcb {
            conn_id,
            tcb_idx,
            operation,
            s_handle: 0,
            e_handle: 0,
            uuid: None,
            counter: 0,
            attr_buf: None,
            write_value: None,
            start_offset: 0,
            read_multi: Vec::new(),
            first_blob_after_read: false,
            read_req_current_mtu: 0,
            pending_incl_read: None,
            status: GattStatus::Success,
            retry_count: 0,
        }
    }
}

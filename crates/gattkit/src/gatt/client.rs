//! GATT client protocol engine.
//!
//! The engine is strictly event-driven: applications submit operations, the
//! bearer delivers inbound PDU bytes, and timers fire through
//! [`GattClient::process_timeouts`]. All of it runs on one execution
//! context. Per bearer, requests are serialized through a FIFO command queue
//! with at most one transaction outstanding; multi-round procedures advance
//! their handle cursor each time the matching response arrives.

use super::clcb::{Clcb, Operation, PendingIncludedRead};
use super::registry::{connection_id, split_connection_id, AppCallbacks, Registry};
use super::tcb::{cmd_to_rsp_code, opcode_has_response, Command, PduState, Tcb};
use super::types::{
    AttributeValue, BdAddr, CharacteristicProperties, CompletionData, DiscoveryKind,
    DiscoveryResult, DiscoveryValue, GattStatus, LinkEncryption, ReadKind, ReadParam, WriteKind,
};
use crate::att::constants::*;
use crate::att::pdu::*;
use crate::bearer::{AttBearer, BearerStatus};
use crate::uuid::Uuid;
use log::{debug, error, trace, warn};
use std::time::Instant;
use thiserror::Error;

/// Errors reported when an operation cannot be submitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GattError {
    #[error("no bearer for this connection")]
    NotConnected,

    #[error("application is not registered")]
    NotRegistered,

    #[error("application registry is full")]
    RegistryFull,

    #[error("no free bearer slot")]
    NoFreeChannel,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("no indication awaiting confirmation")]
    NoPendingIndication,
}

/// Handler selected for an inbound PDU opcode.
#[derive(Debug, Clone, Copy)]
enum RspHandler {
    Notify,
    Error,
    Mtu,
    FindInfo,
    ReadByType,
    Read,
    FindByTypeValue,
    Write,
    PrepareWrite,
    ExecuteWrite,
}

/// Routing table for server PDUs. The second element says whether the PDU
/// answers the queued transaction at the head of the command queue.
fn rsp_dispatch(op_code: u8) -> Option<(RspHandler, bool)> {
    let entry = match op_code {
        ATT_HANDLE_VALUE_NTF | ATT_HANDLE_VALUE_IND => (RspHandler::Notify, false),
        ATT_ERROR_RSP => (RspHandler::Error, true),
        ATT_EXCHANGE_MTU_RSP => (RspHandler::Mtu, true),
        ATT_FIND_INFO_RSP => (RspHandler::FindInfo, true),
        ATT_READ_BY_TYPE_RSP | ATT_READ_BY_GROUP_TYPE_RSP => (RspHandler::ReadByType, true),
        ATT_READ_RSP | ATT_READ_BLOB_RSP | ATT_READ_MULTIPLE_RSP => (RspHandler::Read, true),
        ATT_FIND_BY_TYPE_VALUE_RSP => (RspHandler::FindByTypeValue, true),
        ATT_WRITE_RSP => (RspHandler::Write, true),
        ATT_PREPARE_WRITE_RSP => (RspHandler::PrepareWrite, true),
        ATT_EXECUTE_WRITE_RSP => (RspHandler::ExecuteWrite, true),
        _ => return None,
    };
    Some(entry)
}

/// The GATT client engine: one instance serves every registered application
/// and every connected peer.
pub struct GattClient<B: AttBearer> {
    bearer: B,
    registry: Registry,
    tcbs: Vec<Option<Tcb>>,
    clcbs: Vec<Option<Clcb>>,
}

impl<B: AttBearer> GattClient<B> {
    pub fn new(bearer: B) -> Self {
        let mut tcbs = Vec::with_capacity(GATT_MAX_PHY_CHANNELS);
        tcbs.resize_with(GATT_MAX_PHY_CHANNELS, || None);
        GattClient {
            bearer,
            registry: Registry::new(),
            tcbs,
            clcbs: Vec::new(),
        }
    }

    /// Access the transport this engine drives.
    pub fn bearer(&self) -> &B {
        &self.bearer
    }

    pub fn bearer_mut(&mut self) -> &mut B {
        &mut self.bearer
    }

    // ----- registry and bearer lifecycle -----

    /// Register an application; returns its app id.
    pub fn register(&mut self, callbacks: AppCallbacks) -> Result<u8, GattError> {
        self.registry
            .register(callbacks)
            .ok_or(GattError::RegistryFull)
    }

    pub fn deregister(&mut self, app_id: u8) {
        if !self.registry.deregister(app_id) {
            warn!("deregister of unknown app {}", app_id);
        }
    }

    /// Bind a bearer slot to a newly connected peer and return its index.
    pub fn on_link_up(&mut self, peer: BdAddr) -> Result<u8, GattError> {
        if let Some(idx) = self
            .tcbs
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |t| t.peer == peer))
        {
            return Ok(idx as u8);
        }
        match self.tcbs.iter().position(|slot| slot.is_none()) {
            Some(idx) => {
                self.tcbs[idx] = Some(Tcb::new(peer));
                Ok(idx as u8)
            }
            None => Err(GattError::NoFreeChannel),
        }
    }

    /// Tear down a bearer: every queued operation completes with `Error` and
    /// all per-operation state for the bearer is released.
    pub fn on_link_down(&mut self, tcb_idx: u8) {
        let Some(tcb) = self.tcbs.get_mut(tcb_idx as usize).and_then(Option::take) else {
            return;
        };
        debug!("bearer {} down, purging {} commands", tcb_idx, tcb.cmd_queue.len());
        for cmd in tcb.cmd_queue {
            if let Some(clcb_idx) = cmd.clcb_idx {
                self.end_operation(clcb_idx, GattStatus::Error, None);
            }
        }
        for slot in self.clcbs.iter_mut() {
            if slot.as_ref().map_or(false, |c| c.tcb_idx == tcb_idx) {
                *slot = None;
            }
        }
    }

    /// Record the link's encryption state; snapshots of it accompany every
    /// notification and indication callback.
    pub fn set_link_encryption(&mut self, tcb_idx: u8, encryption: LinkEncryption) {
        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.link_encryption = encryption;
        }
    }

    /// Connection id for an (application, bearer) pairing.
    pub fn connection_id(&self, tcb_idx: u8, app_id: u8) -> u16 {
        connection_id(tcb_idx, app_id)
    }

    /// The effective ATT MTU of a bearer.
    pub fn payload_size(&self, tcb_idx: u8) -> Option<u16> {
        self.tcb(tcb_idx).map(|t| t.payload_size)
    }

    // ----- operation submission -----

    /// Start a discovery procedure over `[start_handle, end_handle]`.
    pub fn discover(
        &mut self,
        conn_id: u16,
        kind: DiscoveryKind,
        start_handle: u16,
        end_handle: u16,
        uuid: Option<Uuid>,
    ) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        if !att_handle_is_valid(start_handle) || start_handle > end_handle {
            return Err(GattError::InvalidParameter("illegal discovery handle range"));
        }
        if kind == DiscoveryKind::ServiceByUuid && uuid.is_none() {
            return Err(GattError::InvalidParameter(
                "service discovery by UUID requires a UUID",
            ));
        }

        let mut clcb = Clcb::new(conn_id, tcb_idx, Operation::Discovery(kind));
        clcb.s_handle = start_handle;
        clcb.e_handle = end_handle;
        clcb.uuid = uuid;
        let clcb_idx = self.install_clcb(clcb);
        self.act_discovery(clcb_idx);
        Ok(())
    }

    /// Start a read procedure.
    pub fn read(&mut self, conn_id: u16, param: ReadParam) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        let payload_size = self
            .tcb(tcb_idx)
            .map(|t| t.payload_size)
            .unwrap_or(ATT_DEFAULT_MTU);

        let kind = match &param {
            ReadParam::ByHandle { .. } => ReadKind::ByHandle,
            ReadParam::CharByUuid { .. } => ReadKind::CharByUuid,
            ReadParam::ByType { .. } => ReadKind::ByType,
            ReadParam::Partial { .. } => ReadKind::Partial,
            ReadParam::Multiple { .. } => ReadKind::Multiple,
        };
        let mut clcb = Clcb::new(conn_id, tcb_idx, Operation::Read(kind));
        clcb.read_req_current_mtu = payload_size;

        let mut initial_offset = 0;
        match param {
            ReadParam::ByHandle { handle } => {
                if !att_handle_is_valid(handle) {
                    return Err(GattError::InvalidParameter("invalid attribute handle"));
                }
                clcb.s_handle = handle;
            }
            ReadParam::CharByUuid {
                start_handle,
                end_handle,
                uuid,
            }
            | ReadParam::ByType {
                start_handle,
                end_handle,
                uuid,
            } => {
                if !att_handle_is_valid(start_handle) || start_handle > end_handle {
                    return Err(GattError::InvalidParameter("illegal read handle range"));
                }
                clcb.s_handle = start_handle;
                clcb.e_handle = end_handle;
                clcb.uuid = Some(uuid);
            }
            ReadParam::Partial { handle, offset } => {
                if !att_handle_is_valid(handle) {
                    return Err(GattError::InvalidParameter("invalid attribute handle"));
                }
                clcb.s_handle = handle;
                clcb.start_offset = offset;
                initial_offset = offset;
            }
            ReadParam::Multiple { handles } => {
                if handles.len() < 2 {
                    return Err(GattError::InvalidParameter(
                        "read multiple needs at least two handles",
                    ));
                }
                if handles.iter().any(|h| !att_handle_is_valid(*h)) {
                    return Err(GattError::InvalidParameter("invalid attribute handle"));
                }
                clcb.read_multi = handles;
            }
        }

        let clcb_idx = self.install_clcb(clcb);
        self.act_read(clcb_idx, initial_offset);
        Ok(())
    }

    /// Start a write procedure. `offset` is only meaningful for
    /// [`WriteKind::Prepare`], where it shifts the prepared chunks inside
    /// the target attribute.
    pub fn write(
        &mut self,
        conn_id: u16,
        kind: WriteKind,
        handle: u16,
        value: Vec<u8>,
        offset: u16,
    ) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        if !att_handle_is_valid(handle) {
            return Err(GattError::InvalidParameter("invalid attribute handle"));
        }
        if value.len() > ATT_MAX_ATTR_LEN {
            return Err(GattError::InvalidParameter(
                "value longer than the maximum attribute length",
            ));
        }

        let mut clcb = Clcb::new(conn_id, tcb_idx, Operation::Write(kind));
        clcb.write_value = Some(AttributeValue {
            handle,
            offset: 0,
            value,
        });
        clcb.start_offset = offset;
        let clcb_idx = self.install_clcb(clcb);
        self.act_write(clcb_idx);
        Ok(())
    }

    /// Commit or cancel the peer's prepared write queue.
    pub fn execute_write(&mut self, conn_id: u16, execute: bool) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        let clcb = Clcb::new(conn_id, tcb_idx, Operation::ExecuteWrite);
        let clcb_idx = self.install_clcb(clcb);
        self.send_execute_write(tcb_idx, Some(clcb_idx), execute);
        Ok(())
    }

    /// Negotiate the ATT MTU. One exchange per connection is meaningful;
    /// the result is reported through the completion callback.
    pub fn configure_mtu(&mut self, conn_id: u16, mtu: u16) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        let mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);

        let mut clcb = Clcb::new(conn_id, tcb_idx, Operation::Config);
        // remember what we asked for; the response handler clamps against it
        clcb.counter = mtu;
        let clcb_idx = self.install_clcb(clcb);
        let pdu = ExchangeMtuRequest { client_mtu: mtu }.serialize();
        self.enqueue_request(tcb_idx, ATT_EXCHANGE_MTU_REQ, pdu, Some(clcb_idx));
        Ok(())
    }

    /// Acknowledge an indication on behalf of one application. Once every
    /// subscribed application has acknowledged, the confirmation PDU goes
    /// out.
    pub fn send_indication_confirmation(&mut self, conn_id: u16) -> Result<(), GattError> {
        let tcb_idx = self.check_connection(conn_id)?;
        let all_acked = {
            let Some(tcb) = self.tcb_mut(tcb_idx) else {
                return Err(GattError::NotConnected);
            };
            if tcb.ind_count == 0 {
                return Err(GattError::NoPendingIndication);
            }
            tcb.ind_count -= 1;
            if tcb.ind_count == 0 {
                tcb.ind_ack_deadline = None;
                true
            } else {
                false
            }
        };
        if all_acked {
            self.send_confirmation(tcb_idx);
        }
        Ok(())
    }

    // ----- bearer events -----

    /// Feed one inbound ATT PDU (opcode byte included) from the bearer.
    pub fn handle_inbound(&mut self, tcb_idx: u8, pdu: &[u8]) {
        let Some(&op_code) = pdu.first() else {
            warn!("empty ATT PDU, discard");
            return;
        };
        let payload = &pdu[1..];
        let Some(payload_size) = self.payload_size(tcb_idx) else {
            warn!("ATT PDU for unknown bearer {}", tcb_idx);
            return;
        };

        let Some((handler, answers_transaction)) = rsp_dispatch(op_code) else {
            warn!("unexpected server opcode 0x{:02X}, discard", op_code);
            return;
        };

        if !answers_transaction {
            // server-initiated: no queue interaction
            if payload.len() >= payload_size as usize {
                error!(
                    "notification pkt size {} exceeds MTU {}, discard",
                    payload.len() + 1,
                    payload_size
                );
                return;
            }
            self.process_notification(tcb_idx, op_code, payload);
            return;
        }

        // The response consumes the transaction at the head of the queue.
        let Some(cmd) = self
            .tcb_mut(tcb_idx)
            .and_then(|tcb| tcb.cmd_queue.pop_front())
        else {
            warn!("response 0x{:02X} with no transaction outstanding, discard", op_code);
            return;
        };

        let rsp_code = cmd_to_rsp_code(cmd.op_code);
        if op_code != rsp_code && op_code != ATT_ERROR_RSP {
            warn!(
                "ignoring wrong response: received 0x{:02X} while expecting 0x{:02X}",
                op_code, rsp_code
            );
            self.send_next_cmd(tcb_idx);
            return;
        }

        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.rsp_deadline = None;
        }

        let clcb_idx = cmd
            .clcb_idx
            .filter(|&idx| self.clcbs.get(idx).map_or(false, |slot| slot.is_some()));
        let Some(clcb_idx) = clcb_idx else {
            warn!("CLCB already released, ignoring response");
            self.send_next_cmd(tcb_idx);
            return;
        };
        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
            clcb.retry_count = 0;
        }

        trace!(
            "rsp op_code=0x{:02X} len={} for request 0x{:02X}",
            op_code,
            payload.len(),
            cmd.op_code
        );

        // The response may not be bigger than the agreed MTU.
        if payload.len() >= payload_size as usize {
            error!(
                "invalid response pkt size {} for MTU {}",
                payload.len() + 1,
                payload_size
            );
            self.end_operation(clcb_idx, GattStatus::Error, None);
        } else {
            match handler {
                RspHandler::Error => self.process_error_rsp(clcb_idx, pdu),
                RspHandler::Mtu => self.process_mtu_rsp(tcb_idx, clcb_idx, pdu),
                RspHandler::FindInfo => self.process_read_info_rsp(clcb_idx, pdu),
                RspHandler::ReadByType => {
                    self.process_read_by_type_rsp(tcb_idx, clcb_idx, op_code, payload)
                }
                RspHandler::Read => self.process_read_rsp(tcb_idx, clcb_idx, payload),
                RspHandler::FindByTypeValue => self.process_find_type_value_rsp(clcb_idx, pdu),
                RspHandler::Write => self.process_write_rsp(clcb_idx),
                RspHandler::PrepareWrite => self.process_prep_write_rsp(clcb_idx, pdu),
                RspHandler::ExecuteWrite => self.process_exec_write_rsp(clcb_idx),
                RspHandler::Notify => {}
            }
        }

        self.send_next_cmd(tcb_idx);
    }

    /// The bearer drained its transmit queue after reporting congestion.
    pub fn on_congestion_cleared(&mut self, tcb_idx: u8) {
        // A congested no-response command is done once the channel drains.
        let finished = {
            let Some(tcb) = self.tcb_mut(tcb_idx) else { return };
            let parked = tcb.cmd_queue.front().map_or(false, |cmd| {
                matches!(cmd.pdu, PduState::Outstanding) && !opcode_has_response(cmd.op_code)
            });
            if parked {
                tcb.cmd_queue.pop_front().and_then(|cmd| cmd.clcb_idx)
            } else {
                None
            }
        };
        if let Some(clcb_idx) = finished {
            self.end_operation(clcb_idx, GattStatus::Success, None);
        }
        self.send_next_cmd(tcb_idx);
    }

    /// Drive the per-bearer timers. Call periodically from the stack's
    /// event loop.
    pub fn process_timeouts(&mut self) {
        let now = Instant::now();
        for tcb_idx in 0..self.tcbs.len() as u8 {
            let rsp_expired = self.tcbs[tcb_idx as usize].as_mut().map_or(false, |tcb| {
                match tcb.rsp_deadline {
                    Some(deadline) if deadline <= now => {
                        tcb.rsp_deadline = None;
                        true
                    }
                    _ => false,
                }
            });
            if rsp_expired {
                error!("ATT response timeout on bearer {}", tcb_idx);
                let clcb_idx = self.tcbs[tcb_idx as usize]
                    .as_mut()
                    .and_then(|tcb| tcb.cmd_queue.pop_front())
                    .and_then(|cmd| cmd.clcb_idx);
                if let Some(clcb_idx) = clcb_idx {
                    self.end_operation(clcb_idx, GattStatus::Timeout, None);
                }
                self.send_next_cmd(tcb_idx);
            }

            let ind_expired = self.tcbs[tcb_idx as usize].as_mut().map_or(false, |tcb| {
                match tcb.ind_ack_deadline {
                    Some(deadline) if deadline <= now => {
                        tcb.ind_ack_deadline = None;
                        tcb.ind_count = 0;
                        true
                    }
                    _ => false,
                }
            });
            if ind_expired {
                warn!("indication not confirmed in time, acking on behalf of the apps");
                self.send_confirmation(tcb_idx);
            }
        }
    }

    // ----- control block plumbing -----

    #[cfg(test)]
    pub(crate) fn force_rsp_deadline(&mut self, tcb_idx: u8, deadline: Instant) {
        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.rsp_deadline = Some(deadline);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_ind_ack_deadline(&mut self, tcb_idx: u8, deadline: Instant) {
        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.ind_ack_deadline = Some(deadline);
        }
    }

    fn check_connection(&self, conn_id: u16) -> Result<u8, GattError> {
        let (tcb_idx, app_id) = split_connection_id(conn_id);
        if !self.registry.is_registered(app_id) {
            return Err(GattError::NotRegistered);
        }
        if self.tcb(tcb_idx).is_none() {
            return Err(GattError::NotConnected);
        }
        Ok(tcb_idx)
    }

    fn tcb(&self, tcb_idx: u8) -> Option<&Tcb> {
        self.tcbs.get(tcb_idx as usize)?.as_ref()
    }

    fn tcb_mut(&mut self, tcb_idx: u8) -> Option<&mut Tcb> {
        self.tcbs.get_mut(tcb_idx as usize)?.as_mut()
    }

    fn install_clcb(&mut self, clcb: Clcb) -> usize {
        match self.clcbs.iter().position(|slot| slot.is_none()) {
            Some(idx) => {
                self.clcbs[idx] = Some(clcb);
                idx
            }
            None => {
                self.clcbs.push(Some(clcb));
                self.clcbs.len() - 1
            }
        }
    }

    /// Complete an operation: release the CLCB and fire the app's
    /// completion callback exactly once.
    fn end_operation(&mut self, clcb_idx: usize, status: GattStatus, value: Option<AttributeValue>) {
        let Some(clcb) = self.clcbs.get_mut(clcb_idx).and_then(|slot| slot.take()) else {
            return;
        };
        let (_, app_id) = split_connection_id(clcb.conn_id);
        let op = clcb.operation.client_op();
        trace!(
            "operation complete conn_id=0x{:04X} op={:?} status={:?}",
            clcb.conn_id,
            op,
            status
        );
        let Some(cb) = self.registry.completion_cb(app_id) else {
            return;
        };
        let data = match clcb.operation {
            Operation::Config => {
                let mtu = self
                    .tcb(clcb.tcb_idx)
                    .map(|t| t.payload_size)
                    .unwrap_or(ATT_DEFAULT_MTU);
                CompletionData::Mtu(mtu)
            }
            _ => match &value {
                Some(v) => CompletionData::Value(v),
                None => CompletionData::None,
            },
        };
        (&mut *cb.lock().unwrap())(clcb.conn_id, op, status, data);
    }

    // ----- command queue and sender loop -----

    fn enqueue_request(
        &mut self,
        tcb_idx: u8,
        op_code: u8,
        pdu: Vec<u8>,
        clcb_idx: Option<usize>,
    ) {
        if self.tcb(tcb_idx).is_none() {
            if let Some(clcb_idx) = clcb_idx {
                self.end_operation(clcb_idx, GattStatus::Error, None);
            }
            return;
        }
        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.cmd_queue.push_back(Command {
                op_code,
                pdu: PduState::Pending(pdu),
                clcb_idx,
            });
        }
        self.send_next_cmd(tcb_idx);
    }

    /// Walk the queue head: hand pending PDUs to the bearer until a
    /// transaction is left outstanding or the queue drains.
    fn send_next_cmd(&mut self, tcb_idx: u8) -> bool {
        loop {
            let (op_code, clcb_idx, bytes, peer) = {
                let Some(tcb) = self.tcb_mut(tcb_idx) else {
                    return false;
                };
                let peer = tcb.peer;
                let Some(head) = tcb.cmd_queue.front_mut() else {
                    return false;
                };
                if matches!(head.pdu, PduState::Outstanding) {
                    // still waiting for the answer
                    return false;
                }
                let PduState::Pending(bytes) =
                    std::mem::replace(&mut head.pdu, PduState::Outstanding)
                else {
                    return false;
                };
                (head.op_code, head.clcb_idx, bytes, peer)
            };

            match self.bearer.send_pdu(peer, &bytes) {
                BearerStatus::Error => {
                    error!("bearer rejected PDU op_code=0x{:02X}", op_code);
                    if let Some(tcb) = self.tcb_mut(tcb_idx) {
                        tcb.cmd_queue.pop_front();
                    }
                    if let Some(clcb_idx) = clcb_idx {
                        self.end_operation(clcb_idx, GattStatus::Error, None);
                    }
                    continue;
                }
                BearerStatus::Congested => {
                    // The bearer owns the PDU now and flushes it once the
                    // channel drains; the transaction stays outstanding.
                    if opcode_has_response(op_code) {
                        self.arm_rsp_timer(tcb_idx);
                    }
                    return true;
                }
                BearerStatus::Success => {
                    if !opcode_has_response(op_code) {
                        // no acknowledgement follows a command
                        if let Some(tcb) = self.tcb_mut(tcb_idx) {
                            tcb.cmd_queue.pop_front();
                        }
                        if let Some(clcb_idx) = clcb_idx {
                            self.end_operation(clcb_idx, GattStatus::Success, None);
                        }
                        continue;
                    }
                    self.arm_rsp_timer(tcb_idx);
                    return true;
                }
            }
        }
    }

    fn arm_rsp_timer(&mut self, tcb_idx: u8) {
        if let Some(tcb) = self.tcb_mut(tcb_idx) {
            tcb.rsp_deadline = Some(Instant::now() + ATT_RSP_TIMEOUT);
        }
    }

    fn send_confirmation(&mut self, tcb_idx: u8) {
        let Some(peer) = self.tcb(tcb_idx).map(|t| t.peer) else {
            return;
        };
        self.bearer
            .send_pdu(peer, &HandleValueConfirmation.serialize());
    }

    // ----- request driver -----

    /// Issue the next discovery request, or finish when the window closes.
    fn act_discovery(&mut self, clcb_idx: usize) {
        let (tcb_idx, kind, s_handle, e_handle, uuid) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            let Operation::Discovery(kind) = clcb.operation else {
                return;
            };
            (clcb.tcb_idx, kind, clcb.s_handle, clcb.e_handle, clcb.uuid)
        };

        if s_handle > e_handle || s_handle == 0 {
            // end of handle range
            self.end_operation(clcb_idx, GattStatus::Success, None);
            return;
        }

        let (op_code, pdu) = match kind {
            DiscoveryKind::ServicesAll => (
                ATT_READ_BY_GROUP_TYPE_REQ,
                ReadByGroupTypeRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                    group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
                }
                .serialize(),
            ),
            DiscoveryKind::ServiceByUuid => (
                ATT_FIND_BY_TYPE_VALUE_REQ,
                FindByTypeValueRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                    attribute_type: PRIMARY_SERVICE_UUID,
                    attribute_value: uuid.map(|u| u.to_find_value()).unwrap_or_default(),
                }
                .serialize(),
            ),
            DiscoveryKind::IncludedServices => (
                ATT_READ_BY_TYPE_REQ,
                ReadByTypeRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                    attribute_type: Uuid::from_u16(INCLUDE_UUID),
                }
                .serialize(),
            ),
            DiscoveryKind::Characteristics => (
                ATT_READ_BY_TYPE_REQ,
                ReadByTypeRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                    attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
                }
                .serialize(),
            ),
            DiscoveryKind::Descriptors => (
                ATT_FIND_INFO_REQ,
                FindInformationRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                }
                .serialize(),
            ),
        };
        self.enqueue_request(tcb_idx, op_code, pdu, Some(clcb_idx));
    }

    /// Issue the next read request for the operation.
    fn act_read(&mut self, clcb_idx: usize, offset: u16) {
        let (tcb_idx, operation, s_handle, e_handle, uuid, counter) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            (
                clcb.tcb_idx,
                clcb.operation,
                clcb.s_handle,
                clcb.e_handle,
                clcb.uuid,
                clcb.counter,
            )
        };

        let (op_code, pdu) = match operation {
            Operation::Read(ReadKind::CharByUuid) => (
                ATT_READ_BY_TYPE_REQ,
                ReadByTypeRequest {
                    start_handle: s_handle,
                    end_handle: e_handle,
                    attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
                }
                .serialize(),
            ),
            Operation::Read(ReadKind::ByType) => {
                let Some(uuid) = uuid else {
                    self.end_operation(clcb_idx, GattStatus::InternalError, None);
                    return;
                };
                (
                    ATT_READ_BY_TYPE_REQ,
                    ReadByTypeRequest {
                        start_handle: s_handle,
                        end_handle: e_handle,
                        attribute_type: uuid,
                    }
                    .serialize(),
                )
            }
            Operation::Read(ReadKind::ByHandle) => {
                if counter == 0 {
                    (ATT_READ_REQ, ReadRequest { handle: s_handle }.serialize())
                } else {
                    if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                        clcb.first_blob_after_read = !clcb.first_blob_after_read;
                        trace!("first_blob_after_read={}", clcb.first_blob_after_read);
                    }
                    (
                        ATT_READ_BLOB_REQ,
                        ReadBlobRequest {
                            handle: s_handle,
                            offset,
                        }
                        .serialize(),
                    )
                }
            }
            Operation::Read(ReadKind::Partial) => (
                ATT_READ_BLOB_REQ,
                ReadBlobRequest {
                    handle: s_handle,
                    offset,
                }
                .serialize(),
            ),
            Operation::Read(ReadKind::Multiple) => {
                let handles = self.clcbs[clcb_idx]
                    .as_ref()
                    .map(|c| c.read_multi.clone())
                    .unwrap_or_default();
                (
                    ATT_READ_MULTIPLE_REQ,
                    ReadMultipleRequest { handles }.serialize(),
                )
            }
            // 128-bit included-service UUID read-back
            Operation::Discovery(_) => {
                (ATT_READ_REQ, ReadRequest { handle: s_handle }.serialize())
            }
            _ => {
                error!("unknown read type {:?}", operation);
                self.end_operation(clcb_idx, GattStatus::InternalError, None);
                return;
            }
        };
        self.enqueue_request(tcb_idx, op_code, pdu, Some(clcb_idx));
    }

    /// Issue the first request of a write operation.
    fn act_write(&mut self, clcb_idx: usize) {
        let (tcb_idx, kind, attr) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            let Operation::Write(kind) = clcb.operation else {
                return;
            };
            (clcb.tcb_idx, kind, clcb.write_value.clone())
        };
        let Some(attr) = attr else {
            error!("write without a value");
            self.end_operation(clcb_idx, GattStatus::InternalError, None);
            return;
        };
        let payload_size = self
            .tcb(tcb_idx)
            .map(|t| t.payload_size)
            .unwrap_or(ATT_DEFAULT_MTU);

        match kind {
            WriteKind::NoResponse { signed } => {
                if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                    clcb.s_handle = attr.handle;
                }
                let (op_code, pdu) = if signed {
                    (
                        ATT_SIGNED_WRITE_CMD,
                        SignedWriteCommand {
                            handle: attr.handle,
                            value: attr.value,
                        }
                        .serialize(),
                    )
                } else {
                    (
                        ATT_WRITE_CMD,
                        WriteCommand {
                            handle: attr.handle,
                            value: attr.value,
                        }
                        .serialize(),
                    )
                };
                self.enqueue_request(tcb_idx, op_code, pdu, Some(clcb_idx));
            }
            WriteKind::Normal => {
                if attr.value.len() <= (payload_size - ATT_HDR_SIZE) as usize {
                    if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                        clcb.s_handle = attr.handle;
                    }
                    let pdu = WriteRequest {
                        handle: attr.handle,
                        value: attr.value,
                    }
                    .serialize();
                    self.enqueue_request(tcb_idx, ATT_WRITE_REQ, pdu, Some(clcb_idx));
                } else {
                    // prepare write for a long attribute
                    self.send_prepare_write(clcb_idx);
                }
            }
            WriteKind::Prepare => self.send_prepare_write(clcb_idx),
        }
    }

    /// Send the next prepared chunk of a long or reliable write.
    fn send_prepare_write(&mut self, clcb_idx: usize) {
        let (tcb_idx, pdu) = {
            let payload_size = {
                let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                    return;
                };
                self.tcb(clcb.tcb_idx)
                    .map(|t| t.payload_size)
                    .unwrap_or(ATT_DEFAULT_MTU)
            };
            let Some(clcb) = self.clcbs[clcb_idx].as_mut() else {
                return;
            };
            let is_reliable = clcb.operation == Operation::Write(WriteKind::Prepare);
            let start_offset = clcb.start_offset;
            let Some(attr) = clcb.write_value.as_mut() else {
                return;
            };

            let remaining = attr.value.len() as u16 - attr.offset;
            let to_send = remaining.min(payload_size - ATT_WRITE_LONG_HDR_SIZE);

            clcb.s_handle = attr.handle;

            let mut offset = attr.offset;
            if is_reliable {
                offset += start_offset;
            }
            trace!("prepare write offset=0x{:04X} len={}", offset, to_send);

            let chunk =
                attr.value[attr.offset as usize..(attr.offset + to_send) as usize].to_vec();
            let pdu = PrepareWriteRequest {
                handle: attr.handle,
                offset,
                value: chunk,
            }
            .serialize();
            // remember the chunk length for echo verification
            clcb.counter = to_send;
            (clcb.tcb_idx, pdu)
        };
        self.enqueue_request(tcb_idx, ATT_PREPARE_WRITE_REQ, pdu, Some(clcb_idx));
    }

    fn send_execute_write(&mut self, tcb_idx: u8, clcb_idx: Option<usize>, commit: bool) {
        let flags = if commit {
            ATT_EXEC_WRITE_COMMIT
        } else {
            ATT_EXEC_WRITE_CANCEL
        };
        let pdu = ExecuteWriteRequest { flags }.serialize();
        self.enqueue_request(tcb_idx, ATT_EXECUTE_WRITE_REQ, pdu, clcb_idx);
    }

    /// The prepared queue cannot be trusted any more: cancel it on the peer
    /// and finish the operation with `status`.
    fn abort_prepared_write(&mut self, clcb_idx: usize, status: GattStatus) {
        let Some((tcb_idx, kind)) = self.clcbs[clcb_idx].as_mut().map(|clcb| {
            clcb.status = status;
            let kind = match clcb.operation {
                Operation::Write(kind) => Some(kind),
                _ => None,
            };
            (clcb.tcb_idx, kind)
        }) else {
            return;
        };
        let Some(kind) = kind else {
            self.end_operation(clcb_idx, status, None);
            return;
        };
        if kind == WriteKind::Prepare {
            // report right away; the cancel runs as a detached transaction
            self.send_execute_write(tcb_idx, None, false);
            self.end_operation(clcb_idx, status, None);
        } else {
            self.send_execute_write(tcb_idx, Some(clcb_idx), false);
        }
    }

    // ----- response handlers -----

    fn process_error_rsp(&mut self, clcb_idx: usize, pdu: &[u8]) {
        let (req_opcode, handle, reason) = match ErrorResponse::parse(pdu) {
            Ok(rsp) => (rsp.request_opcode, rsp.handle, u8::from(rsp.error_code)),
            // A short error response still says the request failed, only
            // not why; treat the reason as unknown.
            Err(_) => {
                error!("error response too short");
                (0, 0, ATT_ERROR_UNKNOWN)
            }
        };

        let (operation, first_blob, write_handle) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            (
                clcb.operation,
                clcb.first_blob_after_read,
                clcb.write_value.as_ref().map(|a| a.handle),
            )
        };

        match operation {
            Operation::Discovery(_) => self.proc_disc_error_rsp(clcb_idx, req_opcode, reason),
            Operation::Write(WriteKind::Normal)
                if req_opcode == ATT_PREPARE_WRITE_REQ && write_handle == Some(handle) =>
            {
                // a chunk was rejected mid long-write: unwind the peer's
                // prepared queue, keeping the reason as the final status
                self.abort_prepared_write(clcb_idx, GattStatus::from(reason));
            }
            Operation::Read(ReadKind::ByHandle)
                if req_opcode == ATT_READ_BLOB_REQ
                    && first_blob
                    && reason == ATT_ERROR_ATTRIBUTE_NOT_LONG =>
            {
                // the value ends exactly where the first Read did
                let value = self.clcbs[clcb_idx].as_mut().map(|clcb| AttributeValue {
                    handle: clcb.s_handle,
                    offset: 0,
                    value: clcb.attr_buf.take().unwrap_or_default(),
                });
                self.end_operation(clcb_idx, GattStatus::Success, value);
            }
            _ => self.end_operation(clcb_idx, GattStatus::from(reason), None),
        }
    }

    /// During discovery, "attribute not found" is how the server says the
    /// walk reached the end.
    fn proc_disc_error_rsp(&mut self, clcb_idx: usize, req_opcode: u8, reason: u8) {
        let mut status = GattStatus::from(reason);
        match req_opcode {
            ATT_READ_BY_GROUP_TYPE_REQ | ATT_FIND_BY_TYPE_VALUE_REQ | ATT_READ_BY_TYPE_REQ
            | ATT_FIND_INFO_REQ => {
                if reason == ATT_ERROR_ATTRIBUTE_NOT_FOUND {
                    debug!("discovery completed");
                    status = GattStatus::Success;
                }
            }
            _ => error!("incorrect discovery opcode 0x{:02X}", req_opcode),
        }
        self.end_operation(clcb_idx, status, None);
    }

    fn process_mtu_rsp(&mut self, tcb_idx: u8, clcb_idx: usize, pdu: &[u8]) {
        let mut status = GattStatus::Success;
        match ExchangeMtuResponse::parse(pdu) {
            Ok(rsp) => {
                let requested = self.clcbs[clcb_idx]
                    .as_ref()
                    .map(|c| c.counter)
                    .unwrap_or(ATT_DEFAULT_MTU);
                if let Some(tcb) = self.tcb_mut(tcb_idx) {
                    tcb.payload_size = rsp.server_mtu.min(requested).max(ATT_DEFAULT_MTU);
                }
            }
            Err(_) => {
                error!("invalid MTU response PDU received, discard");
                status = GattStatus::InvalidPdu;
            }
        }

        if let Some((peer, payload_size)) = self.tcb(tcb_idx).map(|t| (t.peer, t.payload_size)) {
            self.bearer.set_fixed_channel_mtu(peer, ATT_CID, payload_size);
        }
        self.end_operation(clcb_idx, status, None);
    }

    /// Descriptor discovery results.
    fn process_read_info_rsp(&mut self, clcb_idx: usize, pdu: &[u8]) {
        let Ok(rsp) = FindInformationResponse::parse(pdu) else {
            error!("invalid info response PDU received, discard");
            self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
            return;
        };

        let (conn_id, operation) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            (clcb.conn_id, clcb.operation)
        };
        if operation != Operation::Discovery(DiscoveryKind::Descriptors) {
            // unexpected response
            return;
        }

        let (_, app_id) = split_connection_id(conn_id);
        let cb = self.registry.discovery_cb(app_id);
        let mut last_handle = 0u16;
        for (handle, uuid) in &rsp.pairs {
            last_handle = *handle;
            if let Some(cb) = &cb {
                let result = DiscoveryResult {
                    handle: *handle,
                    value: DiscoveryValue::Descriptor { uuid: *uuid },
                };
                (&mut *cb.lock().unwrap())(conn_id, DiscoveryKind::Descriptors, &result);
            }
        }

        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
            clcb.s_handle = if last_handle == 0 {
                0
            } else {
                last_handle.wrapping_add(1)
            };
        }
        self.act_discovery(clcb_idx);
    }

    /// Service-by-UUID discovery results: a run of handle ranges.
    fn process_find_type_value_rsp(&mut self, clcb_idx: usize, pdu: &[u8]) {
        let (conn_id, operation, uuid) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            (clcb.conn_id, clcb.operation, clcb.uuid)
        };
        if operation != Operation::Discovery(DiscoveryKind::ServiceByUuid) {
            // unexpected response
            return;
        }

        let Ok(rsp) = FindByTypeValueResponse::parse(pdu) else {
            self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
            return;
        };

        let service_uuid = uuid.unwrap_or(Uuid::from_u16(PRIMARY_SERVICE_UUID));
        let (_, app_id) = split_connection_id(conn_id);
        let cb = self.registry.discovery_cb(app_id);
        let mut last_end = 0u16;
        for range in &rsp.handles {
            last_end = range.group_end_handle;
            if let Some(cb) = &cb {
                let result = DiscoveryResult {
                    handle: range.found_handle,
                    value: DiscoveryValue::Service {
                        end_handle: range.group_end_handle,
                        uuid: service_uuid,
                    },
                };
                (&mut *cb.lock().unwrap())(conn_id, DiscoveryKind::ServiceByUuid, &result);
            }
        }

        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
            clcb.s_handle = if last_end == 0 {
                0
            } else {
                last_end.wrapping_add(1)
            };
        }
        self.act_discovery(clcb_idx);
    }

    /// Read By Type / Read By Group Type responses serve three masters:
    /// service and characteristic discovery, included-service discovery,
    /// and characteristic value reads.
    fn process_read_by_type_rsp(
        &mut self,
        tcb_idx: u8,
        clcb_idx: usize,
        op_code: u8,
        payload: &[u8],
    ) {
        let (conn_id, operation, filter_uuid, payload_size) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            let payload_size = self
                .tcb(tcb_idx)
                .map(|t| t.payload_size)
                .unwrap_or(ATT_DEFAULT_MTU);
            (clcb.conn_id, clcb.operation, clcb.uuid, payload_size)
        };
        let (_, app_id) = split_connection_id(conn_id);
        let disc_cb = self.registry.discovery_cb(app_id);
        if matches!(operation, Operation::Discovery(_)) && disc_cb.is_none() {
            debug!("discovery response with no result callback registered");
            return;
        }

        if payload.len() < ATT_READ_BY_TYPE_RSP_MIN_LEN {
            error!("illegal ReadByType/ReadByGroupType response length, discard");
            self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
            return;
        }

        let pair_len = payload[0] as usize;
        if pair_len > payload_size as usize - 2 || pair_len > payload.len() - 1 {
            // a record cannot be wider than MTU-2 nor extend past the PDU
            error!(
                "discard response op_code={} pair_len={} > (MTU-2={} or msg_len-1={})",
                op_code,
                pair_len,
                payload_size - 2,
                payload.len() - 1
            );
            self.end_operation(clcb_idx, GattStatus::Error, None);
            return;
        }

        let handle_len: usize = if op_code == ATT_READ_BY_GROUP_TYPE_RSP { 4 } else { 2 };
        if pair_len < handle_len {
            error!("record length {} shorter than its handles", pair_len);
            self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
            return;
        }
        let value_len = pair_len - handle_len;

        let mut body = &payload[1..];
        let mut last_handle = 0u16;

        while body.len() >= pair_len {
            let handle = u16::from_le_bytes([body[0], body[1]]);
            if !att_handle_is_valid(handle) {
                self.end_operation(clcb_idx, GattStatus::InvalidHandle, None);
                return;
            }
            last_handle = handle;

            match operation {
                // discover all services
                Operation::Discovery(DiscoveryKind::ServicesAll)
                    if op_code == ATT_READ_BY_GROUP_TYPE_RSP =>
                {
                    let e_handle = u16::from_le_bytes([body[2], body[3]]);
                    if !att_handle_is_valid(e_handle) {
                        self.end_operation(clcb_idx, GattStatus::InvalidHandle, None);
                        return;
                    }
                    let Some(uuid) = Uuid::from_bytes(&body[4..4 + value_len]) else {
                        error!("discover all services response parsing failure");
                        break;
                    };
                    last_handle = e_handle;
                    if let Some(cb) = &disc_cb {
                        let result = DiscoveryResult {
                            handle,
                            value: DiscoveryValue::Service {
                                end_handle: e_handle,
                                uuid,
                            },
                        };
                        (&mut *cb.lock().unwrap())(conn_id, DiscoveryKind::ServicesAll, &result);
                    }
                }
                // discover included services
                Operation::Discovery(DiscoveryKind::IncludedServices) => {
                    if value_len < 4 {
                        error!("include record length must be at least 4");
                        self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
                        return;
                    }
                    let incl_start = u16::from_le_bytes([body[2], body[3]]);
                    let incl_end = u16::from_le_bytes([body[4], body[5]]);
                    if !att_handle_is_valid(incl_start) || !att_handle_is_valid(incl_end) {
                        self.end_operation(clcb_idx, GattStatus::InvalidHandle, None);
                        return;
                    }
                    if value_len == 6 {
                        let service_type =
                            Uuid::from_u16(u16::from_le_bytes([body[6], body[7]]));
                        if let Some(cb) = &disc_cb {
                            let result = DiscoveryResult {
                                handle,
                                value: DiscoveryValue::IncludedService {
                                    start_handle: incl_start,
                                    end_handle: incl_end,
                                    uuid: service_type,
                                },
                            };
                            (&mut *cb.lock().unwrap())(
                                conn_id,
                                DiscoveryKind::IncludedServices,
                                &result,
                            );
                        }
                    } else if value_len == 4 {
                        // the service UUID is 128-bit: fetch it with a
                        // separate read before reporting the record
                        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                            clcb.s_handle = incl_start;
                            clcb.pending_incl_read = Some(PendingIncludedRead {
                                handle,
                                incl_start,
                                incl_end,
                                next_start: handle.wrapping_add(1),
                            });
                        }
                        self.act_read(clcb_idx, 0);
                        return;
                    } else {
                        error!("include record with invalid value_len={}", value_len);
                        self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
                        return;
                    }
                }
                // read a value by type: the first record is the result and
                // any trailing bytes belong to its value
                Operation::Read(ReadKind::ByType) => {
                    let tail = &body[2..];
                    let counter = tail.len() as u16;
                    if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                        clcb.counter = counter;
                        clcb.s_handle = handle;
                    }
                    if counter == payload_size - 4 {
                        // a maximally full response: the value may continue
                        if counter as usize <= ATT_MAX_ATTR_LEN {
                            if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                                clcb.operation = Operation::Read(ReadKind::ByHandle);
                                let buf = clcb
                                    .attr_buf
                                    .get_or_insert_with(|| Vec::with_capacity(ATT_MAX_ATTR_LEN));
                                buf.clear();
                                buf.extend_from_slice(tail);
                            }
                            self.act_read(clcb_idx, counter);
                        } else {
                            self.end_operation(clcb_idx, GattStatus::InternalError, None);
                        }
                    } else {
                        let value = AttributeValue {
                            handle,
                            offset: 0,
                            value: tail.to_vec(),
                        };
                        self.end_operation(clcb_idx, GattStatus::Success, Some(value));
                    }
                    return;
                }
                // characteristic declarations, for discovery or for a
                // read-char-value-by-UUID
                _ => {
                    if value_len < 3 {
                        error!("characteristic record length must be at least 3");
                        self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
                        return;
                    }
                    let char_prop = body[2];
                    let val_handle = u16::from_le_bytes([body[3], body[4]]);
                    if !att_handle_is_valid(val_handle) {
                        self.end_operation(clcb_idx, GattStatus::InvalidHandle, None);
                        return;
                    }
                    let Some(char_uuid) = Uuid::from_bytes(&body[5..pair_len]) else {
                        // invalid declaration format: skip the rest
                        self.end_operation(clcb_idx, GattStatus::Success, None);
                        return;
                    };

                    // apply the caller's characteristic filter
                    if let Some(filter) = filter_uuid {
                        if filter != char_uuid {
                            body = &body[pair_len..];
                            continue;
                        }
                    }

                    if matches!(operation, Operation::Read(_)) {
                        // first matching declaration wins; read its value
                        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                            clcb.s_handle = val_handle;
                            clcb.operation = Operation::Read(ReadKind::ByHandle);
                        }
                        self.act_read(clcb_idx, 0);
                        return;
                    }

                    if let Some(cb) = &disc_cb {
                        let result = DiscoveryResult {
                            handle,
                            value: DiscoveryValue::Characteristic {
                                properties: CharacteristicProperties::from_bits_truncate(
                                    char_prop,
                                ),
                                value_handle: val_handle,
                                uuid: char_uuid,
                            },
                        };
                        (&mut *cb.lock().unwrap())(conn_id, DiscoveryKind::Characteristics, &result);
                    }
                }
            }

            body = &body[pair_len..];
        }

        if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
            clcb.s_handle = if last_handle == 0 {
                0
            } else {
                last_handle.wrapping_add(1)
            };
        }

        if matches!(operation, Operation::Discovery(_)) {
            self.act_discovery(clcb_idx);
        } else {
            // keep scanning the window for a matching characteristic
            self.act_read(clcb_idx, 0);
        }
    }

    /// Read / Read Blob / Read Multiple responses.
    fn process_read_rsp(&mut self, tcb_idx: u8, clcb_idx: usize, payload: &[u8]) {
        let (operation, s_handle, pending) = {
            let Some(clcb) = self.clcbs[clcb_idx].as_ref() else {
                return;
            };
            (
                clcb.operation,
                clcb.s_handle,
                clcb.pending_incl_read.is_some(),
            )
        };

        match operation {
            Operation::Read(ReadKind::ByHandle) => {
                self.process_long_read_chunk(tcb_idx, clcb_idx, payload)
            }
            Operation::Read(_) => {
                // short read, partial read, read multiple
                if let Some(clcb) = self.clcbs[clcb_idx].as_mut() {
                    clcb.counter = payload.len() as u16;
                }
                let value = AttributeValue {
                    handle: s_handle,
                    offset: 0,
                    value: payload.to_vec(),
                };
                self.end_operation(clcb_idx, GattStatus::Success, Some(value));
            }
            Operation::Discovery(DiscoveryKind::IncludedServices) if pending => {
                self.finish_included_service_read(clcb_idx, payload)
            }
            _ => {}
        }
    }

    /// One blob of a long read: append and decide whether to keep reading.
    fn process_long_read_chunk(&mut self, tcb_idx: u8, clcb_idx: usize, payload: &[u8]) {
        let payload_size = self
            .tcb(tcb_idx)
            .map(|t| t.payload_size)
            .unwrap_or(ATT_DEFAULT_MTU);

        let step = {
            let Some(clcb) = self.clcbs[clcb_idx].as_mut() else {
                return;
            };
            let offset = clcb.counter as usize;
            if offset >= ATT_MAX_ATTR_LEN {
                error!("long read past the maximum attribute length, offset={}", offset);
                None
            } else {
                let len = payload.len().min(ATT_MAX_ATTR_LEN - offset);
                let buf = clcb
                    .attr_buf
                    .get_or_insert_with(|| Vec::with_capacity(ATT_MAX_ATTR_LEN));
                buf.extend_from_slice(&payload[..len]);
                clcb.counter += len as u16;

                // A chunk the size of either the current MTU or the MTU at
                // the time the read started means the value may continue.
                let rsp_len = payload.len() as u16;
                let packet_is_full = if payload_size == clcb.read_req_current_mtu {
                    rsp_len == payload_size - 1
                } else {
                    let full = rsp_len == clcb.read_req_current_mtu - 1
                        || rsp_len == payload_size - 1;
                    clcb.read_req_current_mtu = payload_size;
                    full
                };
                Some((packet_is_full, clcb.counter))
            }
        };

        match step {
            None => {
                let value = self.take_accumulated_value(clcb_idx);
                self.end_operation(clcb_idx, GattStatus::NoResources, value);
            }
            Some((true, counter)) if (counter as usize) < ATT_MAX_ATTR_LEN => {
                trace!("full packet, read blob continues at offset {}", counter);
                self.act_read(clcb_idx, counter);
            }
            Some(_) => {
                let value = self.take_accumulated_value(clcb_idx);
                self.end_operation(clcb_idx, GattStatus::Success, value);
            }
        }
    }

    fn take_accumulated_value(&mut self, clcb_idx: usize) -> Option<AttributeValue> {
        self.clcbs[clcb_idx].as_mut().map(|clcb| AttributeValue {
            handle: clcb.s_handle,
            offset: 0,
            value: clcb.attr_buf.take().unwrap_or_default(),
        })
    }

    /// The Read Response carrying a 128-bit included-service UUID.
    fn finish_included_service_read(&mut self, clcb_idx: usize, payload: &[u8]) {
        let Some((conn_id, pending)) = self.clcbs[clcb_idx].as_mut().and_then(|clcb| {
            let pending = clcb.pending_incl_read.take()?;
            clcb.s_handle = pending.next_start;
            Some((clcb.conn_id, pending))
        }) else {
            return;
        };

        if payload.len() != 16 {
            self.end_operation(clcb_idx, GattStatus::InvalidPdu, None);
            return;
        }

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(payload);
        let (_, app_id) = split_connection_id(conn_id);
        if let Some(cb) = self.registry.discovery_cb(app_id) {
            let result = DiscoveryResult {
                handle: pending.handle,
                value: DiscoveryValue::IncludedService {
                    start_handle: pending.incl_start,
                    end_handle: pending.incl_end,
                    uuid: Uuid::Uuid128(uuid_bytes),
                },
            };
            (&mut *cb.lock().unwrap())(conn_id, DiscoveryKind::IncludedServices, &result);
        }
        self.act_discovery(clcb_idx);
    }

    fn process_write_rsp(&mut self, clcb_idx: usize) {
        let is_write = matches!(
            self.clcbs[clcb_idx].as_ref().map(|c| c.operation),
            Some(Operation::Write(_))
        );
        if is_write {
            self.end_operation(clcb_idx, GattStatus::Success, None);
        }
    }

    /// Verify the echoed chunk of a prepared write and drive the next step.
    fn process_prep_write_rsp(&mut self, clcb_idx: usize, pdu: &[u8]) {
        let Ok(rsp) = PrepareWriteResponse::parse(pdu) else {
            error!("illegal prepare write response length, discard");
            self.abort_prepared_write(clcb_idx, GattStatus::InvalidPdu);
            return;
        };

        enum Verdict {
            Mismatch,
            Continue,
            Done(WriteKind),
        }

        let verdict = {
            let Some(clcb) = self.clcbs[clcb_idx].as_mut() else {
                return;
            };
            let Operation::Write(kind) = clcb.operation else {
                return;
            };
            let counter = clcb.counter as usize;
            match clcb.write_value.as_mut() {
                None => Verdict::Mismatch,
                Some(attr) => {
                    let offset = attr.offset as usize;
                    let expected = &attr.value[offset..offset + counter];
                    if rsp.handle != attr.handle
                        || rsp.value.len() != counter
                        || rsp.value.as_slice() != expected
                    {
                        Verdict::Mismatch
                    } else {
                        clcb.status = GattStatus::Success;
                        attr.offset += rsp.value.len() as u16;
                        if attr.offset as usize >= attr.value.len() {
                            Verdict::Done(kind)
                        } else {
                            Verdict::Continue
                        }
                    }
                }
            }
        };

        match verdict {
            Verdict::Mismatch => {
                // the server did not echo what was sent
                self.abort_prepared_write(clcb_idx, GattStatus::Error);
            }
            Verdict::Continue => self.send_prepare_write(clcb_idx),
            Verdict::Done(WriteKind::Prepare) => {
                // the application verifies the echoed chunk itself
                let value = AttributeValue {
                    handle: rsp.handle,
                    offset: rsp.offset,
                    value: rsp.value,
                };
                self.end_operation(clcb_idx, GattStatus::Success, Some(value));
            }
            Verdict::Done(_) => {
                let tcb_idx = match self.clcbs[clcb_idx].as_ref() {
                    Some(clcb) => clcb.tcb_idx,
                    None => return,
                };
                self.send_execute_write(tcb_idx, Some(clcb_idx), true);
            }
        }
    }

    fn process_exec_write_rsp(&mut self, clcb_idx: usize) {
        let status = self.clcbs[clcb_idx]
            .as_ref()
            .map(|c| c.status)
            .unwrap_or(GattStatus::Success);
        self.end_operation(clcb_idx, status, None);
    }

    // ----- notification path -----

    /// Handle value notifications and indications, fanning out to every
    /// registered application.
    fn process_notification(&mut self, tcb_idx: u8, op_code: u8, payload: &[u8]) {
        if payload.len() < ATT_NOTIFICATION_MIN_LEN {
            error!("illegal notification PDU length, discard");
            return;
        }
        let handle = u16::from_le_bytes([payload[0], payload[1]]);
        let value = &payload[2..];
        if value.len() > ATT_MAX_ATTR_LEN {
            error!("notification value longer than the maximum attribute length, discard");
            return;
        }

        let is_indication = op_code == ATT_HANDLE_VALUE_IND;
        if !att_handle_is_valid(handle) {
            // illegal handle; ack right away so the peer is not blocked
            if is_indication {
                self.send_confirmation(tcb_idx);
            }
            return;
        }

        let subscribers = self.registry.completion_subscribers();

        if is_indication {
            let confirm_now = {
                let Some(tcb) = self.tcb_mut(tcb_idx) else {
                    return;
                };
                if tcb.ind_count != 0 {
                    // the peer may not pipeline indications
                    error!(
                        "indication received with {} still unconfirmed, resetting",
                        tcb.ind_count
                    );
                }
                tcb.ind_count = subscribers.len() as u16;
                if tcb.ind_count > 0 {
                    tcb.ind_ack_deadline = Some(Instant::now() + ATT_IND_ACK_TIMEOUT);
                    false
                } else {
                    true
                }
            };
            if confirm_now {
                // nobody to wait for
                self.send_confirmation(tcb_idx);
            }
        }

        let encrypt_status = self
            .tcb(tcb_idx)
            .map(|t| t.link_encryption.as_status())
            .unwrap_or(GattStatus::NotEncrypted);
        let event = if is_indication {
            super::types::ClientOp::Indication
        } else {
            super::types::ClientOp::Notification
        };
        let att_value = AttributeValue {
            handle,
            offset: 0,
            value: value.to_vec(),
        };
        for (app_id, cb) in subscribers {
            let conn_id = connection_id(tcb_idx, app_id);
            (&mut *cb.lock().unwrap())(conn_id, event, encrypt_status, CompletionData::Value(&att_value));
        }
    }
}

//! ATT PDU codec for the client role.
//!
//! Every request the client can issue and every server PDU it can receive is
//! a struct implementing [`AttPacket`]. `serialize` produces the full PDU
//! including the opcode byte; `parse` validates the opcode and the minimum
//! length before touching any field, so adversarial input from the peer
//! cannot cause an overrun.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// ATT packet format
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;

    /// Parse packet from bytes
    fn parse(data: &[u8]) -> AttResult<Self>;

    /// Serialize packet to bytes
    fn serialize(&self) -> Vec<u8>;
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| AttError::InvalidPdu)
}

/// Error Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode of the request in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    /// Error code
    pub error_code: AttErrorCode,
}

impl AttPacket for ErrorResponse {
    fn opcode() -> u8 {
        ATT_ERROR_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_ERROR_RSP_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let request_opcode = data[1];
        let mut cursor = Cursor::new(&data[2..]);
        let handle = read_u16(&mut cursor)?;
        let error_code = data[4].into();

        Ok(Self {
            request_opcode,
            handle,
            error_code,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

/// Exchange MTU Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

impl AttPacket for ExchangeMtuRequest {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let client_mtu = read_u16(&mut cursor)?;
        Ok(Self { client_mtu })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.client_mtu.to_le_bytes());
        packet
    }
}

/// Exchange MTU Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuResponse {
    /// Server Rx MTU size
    pub server_mtu: u16,
}

impl AttPacket for ExchangeMtuResponse {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_MTU_RSP_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let server_mtu = read_u16(&mut cursor)?;
        Ok(Self { server_mtu })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());
        packet
    }
}

/// Find Information Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
}

impl AttPacket for FindInformationRequest {
    fn opcode() -> u8 {
        ATT_FIND_INFO_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        Ok(Self {
            start_handle,
            end_handle,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet
    }
}

/// Find Information Response packet
#[derive(Debug, Clone)]
pub struct FindInformationResponse {
    /// Format of the information data
    pub format: u8,
    /// Handle and attribute type of each reported descriptor
    pub pairs: Vec<(u16, Uuid)>,
}

impl AttPacket for FindInformationResponse {
    fn opcode() -> u8 {
        ATT_FIND_INFO_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_INFO_RSP_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let format = data[1];
        let uuid_len = match format {
            ATT_FIND_INFO_RSP_FORMAT_16BIT => 2,
            ATT_FIND_INFO_RSP_FORMAT_128BIT => 16,
            _ => return Err(AttError::InvalidPdu),
        };

        let mut pairs = Vec::new();
        let body = &data[2..];
        let pair_size = 2 + uuid_len;
        let mut pos = 0;
        while pos + pair_size <= body.len() {
            let handle = u16::from_le_bytes([body[pos], body[pos + 1]]);
            let uuid =
                Uuid::from_bytes(&body[pos + 2..pos + pair_size]).ok_or(AttError::InvalidPdu)?;
            pairs.push((handle, uuid));
            pos += pair_size;
        }

        Ok(Self { format, pairs })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::opcode());
        packet.push(self.format);
        for (handle, uuid) in &self.pairs {
            packet.extend_from_slice(&handle.to_le_bytes());
            match self.format {
                ATT_FIND_INFO_RSP_FORMAT_16BIT => {
                    packet.extend_from_slice(&uuid.as_u16().unwrap_or(0).to_le_bytes())
                }
                _ => packet.extend_from_slice(&uuid.to_128_le()),
            }
        }
        packet
    }
}

/// Find By Type Value Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByTypeValueRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
    /// Attribute type (always a 16-bit UUID on the wire)
    pub attribute_type: u16,
    /// Attribute value to match
    pub attribute_value: Vec<u8>,
}

impl AttPacket for FindByTypeValueRequest {
    fn opcode() -> u8 {
        ATT_FIND_BY_TYPE_VALUE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 7 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let attribute_type = read_u16(&mut cursor)?;
        let attribute_value = data[7..].to_vec();

        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
            attribute_value,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(7 + self.attribute_value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_le_bytes());
        packet.extend_from_slice(&self.attribute_value);
        packet
    }
}

/// Handle range in a Find By Type Value Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    /// Found attribute handle
    pub found_handle: u16,
    /// Group end handle
    pub group_end_handle: u16,
}

/// Find By Type Value Response packet
#[derive(Debug, Clone)]
pub struct FindByTypeValueResponse {
    /// List of handle ranges
    pub handles: Vec<HandleRange>,
}

impl AttPacket for FindByTypeValueResponse {
    fn opcode() -> u8 {
        ATT_FIND_BY_TYPE_VALUE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut handles = Vec::new();
        let mut offset = 1;
        while offset + 4 <= data.len() {
            let mut cursor = Cursor::new(&data[offset..]);
            let found_handle = read_u16(&mut cursor)?;
            let group_end_handle = read_u16(&mut cursor)?;
            handles.push(HandleRange {
                found_handle,
                group_end_handle,
            });
            offset += 4;
        }

        Ok(Self { handles })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.handles.len() * 4);
        packet.push(Self::opcode());
        for range in &self.handles {
            packet.extend_from_slice(&range.found_handle.to_le_bytes());
            packet.extend_from_slice(&range.group_end_handle.to_le_bytes());
        }
        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone, PartialEq)]
pub struct ReadByTypeRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
    /// Attribute type UUID
    pub attribute_type: Uuid,
}

impl AttPacket for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 7 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let attribute_type = match data.len() {
            7 | 21 => Uuid::from_bytes(&data[5..]).ok_or(AttError::InvalidPdu)?,
            _ => return Err(AttError::InvalidPdu),
        };

        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_wire_type());
        packet
    }
}

/// Handle and value pair in a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    /// Attribute handle
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByTypeResponse {
    /// Length of each handle-value record
    pub length: u8,
    /// List of handle-value records
    pub data: Vec<HandleValue>,
}

impl AttPacket for ReadByTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_READ_BY_TYPE_RSP_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length < 2 {
            return Err(AttError::InvalidPdu);
        }

        let mut records = Vec::new();
        let mut offset = 2;
        while offset + length as usize <= data.len() {
            let handle = u16::from_le_bytes([data[offset], data[offset + 1]]);
            let value = data[offset + 2..offset + length as usize].to_vec();
            records.push(HandleValue { handle, value });
            offset += length as usize;
        }

        Ok(Self {
            length,
            data: records,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::opcode());
        packet.push(self.length);
        for record in &self.data {
            packet.extend_from_slice(&record.handle.to_le_bytes());
            packet.extend_from_slice(&record.value);
        }
        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Handle to read
    pub handle: u16,
}

impl AttPacket for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self { handle })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet
    }
}

/// Read Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for ReadResponse {
    fn opcode() -> u8 {
        ATT_READ_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            value: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Blob Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobRequest {
    /// Handle to read
    pub handle: u16,
    /// Offset to start reading from
    pub offset: u16,
}

impl AttPacket for ReadBlobRequest {
    fn opcode() -> u8 {
        ATT_READ_BLOB_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        let offset = read_u16(&mut cursor)?;
        Ok(Self { handle, offset })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet
    }
}

/// Read Blob Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobResponse {
    /// Part of the attribute value
    pub value: Vec<u8>,
}

impl AttPacket for ReadBlobResponse {
    fn opcode() -> u8 {
        ATT_READ_BLOB_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            value: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Multiple Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMultipleRequest {
    /// Set of handles to read
    pub handles: Vec<u16>,
}

impl AttPacket for ReadMultipleRequest {
    fn opcode() -> u8 {
        ATT_READ_MULTIPLE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() || (data.len() - 1) % 2 != 0 {
            return Err(AttError::InvalidPdu);
        }

        let mut handles = Vec::new();
        let mut offset = 1;
        while offset + 2 <= data.len() {
            handles.push(u16::from_le_bytes([data[offset], data[offset + 1]]));
            offset += 2;
        }

        Ok(Self { handles })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.handles.len() * 2);
        packet.push(Self::opcode());
        for handle in &self.handles {
            packet.extend_from_slice(&handle.to_le_bytes());
        }
        packet
    }
}

/// Read Multiple Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMultipleResponse {
    /// Concatenated set of values
    pub values: Vec<u8>,
}

impl AttPacket for ReadMultipleResponse {
    fn opcode() -> u8 {
        ATT_READ_MULTIPLE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            values: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.values.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.values);
        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone, PartialEq)]
pub struct ReadByGroupTypeRequest {
    /// First requested handle
    pub start_handle: u16,
    /// Last requested handle
    pub end_handle: u16,
    /// Group type UUID
    pub group_type: Uuid,
}

impl AttPacket for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 7 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let group_type = match data.len() {
            7 | 21 => Uuid::from_bytes(&data[5..]).ok_or(AttError::InvalidPdu)?,
            _ => return Err(AttError::InvalidPdu),
        };

        Ok(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.group_type.to_wire_type());
        packet
    }
}

/// Group record in a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    /// Attribute handle of the group declaration
    pub handle: u16,
    /// Last handle within the group
    pub end_group_handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeResponse {
    /// Length of each record
    pub length: u8,
    /// List of group records
    pub data: Vec<GroupData>,
}

impl AttPacket for ReadByGroupTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length < 6 {
            return Err(AttError::InvalidPdu);
        }

        let mut records = Vec::new();
        let mut offset = 2;
        while offset + length as usize <= data.len() {
            let handle = u16::from_le_bytes([data[offset], data[offset + 1]]);
            let end_group_handle = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
            let value = data[offset + 4..offset + length as usize].to_vec();
            records.push(GroupData {
                handle,
                end_group_handle,
                value,
            });
            offset += length as usize;
        }

        Ok(Self {
            length,
            data: records,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::opcode());
        packet.push(self.length);
        for record in &self.data {
            packet.extend_from_slice(&record.handle.to_le_bytes());
            packet.extend_from_slice(&record.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&record.value);
        }
        packet
    }
}

/// Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Handle to write
    pub handle: u16,
    /// Value to write
    pub value: Vec<u8>,
}

impl AttPacket for WriteRequest {
    fn opcode() -> u8 {
        ATT_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse;

impl AttPacket for WriteResponse {
    fn opcode() -> u8 {
        ATT_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Write Command packet (no response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    /// Handle to write
    pub handle: u16,
    /// Value to write
    pub value: Vec<u8>,
}

impl AttPacket for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Signed Write Command packet (no response).
///
/// The 12-byte authentication signature is appended by the security layer
/// once it has signed the PDU; the codec emits only the unsigned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWriteCommand {
    /// Handle to write
    pub handle: u16,
    /// Value to write
    pub value: Vec<u8>,
}

impl AttPacket for SignedWriteCommand {
    fn opcode() -> u8 {
        ATT_SIGNED_WRITE_CMD
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Prepare Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteRequest {
    /// Handle to write
    pub handle: u16,
    /// Offset to write at
    pub offset: u16,
    /// Part of the value to write
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteRequest {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        let offset = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            offset,
            value: data[5..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Prepare Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteResponse {
    /// Handle being written
    pub handle: u16,
    /// Offset being written
    pub offset: u16,
    /// Echoed part of the value
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteResponse {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_PREPARE_WRITE_RSP_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        let offset = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            offset,
            value: data[5..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Execute Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteWriteRequest {
    /// Flags: 0x00 cancel, 0x01 commit
    pub flags: u8,
}

impl AttPacket for ExecuteWriteRequest {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }
        Ok(Self { flags: data[1] })
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode(), self.flags]
    }
}

/// Execute Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteWriteResponse;

impl AttPacket for ExecuteWriteResponse {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Handle Value Notification packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueNotification {
    /// Handle of the attribute
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueNotification {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_NTF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_NOTIFICATION_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Indication packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueIndication {
    /// Handle of the attribute
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueIndication {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_IND
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 1 + ATT_NOTIFICATION_MIN_LEN || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Confirmation packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl AttPacket for HandleValueConfirmation {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_CONF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

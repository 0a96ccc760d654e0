//! Common types for GATT client operations.

use crate::att::constants::*;
use crate::att::error::AttErrorCode;
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

/// Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Completion status of a GATT client operation.
///
/// The first group mirrors the ATT error codes a peer can return; the second
/// group is produced inside the stack and never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    // ATT protocol reasons
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    NotFound,
    NotLong,
    InsufficientKeySize,
    InvalidAttributeLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    DatabaseOutOfSync,
    ValueNotAllowed,
    ApplicationError(u8),
    Unknown(u8),
    // stack-internal statuses
    NoResources,
    InternalError,
    Error,
    Timeout,
    Congested,
    NotEncrypted,
    EncryptedNoMitm,
    EncryptedMitm,
}

impl From<u8> for GattStatus {
    fn from(reason: u8) -> Self {
        match reason {
            0x00 => GattStatus::Success,
            ATT_ERROR_INVALID_HANDLE => GattStatus::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => GattStatus::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => GattStatus::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => GattStatus::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => GattStatus::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => GattStatus::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => GattStatus::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => GattStatus::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => GattStatus::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => GattStatus::NotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => GattStatus::NotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => GattStatus::InsufficientKeySize,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => GattStatus::InvalidAttributeLength,
            ATT_ERROR_UNLIKELY => GattStatus::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => GattStatus::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => GattStatus::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => GattStatus::InsufficientResources,
            ATT_ERROR_DATABASE_OUT_OF_SYNC => GattStatus::DatabaseOutOfSync,
            ATT_ERROR_VALUE_NOT_ALLOWED => GattStatus::ValueNotAllowed,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                GattStatus::ApplicationError(c)
            }
            c => GattStatus::Unknown(c),
        }
    }
}

impl From<AttErrorCode> for GattStatus {
    fn from(code: AttErrorCode) -> Self {
        GattStatus::from(u8::from(code))
    }
}

/// Operation family reported to the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOp {
    Discovery,
    Read,
    Write,
    Config,
    Notification,
    Indication,
}

/// Kind of discovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    /// All primary services
    ServicesAll,
    /// Primary services matching a given UUID
    ServiceByUuid,
    /// Included services within a service range
    IncludedServices,
    /// Characteristic declarations within a service range
    Characteristics,
    /// Characteristic descriptors
    Descriptors,
}

/// Kind of read procedure, as carried on the CLCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadKind {
    /// Discover-and-read a characteristic value by UUID
    CharByUuid,
    /// Read by a caller-supplied attribute type
    ByType,
    /// Read (and reassemble) a value by handle
    ByHandle,
    /// Single Read Blob at a caller-supplied offset, no reassembly
    Partial,
    /// Read Multiple
    Multiple,
}

/// Kind of write procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Write Command, completing as soon as the bearer takes the PDU.
    NoResponse {
        /// Use the Signed Write Command opcode.
        signed: bool,
    },
    /// Write Request, transparently switching to the prepare/execute path
    /// for values that do not fit one PDU.
    Normal,
    /// Reliable write: prepare only, echo returned to the caller.
    Prepare,
}

/// Parameters of a read submission.
#[derive(Debug, Clone)]
pub enum ReadParam {
    /// Read the attribute with the given handle, reassembling long values.
    ByHandle { handle: u16 },
    /// Find a characteristic by UUID inside a handle range and read its
    /// value.
    CharByUuid {
        start_handle: u16,
        end_handle: u16,
        uuid: Uuid,
    },
    /// Read by a caller-supplied attribute type.
    ByType {
        start_handle: u16,
        end_handle: u16,
        uuid: Uuid,
    },
    /// Read a single slice of a value at an offset.
    Partial { handle: u16, offset: u16 },
    /// Read several attributes in one request.
    Multiple { handles: Vec<u16> },
}

/// An attribute value travelling through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeValue {
    /// Attribute handle
    pub handle: u16,
    /// Value offset (used by prepared writes)
    pub offset: u16,
    /// Value bytes
    pub value: Vec<u8>,
}

/// Payload of a completion callback.
#[derive(Debug, Clone, Copy)]
pub enum CompletionData<'a> {
    /// Nothing beyond the status.
    None,
    /// An attribute value: read results, notification payloads, prepared
    /// write echoes.
    Value(&'a AttributeValue),
    /// The negotiated MTU after a configure-MTU exchange.
    Mtu(u16),
}

/// One record produced by a discovery procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    /// Handle of the declaration attribute
    pub handle: u16,
    /// What was discovered
    pub value: DiscoveryValue,
}

/// Decoded payload of a discovery record.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryValue {
    /// A primary service group
    Service { end_handle: u16, uuid: Uuid },
    /// An included service reference
    IncludedService {
        start_handle: u16,
        end_handle: u16,
        uuid: Uuid,
    },
    /// A characteristic declaration
    Characteristic {
        properties: CharacteristicProperties,
        value_handle: u16,
        uuid: Uuid,
    },
    /// A characteristic descriptor
    Descriptor { uuid: Uuid },
}

bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification.
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// Encryption state of the link, as reported by the security layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEncryption {
    /// Link is not encrypted
    None,
    /// Encrypted with an unauthenticated key
    Unauthenticated,
    /// Encrypted with an authenticated (MITM-protected) key
    Authenticated,
}

impl LinkEncryption {
    /// The status value handed to notification and indication callbacks.
    pub fn as_status(self) -> GattStatus {
        match self {
            LinkEncryption::None => GattStatus::NotEncrypted,
            LinkEncryption::Unauthenticated => GattStatus::EncryptedNoMitm,
            LinkEncryption::Authenticated => GattStatus::EncryptedMitm,
        }
    }
}

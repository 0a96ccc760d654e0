//! Bluetooth UUID handling.
//!
//! Attribute types and service identifiers on the wire come in 16-bit,
//! 32-bit, and 128-bit forms. The short forms are shorthand for a full
//! 128-bit UUID built on the Bluetooth base UUID, so two values are the same
//! UUID whenever their 128-bit expansions match, regardless of which form
//! they were parsed from.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The base UUID used for constructing 128-bit UUIDs from 16-bit and 32-bit
/// values: "00000000-0000-1000-8000-00805F9B34FB" (little-endian bytes).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value sits.
const BASE_OFFSET: usize = 12;

/// UUID for GATT attributes.
#[derive(Clone, Copy, Eq)]
pub enum Uuid {
    /// 16-bit SIG-assigned UUID
    Uuid16(u16),
    /// 32-bit SIG-assigned UUID
    Uuid32(u32),
    /// Full 128-bit UUID, little-endian bytes
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Create a UUID from a 16-bit value.
    pub const fn from_u16(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }

    /// Create a UUID from a 32-bit value.
    pub const fn from_u32(uuid: u32) -> Self {
        Uuid::Uuid32(uuid)
    }

    /// Create a UUID from a 128-bit value.
    pub const fn from_u128(uuid: u128) -> Self {
        Uuid::Uuid128(uuid.to_le_bytes())
    }

    /// Convert raw little-endian bytes to a UUID based on length.
    ///
    /// Accepts slices of length 2, 4, or 16; anything else is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            4 => Some(Uuid::Uuid32(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Some(Uuid::Uuid128(uuid))
            }
            _ => None,
        }
    }

    /// The canonical 128-bit little-endian expansion of this UUID.
    pub fn to_128_le(&self) -> [u8; 16] {
        match self {
            Uuid::Uuid16(uuid) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET] = *uuid as u8;
                bytes[BASE_OFFSET + 1] = (*uuid >> 8) as u8;
                bytes
            }
            Uuid::Uuid32(uuid) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET..BASE_OFFSET + 4].copy_from_slice(&uuid.to_le_bytes());
                bytes
            }
            Uuid::Uuid128(bytes) => *bytes,
        }
    }

    fn is_base_derived(bytes: &[u8; 16]) -> bool {
        bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// The 16-bit value of this UUID, if it has one after canonicalization.
    pub fn as_u16(&self) -> Option<u16> {
        let bytes = self.to_128_le();
        if Self::is_base_derived(&bytes)
            && bytes[BASE_OFFSET + 2] == 0
            && bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                bytes[BASE_OFFSET],
                bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// The 32-bit value of this UUID, if it has one after canonicalization.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes = self.to_128_le();
        if Self::is_base_derived(&bytes) {
            Some(u32::from_le_bytes([
                bytes[BASE_OFFSET],
                bytes[BASE_OFFSET + 1],
                bytes[BASE_OFFSET + 2],
                bytes[BASE_OFFSET + 3],
            ]))
        } else {
            None
        }
    }

    /// Length in bytes of the shortest wire representation: 2, 4, or 16.
    pub fn shortest_len(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else if self.as_u32().is_some() {
            4
        } else {
            16
        }
    }

    /// Wire encoding used as an attribute-type operand: 2 bytes for a 16-bit
    /// UUID, the full 128-bit little-endian form otherwise. The protocol has
    /// no 4-byte attribute-type encoding.
    pub fn to_wire_type(&self) -> Vec<u8> {
        match self.as_u16() {
            Some(uuid16) => uuid16.to_le_bytes().to_vec(),
            None => self.to_128_le().to_vec(),
        }
    }

    /// Wire encoding used as a Find By Type Value match operand. A 32-bit
    /// UUID is promoted to its 128-bit expansion here.
    pub fn to_find_value(&self) -> Vec<u8> {
        self.to_wire_type()
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.to_128_le() == other.to_128_le()
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_128_le().hash(state);
    }
}

impl From<u16> for Uuid {
    fn from(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }
}

impl From<u32> for Uuid {
    fn from(uuid: u32) -> Self {
        Uuid::Uuid32(uuid)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in little-endian order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            Uuid::Uuid32(uuid) => write!(f, "{:08x}", uuid),
            Uuid::Uuid128(uuid) => {
                // Standard hyphenated big-endian presentation.
                write!(
                    f,
                    "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    uuid[15], uuid[14], uuid[13], uuid[12],
                    uuid[11], uuid[10],
                    uuid[9], uuid[8],
                    uuid[7], uuid[6],
                    uuid[5], uuid[4], uuid[3], uuid[2], uuid[1], uuid[0]
                )
            }
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(uuid16) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", uuid16)
        } else if let Some(uuid32) = self.as_u32() {
            write!(f, "Uuid(0x{:08X})", uuid32)
        } else {
            write!(f, "Uuid({})", self)
        }
    }
}

/// Error produced when parsing a UUID from text.
#[derive(Debug)]
pub enum UuidParseError {
    InvalidLength,
    InvalidFormat,
    HexError(hex::FromHexError),
}

impl From<hex::FromHexError> for UuidParseError {
    fn from(err: hex::FromHexError) -> Self {
        UuidParseError::HexError(err)
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if cleaned.len() != s.chars().filter(|c| *c != '-').count() {
            return Err(UuidParseError::InvalidFormat);
        }

        match cleaned.len() {
            4 => {
                // 16-bit short form e.g. "180A"
                let val = u16::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::from_u16(val))
            }
            8 => {
                // 32-bit short form e.g. "0000180A"
                let val = u32::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::from_u32(val))
            }
            32 => {
                // Full 128-bit form, big-endian text
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                bytes.reverse();
                Ok(Uuid::Uuid128(bytes))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_across_forms() {
        assert_eq!(Uuid::from_u16(0x180A), Uuid::from_u32(0x0000180A));
        assert_eq!(
            Uuid::from_u16(0x2800),
            Uuid::Uuid128(Uuid::from_u16(0x2800).to_128_le())
        );
        assert_ne!(Uuid::from_u16(0x2800), Uuid::from_u32(0x0001_2800));
    }

    #[test]
    fn shortest_len() {
        assert_eq!(Uuid::from_u16(0x2902).shortest_len(), 2);
        assert_eq!(Uuid::from_u32(0x0001_0000).shortest_len(), 4);
        assert_eq!(Uuid::Uuid128([0xAB; 16]).shortest_len(), 16);
        // A 128-bit value that collapses onto the base UUID is short again.
        assert_eq!(
            Uuid::Uuid128(Uuid::from_u16(0x1800).to_128_le()).shortest_len(),
            2
        );
    }

    #[test]
    fn wire_type_encoding() {
        assert_eq!(Uuid::from_u16(0x2803).to_wire_type(), vec![0x03, 0x28]);
        assert_eq!(Uuid::Uuid128([0x11; 16]).to_wire_type().len(), 16);
        // 32-bit operands always go out in 128-bit form.
        assert_eq!(Uuid::from_u32(0x0001_0000).to_find_value().len(), 16);
    }

    #[test]
    fn from_bytes_lengths() {
        assert_eq!(Uuid::from_bytes(&[0x0A, 0x18]), Some(Uuid::from_u16(0x180A)));
        assert!(Uuid::from_bytes(&[1, 2, 3]).is_none());
        assert!(Uuid::from_bytes(&[0u8; 16]).is_some());
    }

    #[test]
    fn parse_from_str() {
        assert_eq!("180a".parse::<Uuid>().unwrap(), Uuid::from_u16(0x180A));
        assert_eq!(
            "0000180a-0000-1000-8000-00805f9b34fb"
                .parse::<Uuid>()
                .unwrap(),
            Uuid::from_u16(0x180A)
        );
        assert!("xyz".parse::<Uuid>().is_err());
    }
}

//! Scale address type.
//!
//! Scales are keyed by their Bluetooth device address. The type is kept
//! independent of any Bluetooth library so the core can be driven from tests
//! and from either scanner backend.

use std::fmt;

/// A Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_upper_hex() {
        let addr = MacAddress([0x0a, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f]);
        assert_eq!(addr.to_string(), "0A:1B:2C:3D:4E:5F");
    }

    #[test]
    fn test_from_le_bytes_reverses() {
        let addr = MacAddress::from_le_bytes([0x22, 0x11, 0x00, 0x8C, 0x47, 0xC8]);
        assert_eq!(addr.to_string(), "C8:47:8C:00:11:22");
    }
}

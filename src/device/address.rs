use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AddressParseError;

/// The 48-bit hardware address of a remote device, most significant byte first.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceAddress(pub [u8; 6]);

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        DeviceAddress(bytes)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| AddressParseError::new(s))?;
            if part.len() != 2 {
                return Err(AddressParseError::new(s));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError::new(s))?;
        }

        if parts.next().is_some() {
            return Err(AddressParseError::new(s));
        }

        Ok(DeviceAddress(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_is_upper_case_with_colons() {
        let address = DeviceAddress([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x0b]);

        assert_eq!(address.to_string(), "00:1A:7D:DA:71:0B");
    }

    #[test]
    fn test_parse_accepts_either_case() {
        let upper: DeviceAddress = "00:1A:7D:DA:71:0B".parse().unwrap();
        let lower: DeviceAddress = "00:1a:7d:da:71:0b".parse().unwrap();

        assert_eq!(upper, lower);
        assert_eq!(upper.0, [0x00, 0x1a, 0x7d, 0xda, 0x71, 0x0b]);
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        for input in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "0:11:22:33:44:55", "GG:11:22:33:44:55"] {
            assert!(input.parse::<DeviceAddress>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_serde_uses_the_string_form() {
        let address = DeviceAddress([1, 2, 3, 4, 5, 6]);

        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        assert_eq!(serde_json::from_str::<DeviceAddress>(&json).unwrap(), address);
    }
}

//! Connection bookkeeping types.

use std::fmt;
use std::str::FromStr;

/// 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BluetoothAddress([u8; 6]);

/// Returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

impl BluetoothAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Packs the address into the low 48 bits, most significant octet first.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    pub fn from_u64(raw: u64) -> Self {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = (raw >> (8 * (5 - i))) as u8;
        }
        Self(octets)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl FromStr for BluetoothAddress {
    type Err = AddressParseError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`, any case.
    /// The all-zero address is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        let trimmed = s.trim();
        let separator = if trimmed.contains('-') { '-' } else { ':' };

        let mut octets = [0u8; 6];
        let mut parts = trimmed.split(separator);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 {
                return Err(err());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }

        let address = Self(octets);
        if address.is_null() {
            return Err(err());
        }
        Ok(address)
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// A device seen during discovery, keyed by `address`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    /// Canonical `AA:BB:CC:DD:EE:FF` form.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: i16,
    pub is_paired: bool,
    pub is_connected: bool,
}

/// Link state. Initial state is `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Scanning = 1,
    Connecting = 2,
    Connected = 3,
    Error = 4,
}

impl ConnectionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Unknown values map to `Error`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Disconnected,
            1 => Self::Scanning,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Scanning => "Scanning",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr: BluetoothAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");

        let dashed: BluetoothAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(dashed, addr);
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        for bad in [
            "",
            "not an address",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AAB:B:CC:DD:EE:FF",
            "GG:BB:CC:DD:EE:FF",
            "00:00:00:00:00:00",
        ] {
            assert!(bad.parse::<BluetoothAddress>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn test_u64_conversion() {
        let addr: BluetoothAddress = "24:0A:C4:12:34:56".parse().unwrap();
        assert_eq!(addr.as_u64(), 0x240A_C412_3456);
        assert_eq!(BluetoothAddress::from_u64(0x240A_C412_3456), addr);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Scanning.to_string(), "Scanning");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Error.to_string(), "Error");
    }

    #[test]
    fn test_state_u8_mapping() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Error);
    }
}

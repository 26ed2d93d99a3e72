// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Mac address type and logic.

use std::fmt::Display;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]` which provides a
/// small collection of methods and type safety.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Errors which can occur while converting a string to a [`Mac`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MacFromStringError {
    /// Invalid string representation of mac address
    #[error("invalid string representation of mac address: {0}")]
    Invalid(String),
}

impl TryFrom<&str> for Mac {
    type Error = MacFromStringError;

    /// Parse a MAC address from its textual form.
    ///
    /// Separators `:`, `-` and `.` are accepted and ignored; the remaining
    /// characters must be exactly twelve hex digits. This is the same
    /// normalization the vendor checker applies before OUI lookup.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut octets = [0u8; 6];
        let mut nibbles = 0usize;
        for c in value.chars() {
            if matches!(c, ':' | '-' | '.') {
                continue;
            }
            let digit = c
                .to_digit(16)
                .ok_or_else(|| MacFromStringError::Invalid(value.to_string()))?;
            if nibbles >= 12 {
                return Err(MacFromStringError::Invalid(value.to_string()));
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                octets[nibbles / 2] = (octets[nibbles / 2] << 4) | digit as u8;
            }
            nibbles += 1;
        }
        if nibbles != 12 {
            return Err(MacFromStringError::Invalid(value.to_string()));
        }
        Ok(Mac(octets))
    }
}

impl std::str::FromStr for Mac {
    type Err = MacFromStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mac::try_from(s)
    }
}

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`.
    ///
    /// `ZERO` is illegal as a source or destination `Mac` in most contexts.
    pub const ZERO: Mac = Mac([0; 6]);

    /// True iff this is the broadcast address.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Mac::BROADCAST
    }

    /// True iff the group bit (I/G) of the first octet is set.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// True iff the locally-administered (U/L) bit of the first octet is set.
    ///
    /// Spoofing tools commonly synthesize locally-administered addresses.
    #[must_use]
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// True iff every octet is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Mac::ZERO
    }

    /// The first three octets, identifying the assigning vendor.
    #[must_use]
    pub fn oui(&self) -> Oui {
        Oui([self.0[0], self.0[1], self.0[2]])
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// An Organizationally Unique Identifier: the vendor-assigned prefix of a
/// [`Mac`].
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Oui(pub [u8; 3]);

impl Display for Oui {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}:{:02X}:{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl TryFrom<&str> for Oui {
    type Error = MacFromStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut octets = [0u8; 3];
        let mut nibbles = 0usize;
        for c in value.chars() {
            if matches!(c, ':' | '-' | '.') {
                continue;
            }
            let digit = c
                .to_digit(16)
                .ok_or_else(|| MacFromStringError::Invalid(value.to_string()))?;
            if nibbles >= 6 {
                return Err(MacFromStringError::Invalid(value.to_string()));
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                octets[nibbles / 2] = (octets[nibbles / 2] << 4) | digit as u8;
            }
            nibbles += 1;
        }
        if nibbles != 6 {
            return Err(MacFromStringError::Invalid(value.to_string()));
        }
        Ok(Oui(octets))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_separators() {
        let canonical = Mac([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);
        assert_eq!(Mac::try_from("AA:BB:CC:11:22:33").unwrap(), canonical);
        assert_eq!(Mac::try_from("aa-bb-cc-11-22-33").unwrap(), canonical);
        assert_eq!(Mac::try_from("aabb.cc11.2233").unwrap(), canonical);
        assert_eq!(Mac::try_from("aabbcc112233").unwrap(), canonical);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Mac::try_from("").is_err());
        assert!(Mac::try_from("aa:bb:cc:11:22").is_err());
        assert!(Mac::try_from("aa:bb:cc:11:22:33:44").is_err());
        assert!(Mac::try_from("zz:bb:cc:11:22:33").is_err());
    }

    #[test]
    fn display_is_normalized_uppercase() {
        let mac = Mac::try_from("de:ad:be:ef:ca:fe").unwrap();
        assert_eq!(mac.to_string(), "DE:AD:BE:EF:CA:FE");
        assert_eq!(mac.oui().to_string(), "DE:AD:BE");
    }

    #[test]
    fn address_classes() {
        assert!(Mac::BROADCAST.is_broadcast());
        assert!(Mac::BROADCAST.is_multicast());
        assert!(Mac([0x01, 0x00, 0x5E, 0, 0, 1]).is_multicast());
        assert!(Mac([0x02, 0, 0, 0, 0, 1]).is_locally_administered());
        assert!(!Mac([0x00, 0x0C, 0x29, 0, 0, 1]).is_locally_administered());
        assert!(Mac::ZERO.is_zero());
    }
}

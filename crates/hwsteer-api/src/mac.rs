// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::str::FromStr;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use serde::Deserialize;
use serde::Serialize;

/// A MAC address, as matched by an Ethernet item or rewritten by a
/// modify-field action.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// The group bit: set for every multicast and broadcast address.
    pub const MULTICAST_BIT: Self = Self { inner: [0x01, 0, 0, 0, 0, 0] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    pub fn is_zero(&self) -> bool {
        self.inner == [0u8; 6]
    }

    /// The address as the low 48 bits of a `u64`.
    pub fn to_u64(&self) -> u64 {
        self.inner.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Apply `mask` to this address.
    pub fn masked(&self, mask: &MacAddr) -> MacAddr {
        let mut out = [0u8; 6];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.inner[i] & mask.inner[i];
        }
        MacAddr { inner: out }
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<&[u8; 6]> for MacAddr {
    fn from(bytes: &[u8; 6]) -> Self {
        Self { inner: *bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for MacAddr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<u8> = s
            .split(':')
            .map(|s| {
                u8::from_str_radix(s, 16).map_err(|_| format!("bad octet: {s}"))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        let bytes: [u8; 6] = octets.as_slice().try_into().map_err(|_| {
            format!("incorrect number of bytes: {}", octets.len())
        })?;

        Ok(MacAddr { inner: bytes })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr {{ inner: {self} }}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_mask_and_numeric_form() {
        let mac: MacAddr = "01:00:5e:00:00:fb".parse().unwrap();
        assert_eq!(mac.masked(&MacAddr::MULTICAST_BIT), MacAddr::MULTICAST_BIT);
        assert_eq!(mac.to_u64(), 0x0100_5e00_00fb);
        assert!("01:00:5e".parse::<MacAddr>().is_err());
        assert!("zz:00:5e:00:00:fb".parse::<MacAddr>().is_err());
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const ETH_ALEN: usize = 6;
pub const NUM_ACS: usize = 4;

/// 48-bit IEEE 802 address, written as `aa:bb:cc:dd:ee:ff` in config files and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ALEN]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; ETH_ALEN] = bytes.get(..ETH_ALEN)?.try_into().ok()?;
        Some(Self(octets))
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn octets(&self) -> &[u8; ETH_ALEN] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for MacAddr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; ETH_ALEN];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| CoreError::InvalidMacAddr(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| CoreError::InvalidMacAddr(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(CoreError::InvalidMacAddr(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(addr: MacAddr) -> Self {
        addr.to_string()
    }
}

/// WMM access category. The discriminant is the queue index inside a station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessCategory {
    Background = 0,
    BestEffort = 1,
    Video = 2,
    Voice = 3,
}

impl AccessCategory {
    pub const ALL: [AccessCategory; NUM_ACS] = [
        AccessCategory::Background,
        AccessCategory::BestEffort,
        AccessCategory::Video,
        AccessCategory::Voice,
    ];

    /// Contention window bounds `(cw_min, cw_max)` in slots.
    pub fn contention_window(self) -> (u16, u16) {
        match self {
            AccessCategory::Background => (15, 1023),
            AccessCategory::BestEffort => (15, 1023),
            AccessCategory::Video => (7, 15),
            AccessCategory::Voice => (3, 7),
        }
    }

    /// 802.1d user priority (QoS TID) to access category.
    pub fn from_tid(tid: u8) -> Self {
        match tid & 0x07 {
            1 | 2 => AccessCategory::Background,
            0 | 3 => AccessCategory::BestEffort,
            4 | 5 => AccessCategory::Video,
            _ => AccessCategory::Voice,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for AccessCategory {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        AccessCategory::ALL
            .get(value as usize)
            .copied()
            .ok_or(CoreError::InvalidAccessCategory(value))
    }
}

impl fmt::Display for AccessCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessCategory::Background => "BK",
            AccessCategory::BestEffort => "BE",
            AccessCategory::Video => "VI",
            AccessCategory::Voice => "VO",
        };
        f.write_str(name)
    }
}

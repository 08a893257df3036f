//! kernel relay, scheduling and channel layer for the wireless medium simulator

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod channel;
pub mod ingest;
pub mod kernel;
pub mod mobility;
pub mod netlink;
pub mod reactor;
pub mod scheduler;
pub mod simulated;
pub mod socket;

pub use channel::{ChannelModel, ChannelTables, LinkOutcome, PerModel, PerTable, SharedChannel};
pub use ingest::DeliveryRequest;
pub use kernel::{HwsimRelay, KernelLink};
pub use reactor::{ControlEvent, Medium, MediumHandle};
pub use scheduler::DeliveryScheduler;
pub use simulated::SimulatedKernel;
pub use socket::NetlinkLink;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic netlink family {0} not registered")]
    FamilyNotRegistered(String),

    #[error("Kernel replied with error {errno} to seq {seq}")]
    Kernel { errno: i32, seq: u32 },

    #[error("Malformed netlink message: {0}")]
    Malformed(&'static str),

    #[error("Missing attribute {0}")]
    MissingAttribute(u16),

    #[error("Side-channel record truncated: {0} bytes")]
    TruncatedRecord(usize),

    #[error("Invalid PER table at line {line}: {reason}")]
    InvalidPerTable { line: usize, reason: String },

    #[error(transparent)]
    Core(#[from] wmedium_core::CoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumConfig {
    pub detect_mediums: bool,
    pub dynamic: bool,
    pub move_interval: Duration,
    pub side_channel: bool,
    pub side_channel_port: u16,
    pub default_snr: i32,
    pub frequency: u32,
    pub noise_level: i32,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            detect_mediums: true,
            dynamic: false,
            move_interval: Duration::from_secs(3),
            side_channel: true,
            side_channel_port: ingest::SIDE_CHANNEL_PORT,
            default_snr: 15,
            frequency: 2412,
            noise_level: -91,
        }
    }
}

impl RadioError {
    /// Errors after which the kernel link is still usable: unparseable
    /// input, and socket conditions that clear on the next receive.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RadioError::Malformed(_) | RadioError::MissingAttribute(_) | RadioError::TruncatedRecord(_) => true,
            RadioError::Io(e) => {
                e.kind() == std::io::ErrorKind::Interrupted || e.raw_os_error() == Some(libc::ENOBUFS)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_recoverable_errors() {
        assert!(RadioError::Malformed("attribute length out of bounds").is_recoverable());
        assert!(RadioError::MissingAttribute(3).is_recoverable());
        assert!(RadioError::Io(io::Error::from_raw_os_error(libc::ENOBUFS)).is_recoverable());
        assert!(RadioError::Io(io::Error::from(io::ErrorKind::Interrupted)).is_recoverable());

        assert!(!RadioError::Io(io::Error::from_raw_os_error(libc::EBADF)).is_recoverable());
        assert!(!RadioError::FamilyNotRegistered("MAC80211_HWSIM".into()).is_recoverable());
        assert!(!RadioError::Kernel { errno: 19, seq: 1 }.is_recoverable());
    }
}

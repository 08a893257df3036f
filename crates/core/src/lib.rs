//! Core data model for the wireless medium simulator

use thiserror::Error;

pub mod airtime;
pub mod ieee80211;
pub mod medium;
pub mod station;
pub mod types;

pub use medium::MediumResolver;
pub use station::{Frame, Queue, Role, Station, StationId, Stations};
pub use types::{AccessCategory, MacAddr, ETH_ALEN, NUM_ACS};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid access category {0}")]
    InvalidAccessCategory(u8),

    #[error("Invalid MAC address: {0}")]
    InvalidMacAddr(String),

    #[error("Unknown station index {0}")]
    UnknownStation(usize),
}

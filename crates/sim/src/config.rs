//! Topology file loading

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use wmedium_core::{MacAddr, Role, StationId, Stations};
use wmedium_radio::channel::{ChannelTables, NodeState, Vec2};
use wmedium_radio::mobility;
use wmedium_radio::MediumConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate station address {0}")]
    DuplicateStation(MacAddr),

    #[error("SNR matrix must be {expected}x{expected}")]
    SnrDimension { expected: usize },

    #[error("Topology has no stations")]
    Empty,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MediumSection {
    detect_mediums: Option<bool>,
    move_interval_ms: Option<u64>,
    side_channel: Option<bool>,
    side_channel_port: Option<u16>,
    default_snr: Option<i32>,
    frequency: Option<u32>,
    noise_level: Option<i32>,
    path_loss_exponent: Option<f64>,
    shadowing_sigma: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StationEntry {
    addr: MacAddr,
    hwaddr: Option<MacAddr>,
    #[serde(default)]
    ap: bool,
    medium_id: Option<i32>,
    position: Option<[f64; 2]>,
    direction: Option<[f64; 2]>,
    tx_power: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TopologyFile {
    #[serde(default)]
    medium: MediumSection,
    #[serde(default)]
    stations: Vec<StationEntry>,
    snr: Option<Vec<Vec<i32>>>,
}

/// Everything the medium needs at startup.
pub struct Topology {
    pub config: MediumConfig,
    pub stations: Stations,
    pub tables: ChannelTables,
}

impl Topology {
    /// Starting point for dynamic mode: no stations yet.
    pub fn empty(config: MediumConfig) -> Self {
        let tables = ChannelTables::new(0, config.default_snr, config.noise_level);
        Self {
            config,
            stations: Stations::new(),
            tables,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: TopologyFile = toml::from_str(text)?;
        if file.stations.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut config = MediumConfig::default();
        let m = &file.medium;
        if let Some(v) = m.detect_mediums {
            config.detect_mediums = v;
        }
        if let Some(ms) = m.move_interval_ms {
            config.move_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(v) = m.side_channel {
            config.side_channel = v;
        }
        if let Some(v) = m.side_channel_port {
            config.side_channel_port = v;
        }
        if let Some(v) = m.default_snr {
            config.default_snr = v;
        }
        if let Some(v) = m.frequency {
            config.frequency = v;
        }
        if let Some(v) = m.noise_level {
            config.noise_level = v;
        }

        let count = file.stations.len();
        let mut stations = Stations::new();
        let mut tables = ChannelTables::new(count, config.default_snr, config.noise_level);
        if let Some(exponent) = m.path_loss_exponent {
            tables.path_loss.exponent = exponent;
        }
        if let Some(sigma) = m.shadowing_sigma {
            tables.path_loss.shadowing_sigma = sigma;
        }

        let mut seen = HashSet::new();
        let mut positioned = false;
        for entry in &file.stations {
            if !seen.insert(entry.addr) {
                return Err(ConfigError::DuplicateStation(entry.addr));
            }
            let role = if entry.ap { Role::AccessPoint } else { Role::Client };
            let id = stations.create_station(entry.addr, entry.hwaddr.unwrap_or(entry.addr), role);
            if let Some(station) = stations.get_mut(id) {
                station.medium_id = entry.medium_id.unwrap_or(0);
            }
            if let Some(node) = tables.node_mut(id) {
                *node = NodeState {
                    position: entry.position.map(|[x, y]| Vec2::new(x, y)).unwrap_or_default(),
                    direction: entry.direction.map(|[x, y]| Vec2::new(x, y)).unwrap_or_default(),
                    tx_power: entry.tx_power.unwrap_or(NodeState::default().tx_power),
                };
            }
            positioned |= entry.position.is_some();
        }

        match &file.snr {
            Some(matrix) => {
                if matrix.len() != count || matrix.iter().any(|row| row.len() != count) {
                    return Err(ConfigError::SnrDimension { expected: count });
                }
                for (a, row) in matrix.iter().enumerate() {
                    for (b, snr) in row.iter().enumerate() {
                        tables.set_snr(StationId(a), StationId(b), *snr);
                    }
                }
                tables.fixed_snr = true;
            }
            None if positioned => mobility::recompute_snr(&mut tables, &mut rand::rng()),
            None => tables.fixed_snr = true,
        }

        Ok(Self { config, stations, tables })
    }
}

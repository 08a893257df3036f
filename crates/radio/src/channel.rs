//! Channel-quality state shared between the reactor and its mutators, and
//! the contract a link model implements to plug into the scheduler.

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};
use wmedium_core::{Station, StationId};

use crate::RadioError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Vec2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Log-distance path loss parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathLoss {
    pub exponent: f64,
    /// Loss at 1 m in dB.
    pub reference_loss: f64,
    /// Standard deviation of log-normal shadowing in dB, 0 disables it.
    pub shadowing_sigma: f64,
}

impl Default for PathLoss {
    fn default() -> Self {
        Self {
            exponent: 3.0,
            // free space at 1 m, 2.4 GHz
            reference_loss: 40.05,
            shadowing_sigma: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeState {
    pub position: Vec2,
    /// Metres per second.
    pub direction: Vec2,
    pub tx_power: i32,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            position: Vec2::default(),
            direction: Vec2::default(),
            tx_power: 20,
        }
    }
}

/// Per-station radio state plus the directed SNR matrix, indexed by
/// [`StationId`].
#[derive(Debug, Clone)]
pub struct ChannelTables {
    nodes: Vec<NodeState>,
    snr: Vec<i32>,
    default_snr: i32,
    /// SNR values came from configuration and are not recomputed on movement.
    pub fixed_snr: bool,
    pub noise_level: i32,
    pub path_loss: PathLoss,
}

impl ChannelTables {
    pub fn new(station_count: usize, default_snr: i32, noise_level: i32) -> Self {
        Self {
            nodes: vec![NodeState::default(); station_count],
            snr: vec![default_snr; station_count * station_count],
            default_snr,
            fixed_snr: false,
            noise_level,
            path_loss: PathLoss::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Grows every table by one station and returns its index.
    pub fn add_station(&mut self, node: NodeState) -> usize {
        let old = self.nodes.len();
        let new = old + 1;
        let mut snr = vec![self.default_snr; new * new];
        for a in 0..old {
            snr[a * new..a * new + old].copy_from_slice(&self.snr[a * old..(a + 1) * old]);
        }
        self.snr = snr;
        self.nodes.push(node);
        old
    }

    pub fn node(&self, id: StationId) -> Option<&NodeState> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: StationId) -> Option<&mut NodeState> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [NodeState] {
        &mut self.nodes
    }

    /// SNR from `src` to `dst`; unknown pairs read as the default.
    pub fn snr(&self, src: StationId, dst: StationId) -> i32 {
        let n = self.nodes.len();
        if src.0 >= n || dst.0 >= n {
            return self.default_snr;
        }
        self.snr[src.0 * n + dst.0]
    }

    pub fn set_snr(&mut self, src: StationId, dst: StationId, snr: i32) -> bool {
        let n = self.nodes.len();
        if src.0 >= n || dst.0 >= n {
            return false;
        }
        self.snr[src.0 * n + dst.0] = snr;
        true
    }
}

/// Single owner of the channel tables. Mutators take the write lock for the
/// whole update; readers hold a snapshot guard while they consult it.
#[derive(Clone)]
pub struct SharedChannel {
    inner: Arc<RwLock<ChannelTables>>,
}

impl SharedChannel {
    pub fn new(tables: ChannelTables) -> Self {
        Self { inner: Arc::new(RwLock::new(tables)) }
    }

    pub async fn read_snapshot(&self) -> RwLockReadGuard<'_, ChannelTables> {
        self.inner.read().await
    }

    pub async fn apply_update<R>(&self, mutator: impl FnOnce(&mut ChannelTables) -> R) -> R {
        let mut tables = self.inner.write().await;
        mutator(&mut tables)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOutcome {
    pub delivered: bool,
    pub signal: i32,
}

/// Decides whether `dst` hears a frame from `src`.
pub trait ChannelModel: Send + Sync {
    fn evaluate(&self, tables: &ChannelTables, src: &Station, dst: &Station, frame_len: usize, rate_idx: i32) -> LinkOutcome;
}

impl<F> ChannelModel for F
where
    F: Fn(&ChannelTables, &Station, &Station, usize, i32) -> LinkOutcome + Send + Sync,
{
    fn evaluate(&self, tables: &ChannelTables, src: &Station, dst: &Station, frame_len: usize, rate_idx: i32) -> LinkOutcome {
        self(tables, src, dst, frame_len, rate_idx)
    }
}

/// Packet error rate by SNR (rows) and rate index (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct PerTable {
    rows: Vec<(i32, Vec<f64>)>,
}

impl PerTable {
    pub fn parse(text: &str) -> Result<Self, RadioError> {
        let mut rows: Vec<(i32, Vec<f64>)> = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let invalid = |reason: &str| RadioError::InvalidPerTable { line: i + 1, reason: reason.to_string() };
            let mut fields = line.split_whitespace();
            let snr = fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .ok_or_else(|| invalid("bad snr"))?
                .round() as i32;
            let pers = fields
                .map(|f| f.parse::<f64>().map_err(|_| invalid("bad per value")))
                .collect::<Result<Vec<_>, _>>()?;
            if pers.is_empty() {
                return Err(invalid("no per values"));
            }
            if pers.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(invalid("per outside [0, 1]"));
            }
            if rows.last().is_some_and(|(prev, _)| *prev >= snr) {
                return Err(invalid("snr values must increase"));
            }
            rows.push((snr, pers));
        }
        if rows.is_empty() {
            return Err(RadioError::InvalidPerTable { line: 0, reason: "empty table".to_string() });
        }
        Ok(Self { rows })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RadioError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Row for the largest tabulated SNR not above `snr`.
    pub fn lookup(&self, snr: i32, rate_idx: i32) -> f64 {
        let row = match self.rows.iter().rposition(|(s, _)| *s <= snr) {
            Some(i) => &self.rows[i].1,
            None => return 1.0,
        };
        let col = (rate_idx.max(0) as usize).min(row.len() - 1);
        row[col]
    }
}

/// Default model: SNR from the tables, PER from a table or a logistic curve,
/// pass/fail drawn at random. Stations grouped under different medium ids
/// never hear each other.
#[derive(Debug, Clone, Default)]
pub struct PerModel {
    per: Option<PerTable>,
}

impl PerModel {
    pub fn new(per: Option<PerTable>) -> Self {
        Self { per }
    }

    pub fn per(&self, snr: i32, rate_idx: i32) -> f64 {
        match &self.per {
            Some(table) => table.lookup(snr, rate_idx),
            None => {
                // higher rates need roughly 2 dB more per step
                let threshold = 4.0 + 2.0 * f64::from(rate_idx.max(0));
                1.0 / (1.0 + (f64::from(snr) - threshold).exp())
            }
        }
    }
}

impl ChannelModel for PerModel {
    fn evaluate(&self, tables: &ChannelTables, src: &Station, dst: &Station, _frame_len: usize, rate_idx: i32) -> LinkOutcome {
        let snr = tables.snr(src.id, dst.id);
        let signal = snr + tables.noise_level;
        if src.medium_id != 0 && dst.medium_id != 0 && src.medium_id != dst.medium_id {
            return LinkOutcome { delivered: false, signal };
        }
        let per = self.per(snr, rate_idx);
        let delivered = rand::rng().random::<f64>() >= per;
        LinkOutcome { delivered, signal }
    }
}

//! Frame airtime in microseconds.

use std::time::Duration;

/// Rate index to rate in 100 kbps units for 2.4 GHz (DSSS/CCK then OFDM).
pub const RATES_2GHZ: [u32; 12] = [10, 20, 55, 110, 60, 90, 120, 180, 240, 360, 480, 540];
/// OFDM-only rates used at 5 GHz and above.
pub const RATES_5GHZ: [u32; 8] = [60, 90, 120, 180, 240, 360, 480, 540];

#[inline]
fn div_round(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Preamble + signal + symbol time, `rate` in 100 kbps units.
pub fn pkt_duration(len: usize, rate: u32) -> u64 {
    let rate = u64::from(rate.max(1));
    16 + 4 + 4 * div_round((16 + 8 * len as u64 + 6) * 10, 4 * rate)
}

pub fn airtime(len: usize, rate: u32) -> Duration {
    Duration::from_micros(pkt_duration(len, rate))
}

/// Clamps out-of-range indices to the table bounds.
pub fn index_to_rate(rate_idx: i32, freq: u32) -> u32 {
    let table: &[u32] = if freq >= 5000 { &RATES_5GHZ } else { &RATES_2GHZ };
    let idx = rate_idx.clamp(0, table.len() as i32 - 1) as usize;
    table[idx]
}

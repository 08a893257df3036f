//! Medium id inference from AP/station roles.
//!
//! A pair with exactly one access point lands in that AP's group,
//! `-(ap_index) - 1`. AP-AP and station-station pairs are left alone.

use log::debug;

use crate::station::{Station, StationId, Stations};

pub fn medium_id_for_ap(ap: &Station) -> i32 {
    -(ap.id.0 as i32) - 1
}

#[derive(Clone, Copy, Debug)]
pub struct MediumResolver {
    enabled: bool,
}

impl MediumResolver {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Assigns the pair's medium id and returns it, or `None` when detection
    /// is off or the pair is not AP-centric.
    pub fn resolve(&self, stations: &mut Stations, src: StationId, dst: StationId) -> Option<i32> {
        if !self.enabled {
            return None;
        }
        let (src, dst) = stations.pair_mut(src, dst)?;

        let medium_id = match (src.is_ap(), dst.is_ap()) {
            (true, false) => medium_id_for_ap(src),
            (false, true) => medium_id_for_ap(dst),
            _ => {
                // TODO: group ad hoc and mesh peers
                debug!("Not assigning a medium to {} <-> {}: not an AP/station pair", src.addr, dst.addr);
                return None;
            }
        };

        for station in [src, dst] {
            if station.medium_id != medium_id {
                debug!(
                    "Setting medium id of {}({}|{}) to {}",
                    station.addr,
                    station.id.0,
                    if station.is_ap() { "AP" } else { "Sta" },
                    medium_id
                );
                station.medium_id = medium_id;
            }
        }
        Some(medium_id)
    }
}

//! Delivery scheduler: per-destination WMM queues drained by one deadline

use log::{debug, info, trace, warn};
use tokio::time::Instant;
use wmedium_core::airtime::{airtime, index_to_rate};
use wmedium_core::ieee80211::Header;
use wmedium_core::{AccessCategory, Frame, MediumResolver, StationId, Stations};

use crate::channel::{ChannelModel, ChannelTables};
use crate::kernel::HwsimRelay;
use crate::netlink::{FrameNotification, TxStatus, HWSIM_TX_STAT_ACK};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_received: u64,
    pub frames_queued: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub relay_failures: u64,
}

/// Owns the station arena. The armed deadline is always the earliest head
/// expiry across every queue, or `None` when nothing is pending.
pub struct DeliveryScheduler {
    stations: Stations,
    resolver: MediumResolver,
    relay: HwsimRelay,
    default_freq: u32,
    deadline: Option<Instant>,
    stats: SchedulerStats,
}

impl DeliveryScheduler {
    pub fn new(stations: Stations, resolver: MediumResolver, relay: HwsimRelay, default_freq: u32) -> Self {
        Self {
            stations,
            resolver,
            relay,
            default_freq,
            deadline: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stations(&self) -> &Stations {
        &self.stations
    }

    pub fn stations_mut(&mut self) -> &mut Stations {
        &mut self.stations
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Queues a copy for `dest` expiring one airtime after `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule(
        &mut self,
        src: StationId,
        dest: StationId,
        ac: AccessCategory,
        data: Vec<u8>,
        rate_idx: i32,
        signal: i32,
        freq: u32,
        now: Instant,
    ) -> Option<Instant> {
        let duration = airtime(data.len(), index_to_rate(rate_idx, freq));
        let expires = now + duration;
        let frame = Frame {
            data,
            src,
            dest,
            expires: expires.into_std(),
            rate_idx,
            signal,
            freq,
        };
        if let Err(e) = self.stations.enqueue(dest, ac, frame) {
            warn!("Dropping frame for station {}: {}", dest.0, e);
            return None;
        }
        self.stats.frames_queued += 1;
        trace!("Queued {} frame for station {} expiring in {:?}", ac, dest.0, duration);
        self.rearm();
        Some(expires)
    }

    /// Re-derives the deadline from every queue head.
    pub fn rearm(&mut self) -> Option<Instant> {
        self.deadline = self.stations.next_expiry().map(Instant::from_std);
        self.deadline
    }

    /// Relays every frame due at `now`, then rearms. Returns how many were
    /// handed to the kernel successfully.
    pub async fn fire(&mut self, now: Instant) -> usize {
        let now_std = now.into_std();
        let mut due = Vec::new();
        for station in self.stations.iter_mut() {
            for queue in station.queues_mut() {
                while let Some(frame) = queue.pop_due(now_std) {
                    due.push(frame);
                }
            }
        }
        due.sort_by_key(|f| f.expires);

        let mut delivered = 0;
        for frame in due {
            let Some(dst) = self.stations.get(frame.dest) else {
                continue;
            };
            if self
                .relay
                .send_cloned_frame(dst, &frame.data, frame.rate_idx, frame.signal, frame.freq)
                .await
            {
                delivered += 1;
                self.stats.frames_delivered += 1;
            } else {
                self.stats.relay_failures += 1;
            }
        }
        self.rearm();
        delivered
    }

    /// Fans a transmitted frame out to every station that should hear it.
    pub async fn handle_frame(&mut self, notification: FrameNotification, tables: &ChannelTables, model: &dyn ChannelModel, now: Instant) {
        self.stats.frames_received += 1;
        let Some(src) = self.stations.by_hwaddr(&notification.transmitter).map(|s| s.id) else {
            warn!("Dropping frame from unknown radio {}", notification.transmitter);
            return;
        };
        let Some(header) = Header::parse(&notification.data) else {
            warn!("Dropping {} byte frame from {}: too short for a MAC header", notification.data.len(), notification.transmitter);
            return;
        };
        let ac = header.access_category();
        let dest_addr = header.addr1();
        let multicast = dest_addr.is_multicast();
        let rate_idx = notification.rate_idx();
        let freq = notification.freq.unwrap_or(self.default_freq);

        let receivers: Vec<StationId> = self
            .stations
            .iter()
            .filter(|s| s.id != src && (multicast || s.addr == dest_addr))
            .map(|s| s.id)
            .collect();
        if receivers.is_empty() {
            debug!("No station listens for {} (from {})", dest_addr, notification.transmitter);
        }

        let mut acked = false;
        let mut ack_signal = 0;
        for dest in receivers {
            self.resolver.resolve(&mut self.stations, src, dest);
            let (Some(s), Some(d)) = (self.stations.get(src), self.stations.get(dest)) else {
                continue;
            };
            let outcome = model.evaluate(tables, s, d, notification.data.len(), rate_idx);
            if !outcome.delivered {
                debug!("Dropped {} frame {} -> {} (signal {})", ac, s.addr, d.addr, outcome.signal);
                self.stats.frames_dropped += 1;
                continue;
            }
            if !multicast {
                acked = true;
                ack_signal = outcome.signal;
            }
            self.schedule(src, dest, ac, notification.data.clone(), rate_idx, outcome.signal, freq, now);
        }

        if notification.wants_tx_status() {
            let mut flags = notification.flags;
            if acked && !notification.no_ack() {
                flags |= HWSIM_TX_STAT_ACK;
            }
            let status = TxStatus {
                transmitter: notification.transmitter,
                flags,
                signal: ack_signal,
                tx_info: notification.tx_info.clone(),
                cookie: notification.cookie,
                freq,
            };
            self.relay.send_tx_status(&status).await;
        }
    }

    pub fn log_stats(&self) {
        let s = self.stats;
        info!(
            "Scheduler: {} received, {} queued, {} delivered, {} dropped, {} relay failures, {} pending",
            s.frames_received,
            s.frames_queued,
            s.frames_delivered,
            s.frames_dropped,
            s.relay_failures,
            self.stations.pending()
        );
    }
}

//! The medium reactor: one task owning the stations and the deadline timer

use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use wmedium_core::{MacAddr, MediumResolver, Role, StationId, Stations};

use crate::channel::{ChannelModel, NodeState, SharedChannel};
use crate::ingest::DeliveryRequest;
use crate::kernel::{HwsimRelay, KernelLink};
use crate::mobility;
use crate::netlink::{FrameNotification, Incoming, HWSIM_CMD_FRAME};
use crate::scheduler::DeliveryScheduler;
use crate::{MediumConfig, RadioError};

const CHANNEL_DEPTH: usize = 1024;

/// Topology and link mutations fed in from outside the reactor.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SetSnr { from: MacAddr, to: MacAddr, snr: i32 },
    SetMediumId { addr: MacAddr, medium_id: i32 },
    SetPosition { addr: MacAddr, x: f64, y: f64 },
    AddStation { addr: MacAddr, hwaddr: MacAddr, role: Role },
}

/// Cloneable entry points into a running [`Medium`].
#[derive(Clone)]
pub struct MediumHandle {
    pub deliveries: mpsc::Sender<DeliveryRequest>,
    pub control: mpsc::Sender<ControlEvent>,
    pub channel: SharedChannel,
}

pub struct Medium {
    config: MediumConfig,
    scheduler: DeliveryScheduler,
    relay: HwsimRelay,
    channel: SharedChannel,
    model: Arc<dyn ChannelModel>,
    deliveries: mpsc::Receiver<DeliveryRequest>,
    control: mpsc::Receiver<ControlEvent>,
}

impl Medium {
    pub fn new(
        config: MediumConfig,
        stations: Stations,
        channel: SharedChannel,
        model: Arc<dyn ChannelModel>,
        link: Arc<dyn KernelLink>,
    ) -> (Self, MediumHandle) {
        let (deliveries_tx, deliveries) = mpsc::channel(CHANNEL_DEPTH);
        let (control_tx, control) = mpsc::channel(CHANNEL_DEPTH);
        let relay = HwsimRelay::new(link);
        let scheduler = DeliveryScheduler::new(
            stations,
            MediumResolver::new(config.detect_mediums),
            relay.clone(),
            config.frequency,
        );

        info!(
            "Medium initialized with {} stations, detection {}, dynamic {}",
            scheduler.stations().len(),
            if config.detect_mediums { "on" } else { "off" },
            config.dynamic
        );

        let handle = MediumHandle {
            deliveries: deliveries_tx,
            control: control_tx,
            channel: channel.clone(),
        };
        let medium = Self {
            config,
            scheduler,
            relay,
            channel,
            model,
            deliveries,
            control,
        };
        (medium, handle)
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    /// Sends REGISTER. Must succeed before [`Medium::run`].
    pub async fn register(&self) -> Result<(), RadioError> {
        self.relay.register().await?;
        info!("REGISTER sent");
        Ok(())
    }

    /// Runs until the kernel link fails.
    pub async fn run(mut self) -> Result<(), RadioError> {
        let link = self.relay.link().clone();
        let move_interval = self.config.move_interval;
        let mut ticker = interval_at(Instant::now() + move_interval, move_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timer = sleep_until(Instant::now());
        tokio::pin!(timer);

        loop {
            let deadline = self.scheduler.deadline();
            if let Some(at) = deadline {
                timer.as_mut().reset(at);
            }

            tokio::select! {
                biased;

                _ = &mut timer, if deadline.is_some() => {
                    let delivered = self.scheduler.fire(Instant::now()).await;
                    trace!("Deadline fired, {} frames relayed", delivered);
                }
                incoming = link.recv() => {
                    match incoming {
                        Ok(messages) => {
                            for message in messages {
                                self.handle_kernel(message).await;
                            }
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("Discarding kernel datagram: {}", e);
                        }
                        Err(e) => {
                            error!("Kernel link failed: {}", e);
                            self.scheduler.log_stats();
                            return Err(e);
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(request) = self.deliveries.recv() => {
                    self.handle_delivery(request).await;
                }
                Some(event) = self.control.recv() => {
                    self.handle_control(event).await;
                }
            }
        }
    }

    pub async fn handle_kernel(&mut self, message: Incoming) {
        match message {
            Incoming::Genl(msg) if msg.cmd == HWSIM_CMD_FRAME => {
                let notification = match FrameNotification::from_genl(&msg) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Dropping malformed frame notification: {}", e);
                        return;
                    }
                };
                if self.scheduler.stations().by_hwaddr(&notification.transmitter).is_none() {
                    if !self.config.dynamic {
                        warn!("Dropping frame from unknown radio {}", notification.transmitter);
                        return;
                    }
                    let radio = notification.transmitter;
                    self.add_station(radio, radio, Role::Client).await;
                }
                let tables = self.channel.read_snapshot().await;
                self.scheduler
                    .handle_frame(notification, &tables, self.model.as_ref(), Instant::now())
                    .await;
            }
            Incoming::Genl(msg) => trace!("Ignoring generic netlink cmd {}", msg.cmd),
            Incoming::Error { errno, seq } if errno != 0 => {
                debug!("nl: seq {}: {}", seq, std::io::Error::from_raw_os_error(errno));
            }
            other => trace!("Ignoring netlink message {:?}", other),
        }
    }

    /// Relays a side-channel request to every station using its radio.
    pub async fn handle_delivery(&mut self, request: DeliveryRequest) {
        let targets: Vec<_> = self
            .scheduler
            .stations()
            .iter()
            .filter(|s| s.hwaddr == request.hwaddr)
            .map(|s| (s.addr, s.hwaddr))
            .collect();
        if targets.is_empty() {
            debug!("Side-channel request for unknown radio {}", request.hwaddr);
            return;
        }
        for (addr, hwaddr) in targets {
            self.relay
                .send_to_radio(addr, hwaddr, &request.data, request.rate_idx, request.signal, request.freq)
                .await;
        }
    }

    pub async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SetSnr { from, to, snr } => {
                let (Some(a), Some(b)) = (self.station_id(&from), self.station_id(&to)) else {
                    warn!("SNR update for unknown pair {} -> {}", from, to);
                    return;
                };
                self.channel.apply_update(|t| t.set_snr(a, b, snr)).await;
                debug!("SNR {} -> {} set to {}", from, to, snr);
            }
            ControlEvent::SetMediumId { addr, medium_id } => {
                let Some(id) = self.station_id(&addr) else {
                    warn!("Medium id update for unknown station {}", addr);
                    return;
                };
                if let Some(station) = self.scheduler.stations_mut().get_mut(id) {
                    station.medium_id = medium_id;
                    debug!("Medium id of {} set to {}", addr, medium_id);
                }
            }
            ControlEvent::SetPosition { addr, x, y } => {
                let Some(id) = self.station_id(&addr) else {
                    warn!("Position update for unknown station {}", addr);
                    return;
                };
                self.channel
                    .apply_update(|t| {
                        if let Some(node) = t.node_mut(id) {
                            node.position.x = x;
                            node.position.y = y;
                        }
                        if !t.fixed_snr {
                            mobility::recompute_snr(t, &mut rand::rng());
                        }
                    })
                    .await;
            }
            ControlEvent::AddStation { addr, hwaddr, role } => {
                if !self.config.dynamic {
                    warn!("Ignoring new station {}: topology is static", addr);
                    return;
                }
                if self.station_id(&addr).is_some() {
                    warn!("Station {} already exists", addr);
                    return;
                }
                self.add_station(addr, hwaddr, role).await;
            }
        }
    }

    /// Mobility tick: moves stations under the write lock and rearms before
    /// releasing it.
    pub async fn tick(&mut self) {
        let elapsed = self.config.move_interval;
        let scheduler = &mut self.scheduler;
        self.channel
            .apply_update(|tables| {
                mobility::move_stations(tables, elapsed, &mut rand::rng());
                scheduler.rearm();
            })
            .await;
    }

    fn station_id(&self, addr: &MacAddr) -> Option<StationId> {
        self.scheduler.stations().by_addr(addr).map(|s| s.id)
    }

    async fn add_station(&mut self, addr: MacAddr, hwaddr: MacAddr, role: Role) -> StationId {
        let id = self.scheduler.stations_mut().create_station(addr, hwaddr, role);
        let index = self.channel.apply_update(|t| t.add_station(NodeState::default())).await;
        if index != id.0 {
            warn!("Channel tables out of step with stations ({} vs {})", index, id.0);
        }
        info!("Added station {} (radio {}) as {:?}", addr, hwaddr, role);
        id
    }
}

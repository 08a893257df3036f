//! Stations, their per-access-category queues and the frames waiting in them

use std::collections::VecDeque;
use std::time::Instant;

use log::trace;

use crate::types::{AccessCategory, MacAddr, NUM_ACS};
use crate::CoreError;

/// Stable index of a station inside [`Stations`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    AccessPoint,
    Client,
}

/// A frame copy waiting for delivery to `dest`.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub src: StationId,
    pub dest: StationId,
    pub expires: Instant,
    pub rate_idx: i32,
    pub signal: i32,
    pub freq: u32,
}

#[derive(Debug)]
pub struct Queue {
    ac: AccessCategory,
    cw_min: u16,
    cw_max: u16,
    frames: VecDeque<Frame>,
}

impl Queue {
    pub fn new(ac: AccessCategory) -> Self {
        let (cw_min, cw_max) = ac.contention_window();
        Self {
            ac,
            cw_min,
            cw_max,
            frames: VecDeque::new(),
        }
    }

    pub fn access_category(&self) -> AccessCategory {
        self.ac
    }

    pub fn cw_min(&self) -> u16 {
        self.cw_min
    }

    pub fn cw_max(&self) -> u16 {
        self.cw_max
    }

    /// Inserts keeping expiry order; equal expiries stay in arrival order.
    pub fn push(&mut self, frame: Frame) {
        let pos = self.frames.partition_point(|f| f.expires <= frame.expires);
        self.frames.insert(pos, frame);
    }

    pub fn head(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Removes the head if it has expired at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Frame> {
        match self.frames.front() {
            Some(f) if f.expires <= now => self.frames.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

#[derive(Debug)]
pub struct Station {
    pub id: StationId,
    /// Address used inside 802.11 headers.
    pub addr: MacAddr,
    /// Radio address the kernel module knows the station by.
    pub hwaddr: MacAddr,
    pub role: Role,
    pub medium_id: i32,
    queues: [Queue; NUM_ACS],
}

impl Station {
    pub fn is_ap(&self) -> bool {
        self.role == Role::AccessPoint
    }

    pub fn queue(&self, ac: AccessCategory) -> &Queue {
        &self.queues[ac.index()]
    }

    pub fn queue_mut(&mut self, ac: AccessCategory) -> &mut Queue {
        &mut self.queues[ac.index()]
    }

    pub fn queues(&self) -> &[Queue; NUM_ACS] {
        &self.queues
    }

    pub fn queues_mut(&mut self) -> &mut [Queue; NUM_ACS] {
        &mut self.queues
    }

    /// Earliest head expiry over the four queues.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.queues
            .iter()
            .filter_map(|q| q.head().map(|f| f.expires))
            .min()
    }

    pub fn pending(&self) -> usize {
        self.queues.iter().map(Queue::len).sum()
    }
}

/// Arena of every station known to the medium. Stations are never removed,
/// so a [`StationId`] stays valid for the lifetime of the arena.
#[derive(Debug, Default)]
pub struct Stations {
    stations: Vec<Station>,
}

impl Stations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_station(&mut self, addr: MacAddr, hwaddr: MacAddr, role: Role) -> StationId {
        let id = StationId(self.stations.len());
        self.stations.push(Station {
            id,
            addr,
            hwaddr,
            role,
            medium_id: 0,
            queues: AccessCategory::ALL.map(Queue::new),
        });
        trace!("Created station {} (radio {}) as {:?} with index {}", addr, hwaddr, role, id.0);
        id
    }

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.get(id.0)
    }

    pub fn get_mut(&mut self, id: StationId) -> Option<&mut Station> {
        self.stations.get_mut(id.0)
    }

    /// Mutable access to two distinct stations at once.
    pub fn pair_mut(&mut self, a: StationId, b: StationId) -> Option<(&mut Station, &mut Station)> {
        if a == b || a.0 >= self.stations.len() || b.0 >= self.stations.len() {
            return None;
        }
        if a.0 < b.0 {
            let (lo, hi) = self.stations.split_at_mut(b.0);
            Some((&mut lo[a.0], &mut hi[0]))
        } else {
            let (lo, hi) = self.stations.split_at_mut(a.0);
            Some((&mut hi[0], &mut lo[b.0]))
        }
    }

    pub fn by_addr(&self, addr: &MacAddr) -> Option<&Station> {
        self.stations.iter().find(|s| s.addr == *addr)
    }

    pub fn by_hwaddr(&self, hwaddr: &MacAddr) -> Option<&Station> {
        self.stations.iter().find(|s| s.hwaddr == *hwaddr)
    }

    pub fn enqueue(&mut self, id: StationId, ac: AccessCategory, frame: Frame) -> Result<(), CoreError> {
        let station = self.stations.get_mut(id.0).ok_or(CoreError::UnknownStation(id.0))?;
        station.queue_mut(ac).push(frame);
        Ok(())
    }

    /// Minimum head expiry across every queue of every station.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.stations.iter().filter_map(Station::next_expiry).min()
    }

    pub fn pending(&self) -> usize {
        self.stations.iter().map(Station::pending).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Station> {
        self.stations.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    fn frame(tag: u8, expires: Instant) -> Frame {
        Frame {
            data: vec![tag],
            src: StationId(0),
            dest: StationId(1),
            expires,
            rate_idx: 0,
            signal: -50,
            freq: 2412,
        }
    }

    #[test]
    fn test_create_station_initializes_queues() {
        let mut stations = Stations::new();
        let id = stations.create_station(mac(1), mac(0x11), Role::Client);
        let station = stations.get(id).unwrap();

        for (queue, ac) in station.queues().iter().zip(AccessCategory::ALL) {
            assert_eq!(queue.access_category(), ac);
            assert_eq!((queue.cw_min(), queue.cw_max()), ac.contention_window());
            assert!(queue.is_empty());
        }
        assert_eq!(station.queue(AccessCategory::Voice).cw_min(), 3);
        assert_eq!(station.queue(AccessCategory::Background).cw_max(), 1023);
        assert_eq!(station.medium_id, 0);
    }

    #[test]
    fn test_queue_keeps_expiry_order_and_fifo_ties() {
        let base = Instant::now();
        let mut queue = Queue::new(AccessCategory::BestEffort);

        queue.push(frame(1, base + Duration::from_micros(50)));
        queue.push(frame(2, base + Duration::from_micros(10)));
        queue.push(frame(3, base + Duration::from_micros(50)));
        queue.push(frame(4, base + Duration::from_micros(30)));

        let order: Vec<u8> = queue.iter().map(|f| f.data[0]).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_pop_due_only_returns_expired_head() {
        let base = Instant::now();
        let mut queue = Queue::new(AccessCategory::Video);
        queue.push(frame(1, base + Duration::from_micros(100)));

        assert!(queue.pop_due(base).is_none());
        assert_eq!(queue.len(), 1);
        let due = queue.pop_due(base + Duration::from_micros(100)).unwrap();
        assert_eq!(due.data, vec![1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_next_expiry_spans_stations_and_queues() {
        let base = Instant::now();
        let mut stations = Stations::new();
        let a = stations.create_station(mac(1), mac(1), Role::AccessPoint);
        let b = stations.create_station(mac(2), mac(2), Role::Client);
        assert!(stations.next_expiry().is_none());

        stations
            .enqueue(a, AccessCategory::Background, frame(1, base + Duration::from_micros(80)))
            .unwrap();
        stations
            .enqueue(b, AccessCategory::Voice, frame(2, base + Duration::from_micros(20)))
            .unwrap();

        assert_eq!(stations.next_expiry(), Some(base + Duration::from_micros(20)));
        assert_eq!(stations.pending(), 2);
    }

    #[test]
    fn test_enqueue_unknown_station() {
        let mut stations = Stations::new();
        let result = stations.enqueue(StationId(3), AccessCategory::Voice, frame(1, Instant::now()));
        assert!(matches!(result, Err(CoreError::UnknownStation(3))));
    }

    #[test]
    fn test_lookup_and_pair_mut() {
        let mut stations = Stations::new();
        let a = stations.create_station(mac(1), mac(0x11), Role::AccessPoint);
        let b = stations.create_station(mac(2), mac(0x12), Role::Client);

        assert_eq!(stations.by_addr(&mac(2)).map(|s| s.id), Some(b));
        assert_eq!(stations.by_hwaddr(&mac(0x11)).map(|s| s.id), Some(a));
        assert!(stations.by_hwaddr(&mac(2)).is_none());

        let (sb, sa) = stations.pair_mut(b, a).unwrap();
        assert_eq!((sb.id, sa.id), (b, a));
        assert!(stations.pair_mut(a, a).is_none());
    }
}

//! Just enough 802.11 MAC header parsing to route a frame.

use crate::types::{AccessCategory, MacAddr};

pub const FCTL_FTYPE: u8 = 0x0c;
pub const FTYPE_MGMT: u8 = 0x00;
pub const FTYPE_DATA: u8 = 0x08;
pub const STYPE_QOS_DATA: u8 = 0x80;
pub const FCTL_TODS: u8 = 0x01;
pub const FCTL_FROMDS: u8 = 0x02;

/// frame control (2) + duration (2) + addr1..addr3 (18) + seq ctl (2)
pub const HDR_LEN: usize = 24;
const HDR_LEN_A4: usize = 30;

/// Borrowed view over the leading MAC header of a raw frame.
#[derive(Clone, Copy, Debug)]
pub struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    /// Returns `None` when `data` is too short to carry a 3-address header.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < HDR_LEN {
            return None;
        }
        Some(Self { data })
    }

    fn frame_control(&self) -> [u8; 2] {
        [self.data[0], self.data[1]]
    }

    pub fn has_a4(&self) -> bool {
        let fc = self.frame_control();
        fc[1] & (FCTL_TODS | FCTL_FROMDS) == (FCTL_TODS | FCTL_FROMDS)
    }

    pub fn is_mgmt(&self) -> bool {
        self.frame_control()[0] & FCTL_FTYPE == FTYPE_MGMT
    }

    pub fn is_data(&self) -> bool {
        self.frame_control()[0] & FCTL_FTYPE == FTYPE_DATA
    }

    pub fn is_qos_data(&self) -> bool {
        self.frame_control()[0] & (FCTL_FTYPE | STYPE_QOS_DATA) == (FTYPE_DATA | STYPE_QOS_DATA)
    }

    /// Receiver address.
    pub fn addr1(&self) -> MacAddr {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.data[4..10]);
        MacAddr(octets)
    }

    /// Transmitter address.
    pub fn addr2(&self) -> MacAddr {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.data[10..16]);
        MacAddr(octets)
    }

    pub fn qos_ctl(&self) -> Option<u8> {
        if !self.is_qos_data() {
            return None;
        }
        let offset = if self.has_a4() { HDR_LEN_A4 } else { HDR_LEN };
        self.data.get(offset).copied()
    }

    pub fn access_category(&self) -> AccessCategory {
        if self.is_mgmt() {
            return AccessCategory::Voice;
        }
        match self.qos_ctl() {
            Some(ctl) => AccessCategory::from_tid(ctl & 0x07),
            None => AccessCategory::BestEffort,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_frame(fc0: u8, fc1: u8, addr1: MacAddr, addr2: MacAddr, qos: Option<u8>) -> Vec<u8> {
        let mut frame = vec![fc0, fc1, 0, 0];
        frame.extend_from_slice(addr1.octets());
        frame.extend_from_slice(addr2.octets());
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&[0, 0]);
        if fc1 & (FCTL_TODS | FCTL_FROMDS) == (FCTL_TODS | FCTL_FROMDS) {
            frame.extend_from_slice(&[0u8; 6]);
        }
        if let Some(ctl) = qos {
            frame.extend_from_slice(&[ctl, 0]);
        }
        frame.extend_from_slice(b"payload");
        frame
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(Header::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_addresses() {
        let data = build_frame(FTYPE_DATA, 0, mac(2), mac(1), None);
        let hdr = Header::parse(&data).unwrap();
        assert_eq!(hdr.addr1(), mac(2));
        assert_eq!(hdr.addr2(), mac(1));
        assert!(hdr.is_data());
    }

    #[test]
    fn test_mgmt_uses_voice() {
        let data = build_frame(0x80, 0, MacAddr::BROADCAST, mac(1), None); // beacon
        let hdr = Header::parse(&data).unwrap();
        assert!(hdr.is_mgmt());
        assert_eq!(hdr.access_category(), AccessCategory::Voice);
    }

    #[test]
    fn test_qos_tid_selects_category() {
        let data = build_frame(FTYPE_DATA | STYPE_QOS_DATA, 0, mac(2), mac(1), Some(5));
        assert_eq!(Header::parse(&data).unwrap().access_category(), AccessCategory::Video);

        let data = build_frame(FTYPE_DATA | STYPE_QOS_DATA, FCTL_TODS | FCTL_FROMDS, mac(2), mac(1), Some(1));
        let hdr = Header::parse(&data).unwrap();
        assert!(hdr.has_a4());
        assert_eq!(hdr.access_category(), AccessCategory::Background);
    }

    #[test]
    fn test_plain_data_is_best_effort() {
        let data = build_frame(FTYPE_DATA, 0, mac(2), mac(1), None);
        assert_eq!(Header::parse(&data).unwrap().access_category(), AccessCategory::BestEffort);
    }
}

//! Generic netlink framing and the mac80211_hwsim message set

use bytes::{Buf, BufMut, Bytes, BytesMut};
use wmedium_core::MacAddr;

use crate::RadioError;

pub const NLMSG_HDRLEN: usize = 16;
pub const GENL_HDRLEN: usize = 4;
pub const NLA_HDRLEN: usize = 4;

pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLMSG_NOOP: u16 = 0x01;
pub const NLMSG_ERROR: u16 = 0x02;
pub const NLMSG_DONE: u16 = 0x03;

const NLA_TYPE_MASK: u16 = 0x3fff;

pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;

pub const HWSIM_FAMILY_NAME: &str = "MAC80211_HWSIM";
pub const VERSION_NR: u8 = 1;

pub const HWSIM_CMD_REGISTER: u8 = 1;
pub const HWSIM_CMD_FRAME: u8 = 2;
pub const HWSIM_CMD_TX_INFO_FRAME: u8 = 3;

pub const HWSIM_ATTR_ADDR_RECEIVER: u16 = 1;
pub const HWSIM_ATTR_ADDR_TRANSMITTER: u16 = 2;
pub const HWSIM_ATTR_FRAME: u16 = 3;
pub const HWSIM_ATTR_FLAGS: u16 = 4;
pub const HWSIM_ATTR_RX_RATE: u16 = 5;
pub const HWSIM_ATTR_SIGNAL: u16 = 6;
pub const HWSIM_ATTR_TX_INFO: u16 = 7;
pub const HWSIM_ATTR_COOKIE: u16 = 8;
pub const HWSIM_ATTR_FREQ: u16 = 19;

pub const HWSIM_TX_CTL_REQ_TX_STATUS: u32 = 1 << 0;
pub const HWSIM_TX_CTL_NO_ACK: u32 = 1 << 1;
pub const HWSIM_TX_STAT_ACK: u32 = 1 << 2;

pub const IEEE80211_TX_MAX_RATES: usize = 4;

#[inline]
fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: u16,
    pub payload: Bytes,
}

impl Attr {
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self { kind, payload: payload.into() }
    }

    pub fn u32(kind: u16, value: u32) -> Self {
        Self::new(kind, value.to_ne_bytes().to_vec())
    }

    pub fn u64(kind: u16, value: u64) -> Self {
        Self::new(kind, value.to_ne_bytes().to_vec())
    }

    pub fn as_u16(&self) -> Option<u16> {
        let b: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(u16::from_ne_bytes(b))
    }

    pub fn as_u32(&self) -> Option<u32> {
        let b: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_ne_bytes(b))
    }

    pub fn as_u64(&self) -> Option<u64> {
        let b: [u8; 8] = self.payload.get(..8)?.try_into().ok()?;
        Some(u64::from_ne_bytes(b))
    }
}

/// One generic netlink message: netlink header fields, genl header and a flat
/// attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenlMessage {
    pub family: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
    pub cmd: u8,
    pub version: u8,
    pub attrs: Vec<Attr>,
}

impl GenlMessage {
    pub fn request(family: u16, cmd: u8, version: u8) -> Self {
        Self {
            family,
            flags: NLM_F_REQUEST,
            seq: 0,
            pid: 0,
            cmd,
            version,
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn attr(&self, kind: u16) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.kind == kind)
    }

    pub fn encoded_len(&self) -> usize {
        NLMSG_HDRLEN
            + GENL_HDRLEN
            + self
                .attrs
                .iter()
                .map(|a| nla_align(NLA_HDRLEN + a.payload.len()))
                .sum::<usize>()
    }

    pub fn encode(&self) -> Bytes {
        let len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(len);

        buf.put_u32_ne(len as u32);
        buf.put_u16_ne(self.family);
        buf.put_u16_ne(self.flags);
        buf.put_u32_ne(self.seq);
        buf.put_u32_ne(self.pid);

        buf.put_u8(self.cmd);
        buf.put_u8(self.version);
        buf.put_u16_ne(0);

        for attr in &self.attrs {
            let attr_len = NLA_HDRLEN + attr.payload.len();
            buf.put_u16_ne(attr_len as u16);
            buf.put_u16_ne(attr.kind);
            buf.put_slice(&attr.payload);
            buf.put_bytes(0, nla_align(attr_len) - attr_len);
        }

        buf.freeze()
    }
}

/// A decoded netlink message as received from the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Genl(GenlMessage),
    /// `errno == 0` is an acknowledgement.
    Error { errno: i32, seq: u32 },
    Done,
    Other(u16),
}

fn parse_attrs(mut body: &[u8]) -> Result<Vec<Attr>, RadioError> {
    let mut attrs = Vec::new();
    while body.len() >= NLA_HDRLEN {
        let mut hdr = &body[..NLA_HDRLEN];
        let attr_len = hdr.get_u16_ne() as usize;
        let kind = hdr.get_u16_ne() & NLA_TYPE_MASK;
        if attr_len < NLA_HDRLEN || attr_len > body.len() {
            return Err(RadioError::Malformed("attribute length out of bounds"));
        }
        attrs.push(Attr::new(kind, Bytes::copy_from_slice(&body[NLA_HDRLEN..attr_len])));
        let advance = nla_align(attr_len).min(body.len());
        body = &body[advance..];
    }
    Ok(attrs)
}

/// Splits a datagram into its netlink messages.
pub fn parse_datagram(mut buf: &[u8]) -> Result<Vec<Incoming>, RadioError> {
    let mut messages = Vec::new();
    while buf.len() >= NLMSG_HDRLEN {
        let mut hdr = &buf[..NLMSG_HDRLEN];
        let len = hdr.get_u32_ne() as usize;
        let kind = hdr.get_u16_ne();
        let flags = hdr.get_u16_ne();
        let seq = hdr.get_u32_ne();
        let pid = hdr.get_u32_ne();
        if len < NLMSG_HDRLEN || len > buf.len() {
            return Err(RadioError::Malformed("message length out of bounds"));
        }
        let mut body = &buf[NLMSG_HDRLEN..len];

        let message = match kind {
            NLMSG_NOOP => None,
            NLMSG_DONE => Some(Incoming::Done),
            NLMSG_ERROR => {
                if body.len() < 4 {
                    return Err(RadioError::Malformed("short error message"));
                }
                let errno = body.get_i32_ne();
                // the header of the offending request follows
                let orig_seq = if body.len() >= 12 { (&body[8..12]).get_u32_ne() } else { seq };
                Some(Incoming::Error { errno: errno.wrapping_neg(), seq: orig_seq })
            }
            _ if kind < 0x10 => Some(Incoming::Other(kind)),
            family => {
                if body.len() < GENL_HDRLEN {
                    return Err(RadioError::Malformed("short generic netlink header"));
                }
                let cmd = body.get_u8();
                let version = body.get_u8();
                body.advance(2);
                Some(Incoming::Genl(GenlMessage {
                    family,
                    flags,
                    seq,
                    pid,
                    cmd,
                    version,
                    attrs: parse_attrs(body)?,
                }))
            }
        };
        messages.extend(message);

        let advance = nla_align(len).min(buf.len());
        buf = &buf[advance..];
    }
    Ok(messages)
}

pub fn get_family(name: &str) -> GenlMessage {
    let mut name = name.as_bytes().to_vec();
    name.push(0);
    GenlMessage::request(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, 1).with_attr(Attr::new(CTRL_ATTR_FAMILY_NAME, name))
}

pub fn family_id(reply: &GenlMessage) -> Result<u16, RadioError> {
    reply
        .attr(CTRL_ATTR_FAMILY_ID)
        .ok_or(RadioError::MissingAttribute(CTRL_ATTR_FAMILY_ID))?
        .as_u16()
        .ok_or(RadioError::Malformed("short family id"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRate {
    pub idx: i8,
    pub count: u8,
}

/// HWSIM_CMD_FRAME as sent by the kernel for a frame a radio transmits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNotification {
    pub transmitter: MacAddr,
    pub data: Vec<u8>,
    pub flags: u32,
    pub tx_info: Vec<TxRate>,
    pub cookie: u64,
    pub freq: Option<u32>,
}

impl FrameNotification {
    pub fn from_genl(msg: &GenlMessage) -> Result<Self, RadioError> {
        if msg.cmd != HWSIM_CMD_FRAME {
            return Err(RadioError::Malformed("not a frame command"));
        }
        let transmitter = msg
            .attr(HWSIM_ATTR_ADDR_TRANSMITTER)
            .ok_or(RadioError::MissingAttribute(HWSIM_ATTR_ADDR_TRANSMITTER))
            .and_then(|a| MacAddr::from_slice(&a.payload).ok_or(RadioError::Malformed("short transmitter address")))?;
        let data = msg
            .attr(HWSIM_ATTR_FRAME)
            .ok_or(RadioError::MissingAttribute(HWSIM_ATTR_FRAME))?
            .payload
            .to_vec();

        let flags = msg.attr(HWSIM_ATTR_FLAGS).and_then(Attr::as_u32).unwrap_or(0);
        let cookie = msg.attr(HWSIM_ATTR_COOKIE).and_then(Attr::as_u64).unwrap_or(0);
        let freq = msg.attr(HWSIM_ATTR_FREQ).and_then(Attr::as_u32);
        let tx_info = msg
            .attr(HWSIM_ATTR_TX_INFO)
            .map(|a| {
                a.payload
                    .chunks_exact(2)
                    .take(IEEE80211_TX_MAX_RATES)
                    .map(|c| TxRate { idx: c[0] as i8, count: c[1] })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { transmitter, data, flags, tx_info, cookie, freq })
    }

    /// First usable rate index the transmitter asked for.
    pub fn rate_idx(&self) -> i32 {
        self.tx_info
            .iter()
            .find(|r| r.idx >= 0 && r.count > 0)
            .map(|r| i32::from(r.idx))
            .unwrap_or(0)
    }

    pub fn wants_tx_status(&self) -> bool {
        self.flags & HWSIM_TX_CTL_REQ_TX_STATUS != 0
    }

    pub fn no_ack(&self) -> bool {
        self.flags & HWSIM_TX_CTL_NO_ACK != 0
    }
}

pub fn register(family: u16) -> GenlMessage {
    GenlMessage::request(family, HWSIM_CMD_REGISTER, VERSION_NR)
}

/// HWSIM_CMD_FRAME towards the kernel; injects `data` at `receiver`.
pub fn cloned_frame(family: u16, receiver: MacAddr, data: &[u8], rate_idx: i32, signal: i32, freq: u32) -> GenlMessage {
    GenlMessage::request(family, HWSIM_CMD_FRAME, VERSION_NR)
        .with_attr(Attr::new(HWSIM_ATTR_ADDR_RECEIVER, receiver.octets().to_vec()))
        .with_attr(Attr::new(HWSIM_ATTR_FRAME, data.to_vec()))
        .with_attr(Attr::u32(HWSIM_ATTR_RX_RATE, rate_idx as u32))
        .with_attr(Attr::u32(HWSIM_ATTR_FREQ, freq))
        .with_attr(Attr::u32(HWSIM_ATTR_SIGNAL, signal as u32))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStatus {
    pub transmitter: MacAddr,
    pub flags: u32,
    pub signal: i32,
    pub tx_info: Vec<TxRate>,
    pub cookie: u64,
    pub freq: u32,
}

pub fn tx_info_frame(family: u16, status: &TxStatus) -> GenlMessage {
    let mut rates = Vec::with_capacity(IEEE80211_TX_MAX_RATES * 2);
    for i in 0..IEEE80211_TX_MAX_RATES {
        let rate = status.tx_info.get(i).copied().unwrap_or(TxRate { idx: -1, count: 0 });
        rates.push(rate.idx as u8);
        rates.push(rate.count);
    }
    GenlMessage::request(family, HWSIM_CMD_TX_INFO_FRAME, VERSION_NR)
        .with_attr(Attr::new(HWSIM_ATTR_ADDR_TRANSMITTER, status.transmitter.octets().to_vec()))
        .with_attr(Attr::u32(HWSIM_ATTR_FLAGS, status.flags))
        .with_attr(Attr::u32(HWSIM_ATTR_SIGNAL, status.signal as u32))
        .with_attr(Attr::new(HWSIM_ATTR_TX_INFO, rates))
        .with_attr(Attr::u64(HWSIM_ATTR_COOKIE, status.cookie))
        .with_attr(Attr::u32(HWSIM_ATTR_FREQ, status.freq))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILY: u16 = 0x1d;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x42, 0, 0, 0, 0, last])
    }

    fn reparse(msg: &GenlMessage) -> GenlMessage {
        match parse_datagram(&msg.encode()).unwrap().as_slice() {
            [Incoming::Genl(m)] => m.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_register_layout() {
        let bytes = register(FAMILY).encode();
        assert_eq!(bytes.len(), NLMSG_HDRLEN + GENL_HDRLEN);
        assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 20);
        assert_eq!(u16::from_ne_bytes(bytes[4..6].try_into().unwrap()), FAMILY);
        assert_eq!(u16::from_ne_bytes(bytes[6..8].try_into().unwrap()), NLM_F_REQUEST);
        assert_eq!(bytes[16], HWSIM_CMD_REGISTER);
        assert_eq!(bytes[17], VERSION_NR);
    }

    #[test]
    fn test_attribute_padding() {
        // 5 payload bytes -> 9 byte attribute padded to 12
        let msg = GenlMessage::request(FAMILY, HWSIM_CMD_FRAME, VERSION_NR).with_attr(Attr::new(HWSIM_ATTR_FRAME, vec![1, 2, 3, 4, 5]));
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 20 + 12);
        assert_eq!(u16::from_ne_bytes(bytes[20..22].try_into().unwrap()), 9);
        assert_eq!(&bytes[29..32], &[0, 0, 0]);
    }

    #[test]
    fn test_cloned_frame_carries_exact_fields() {
        let payload = vec![0x08, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x01];
        let msg = reparse(&cloned_frame(FAMILY, mac(7), &payload, 3, -61, 2437));

        assert_eq!(msg.cmd, HWSIM_CMD_FRAME);
        assert_eq!(msg.attr(HWSIM_ATTR_ADDR_RECEIVER).unwrap().payload.as_ref(), mac(7).octets());
        assert_eq!(msg.attr(HWSIM_ATTR_FRAME).unwrap().payload.as_ref(), payload.as_slice());
        assert_eq!(msg.attr(HWSIM_ATTR_RX_RATE).unwrap().as_u32(), Some(3));
        assert_eq!(msg.attr(HWSIM_ATTR_SIGNAL).unwrap().as_u32().map(|v| v as i32), Some(-61));
        assert_eq!(msg.attr(HWSIM_ATTR_FREQ).unwrap().as_u32(), Some(2437));
    }

    #[test]
    fn test_frame_notification_parse() {
        let msg = GenlMessage::request(FAMILY, HWSIM_CMD_FRAME, VERSION_NR)
            .with_attr(Attr::new(HWSIM_ATTR_ADDR_TRANSMITTER, mac(1).octets().to_vec()))
            .with_attr(Attr::new(HWSIM_ATTR_FRAME, vec![0u8; 30]))
            .with_attr(Attr::u32(HWSIM_ATTR_FLAGS, HWSIM_TX_CTL_REQ_TX_STATUS))
            .with_attr(Attr::new(HWSIM_ATTR_TX_INFO, vec![0xff, 0, 5, 2, 1, 1, 0xff, 0]))
            .with_attr(Attr::u64(HWSIM_ATTR_COOKIE, 0xabcdef))
            .with_attr(Attr::u32(HWSIM_ATTR_FREQ, 5180));

        let notification = FrameNotification::from_genl(&reparse(&msg)).unwrap();
        assert_eq!(notification.transmitter, mac(1));
        assert_eq!(notification.data.len(), 30);
        assert!(notification.wants_tx_status());
        assert!(!notification.no_ack());
        assert_eq!(notification.rate_idx(), 5);
        assert_eq!(notification.cookie, 0xabcdef);
        assert_eq!(notification.freq, Some(5180));
    }

    #[test]
    fn test_frame_notification_missing_fields() {
        let no_frame = GenlMessage::request(FAMILY, HWSIM_CMD_FRAME, VERSION_NR)
            .with_attr(Attr::new(HWSIM_ATTR_ADDR_TRANSMITTER, mac(1).octets().to_vec()));
        assert!(matches!(
            FrameNotification::from_genl(&no_frame),
            Err(RadioError::MissingAttribute(HWSIM_ATTR_FRAME))
        ));

        let short_addr = GenlMessage::request(FAMILY, HWSIM_CMD_FRAME, VERSION_NR)
            .with_attr(Attr::new(HWSIM_ATTR_ADDR_TRANSMITTER, vec![1, 2, 3]))
            .with_attr(Attr::new(HWSIM_ATTR_FRAME, vec![0u8; 30]));
        assert!(matches!(FrameNotification::from_genl(&short_addr), Err(RadioError::Malformed(_))));
    }

    #[test]
    fn test_parse_error_and_ack() {
        let mut buf = BytesMut::new();
        buf.put_u32_ne(36);
        buf.put_u16_ne(NLMSG_ERROR);
        buf.put_u16_ne(0);
        buf.put_u32_ne(9);
        buf.put_u32_ne(0);
        buf.put_i32_ne(-19);
        // echoed request header
        buf.put_u32_ne(20);
        buf.put_u16_ne(FAMILY);
        buf.put_u16_ne(NLM_F_REQUEST);
        buf.put_u32_ne(7);
        buf.put_u32_ne(0);

        let parsed = parse_datagram(&buf).unwrap();
        assert_eq!(parsed, vec![Incoming::Error { errno: 19, seq: 7 }]);
    }

    #[test]
    fn test_parse_error_with_extreme_errno() {
        let mut buf = BytesMut::new();
        buf.put_u32_ne(20);
        buf.put_u16_ne(NLMSG_ERROR);
        buf.put_u16_ne(0);
        buf.put_u32_ne(3);
        buf.put_u32_ne(0);
        buf.put_i32_ne(i32::MIN);

        let parsed = parse_datagram(&buf).unwrap();
        assert_eq!(parsed, vec![Incoming::Error { errno: i32::MIN, seq: 3 }]);
    }

    #[test]
    fn test_parse_multiple_messages() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&register(FAMILY).encode());
        buf.extend_from_slice(&cloned_frame(FAMILY, mac(2), &[1, 2, 3], 0, -40, 2412).encode());
        let parsed = parse_datagram(&buf).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_truncated_message_rejected() {
        let bytes = cloned_frame(FAMILY, mac(2), &[1, 2, 3], 0, -40, 2412).encode();
        assert!(parse_datagram(&bytes[..bytes.len() - 8]).is_err());
    }

    #[test]
    fn test_family_id_from_reply() {
        let reply = GenlMessage::request(GENL_ID_CTRL, 1, 2)
            .with_attr(Attr::new(CTRL_ATTR_FAMILY_NAME, b"MAC80211_HWSIM\0".to_vec()))
            .with_attr(Attr::new(CTRL_ATTR_FAMILY_ID, 0x22u16.to_ne_bytes().to_vec()));
        assert_eq!(family_id(&reparse(&reply)).unwrap(), 0x22);

        let request = reparse(&get_family(HWSIM_FAMILY_NAME));
        assert_eq!(request.family, GENL_ID_CTRL);
        assert_eq!(request.attr(CTRL_ATTR_FAMILY_NAME).unwrap().payload.as_ref(), b"MAC80211_HWSIM\0");
    }

    #[test]
    fn test_tx_info_frame_pads_rates() {
        let status = TxStatus {
            transmitter: mac(1),
            flags: HWSIM_TX_CTL_REQ_TX_STATUS | HWSIM_TX_STAT_ACK,
            signal: -50,
            tx_info: vec![TxRate { idx: 2, count: 1 }],
            cookie: 42,
            freq: 2412,
        };
        let msg = reparse(&tx_info_frame(FAMILY, &status));
        assert_eq!(msg.cmd, HWSIM_CMD_TX_INFO_FRAME);
        assert_eq!(msg.attr(HWSIM_ATTR_TX_INFO).unwrap().payload.as_ref(), &[2, 1, 0xff, 0, 0xff, 0, 0xff, 0]);
        assert_eq!(msg.attr(HWSIM_ATTR_COOKIE).unwrap().as_u64(), Some(42));
    }
}

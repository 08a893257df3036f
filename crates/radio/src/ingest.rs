//! Side-channel ingestion of pre-built frames over UDP.
//!
//! Each datagram is one fixed-size record, little endian:
//!
//! ```text
//! offset  size  field
//!      0     6  target radio address
//!      6  2048  frame bytes (only `data_len` are meaningful)
//!   2054     2  padding
//!   2056     4  data_len  (i32)
//!   2060     4  rate_idx  (i32)
//!   2064     4  signal    (i32)
//!   2068     4  freq      (i32)
//! ```
//!
//! The listener thread only decodes and forwards; radio matching and relaying
//! happen on the reactor.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};

use bytes::{Buf, BufMut};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use wmedium_core::{MacAddr, ETH_ALEN};

use crate::RadioError;

pub const SIDE_CHANNEL_PORT: u16 = 8080;
pub const MAX_FRAME_LEN: usize = 2048;
pub const RECORD_LEN: usize = 2072;
const DATA_OFFSET: usize = ETH_ALEN;
const FIELDS_OFFSET: usize = 2056;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub hwaddr: MacAddr,
    pub data: Vec<u8>,
    pub rate_idx: i32,
    pub signal: i32,
    pub freq: u32,
}

impl DeliveryRequest {
    pub fn decode(record: &[u8]) -> Result<Self, RadioError> {
        if record.len() < RECORD_LEN {
            return Err(RadioError::TruncatedRecord(record.len()));
        }
        let hwaddr = MacAddr::from_slice(&record[..ETH_ALEN]).ok_or(RadioError::TruncatedRecord(record.len()))?;

        let mut fields = &record[FIELDS_OFFSET..RECORD_LEN];
        let data_len = fields.get_i32_le();
        let rate_idx = fields.get_i32_le();
        let signal = fields.get_i32_le();
        let freq = fields.get_i32_le();

        if data_len < 0 || data_len as usize > MAX_FRAME_LEN {
            return Err(RadioError::Malformed("side-channel data_len out of range"));
        }
        if freq < 0 {
            return Err(RadioError::Malformed("side-channel negative frequency"));
        }
        let data = record[DATA_OFFSET..DATA_OFFSET + data_len as usize].to_vec();

        Ok(Self {
            hwaddr,
            data,
            rate_idx,
            signal,
            freq: freq as u32,
        })
    }

    /// Frames longer than the record capacity are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.data.len().min(MAX_FRAME_LEN);
        let mut record = Vec::with_capacity(RECORD_LEN);
        record.put_slice(self.hwaddr.octets());
        record.put_slice(&self.data[..len]);
        record.put_bytes(0, FIELDS_OFFSET - record.len());
        record.put_i32_le(len as i32);
        record.put_i32_le(self.rate_idx);
        record.put_i32_le(self.signal);
        record.put_i32_le(self.freq as i32);
        record
    }
}

/// Binds the listener and starts its thread. Binding errors are returned so
/// startup can fail; later receive errors are only logged.
pub fn spawn_listener(port: u16, requests: mpsc::Sender<DeliveryRequest>) -> Result<(SocketAddr, JoinHandle<()>), RadioError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    let local = socket.local_addr()?;
    info!("Side-channel listening on {}", local);

    let handle = thread::Builder::new()
        .name("side-channel".to_string())
        .spawn(move || serve(socket, requests))?;
    Ok((local, handle))
}

fn serve(socket: UdpSocket, requests: mpsc::Sender<DeliveryRequest>) {
    let mut buf = vec![0u8; RECORD_LEN];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) => {
                warn!("Side-channel receive failed: {}", e);
                continue;
            }
        };
        let request = match DeliveryRequest::decode(&buf[..n]) {
            Ok(r) => r,
            Err(e) => {
                warn!("Discarding side-channel record from {}: {}", peer, e);
                continue;
            }
        };
        debug!("Side-channel request from {} for radio {} ({} bytes)", peer, request.hwaddr, request.data.len());
        if requests.blocking_send(request).is_err() {
            info!("Reactor gone, stopping side-channel listener");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            hwaddr: MacAddr([0x42, 0, 0, 0, 1, 0]),
            data: vec![0x08, 0x01, 0x02, 0x03],
            rate_idx: 7,
            signal: -55,
            freq: 2462,
        }
    }

    #[test]
    fn test_record_layout() {
        let record = request().encode();
        assert_eq!(record.len(), RECORD_LEN);
        assert_eq!(&record[..6], &[0x42, 0, 0, 0, 1, 0]);
        assert_eq!(&record[6..10], &[0x08, 0x01, 0x02, 0x03]);
        assert_eq!(i32::from_le_bytes(record[2056..2060].try_into().unwrap()), 4);
        assert_eq!(i32::from_le_bytes(record[2064..2068].try_into().unwrap()), -55);
        assert_eq!(DeliveryRequest::decode(&record).unwrap(), request());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let record = request().encode();
        assert!(matches!(
            DeliveryRequest::decode(&record[..100]),
            Err(RadioError::TruncatedRecord(100))
        ));
    }

    #[test]
    fn test_bad_length_rejected() {
        let mut record = request().encode();
        record[2056..2060].copy_from_slice(&5000i32.to_le_bytes());
        assert!(matches!(DeliveryRequest::decode(&record), Err(RadioError::Malformed(_))));
        record[2056..2060].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(DeliveryRequest::decode(&record).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_listener_forwards_valid_records() {
        let (tx, mut rx) = mpsc::channel(4);
        let (local, _handle) = spawn_listener(0, tx).unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let target = (Ipv4Addr::LOCALHOST, local.port());
        sender.send_to(&[1, 2, 3], target).unwrap();
        sender.send_to(&request().encode(), target).unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, request());
    }
}

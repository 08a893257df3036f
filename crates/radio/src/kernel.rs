//! Kernel relay: the hwsim command set on top of a [`KernelLink`]

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, trace};
use wmedium_core::{MacAddr, Station};

use crate::netlink::{self, GenlMessage, Incoming, TxStatus};
use crate::RadioError;

/// Transport to the kernel module. Sequence numbers are assigned by the link.
#[async_trait]
pub trait KernelLink: Send + Sync {
    /// Resolved id of the hwsim generic netlink family.
    fn family_id(&self) -> u16;

    async fn send(&self, msg: GenlMessage) -> Result<(), RadioError>;

    /// Waits for the next datagram and returns the messages it carries.
    async fn recv(&self) -> Result<Vec<Incoming>, RadioError>;
}

#[derive(Clone)]
pub struct HwsimRelay {
    link: Arc<dyn KernelLink>,
}

impl HwsimRelay {
    pub fn new(link: Arc<dyn KernelLink>) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &Arc<dyn KernelLink> {
        &self.link
    }

    /// Asks the kernel to start forwarding frames to us.
    pub async fn register(&self) -> Result<(), RadioError> {
        self.link.send(netlink::register(self.link.family_id())).await
    }

    /// Injects a frame at `dst`. Best effort: failures are logged and the
    /// frame is gone.
    pub async fn send_cloned_frame(&self, dst: &Station, data: &[u8], rate_idx: i32, signal: i32, freq: u32) -> bool {
        self.send_to_radio(dst.addr, dst.hwaddr, data, rate_idx, signal, freq).await
    }

    pub async fn send_to_radio(&self, addr: MacAddr, hwaddr: MacAddr, data: &[u8], rate_idx: i32, signal: i32, freq: u32) -> bool {
        let msg = netlink::cloned_frame(self.link.family_id(), hwaddr, data, rate_idx, signal, freq);
        debug!("cloned msg dest {} (radio: {}) len {}", addr, hwaddr, data.len());
        match self.link.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to relay frame to {} (radio: {}): {}", addr, hwaddr, e);
                false
            }
        }
    }

    pub async fn send_tx_status(&self, status: &TxStatus) -> bool {
        trace!("tx status for {} cookie {} flags {:#x}", status.transmitter, status.cookie, status.flags);
        match self.link.send(netlink::tx_info_frame(self.link.family_id(), status)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to report tx status to {}: {}", status.transmitter, e);
                false
            }
        }
    }

    pub async fn recv(&self) -> Result<Vec<Incoming>, RadioError> {
        self.link.recv().await
    }
}

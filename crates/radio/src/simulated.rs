//! In-memory kernel link for testing

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use log::trace;
use tokio::sync::{mpsc, Mutex};

use crate::kernel::KernelLink;
use crate::netlink::{GenlMessage, Incoming};
use crate::RadioError;

pub const SIMULATED_FAMILY_ID: u16 = 0x1d;

/// Records every message sent to the "kernel" and replays injected ones.
pub struct SimulatedKernel {
    sent: Mutex<Vec<GenlMessage>>,
    inbox_tx: mpsc::UnboundedSender<Vec<Incoming>>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Vec<Incoming>>>,
    fail_sends: AtomicBool,
    seq: AtomicU32,
}

impl SimulatedKernel {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            fail_sends: AtomicBool::new(false),
            seq: AtomicU32::new(1),
        }
    }

    /// Queues messages for the next `recv`.
    pub fn inject(&self, messages: Vec<Incoming>) {
        let _ = self.inbox_tx.send(messages);
    }

    /// Makes every following send fail with an I/O error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<GenlMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn take_sent(&self) -> Vec<GenlMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KernelLink for SimulatedKernel {
    fn family_id(&self) -> u16 {
        SIMULATED_FAMILY_ID
    }

    async fn send(&self, mut msg: GenlMessage) -> Result<(), RadioError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RadioError::Io(std::io::Error::new(std::io::ErrorKind::Other, "simulated send failure")));
        }
        msg.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        trace!("Simulated kernel received cmd {} ({} attrs)", msg.cmd, msg.attrs.len());
        self.sent.lock().await.push(msg);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<Incoming>, RadioError> {
        match self.inbox_rx.lock().await.recv().await {
            Some(messages) => Ok(messages),
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{register, HWSIM_CMD_REGISTER};

    #[tokio::test]
    async fn test_records_and_fails_sends() {
        let kernel = SimulatedKernel::new();
        kernel.send(register(SIMULATED_FAMILY_ID)).await.unwrap();

        kernel.set_fail_sends(true);
        assert!(matches!(kernel.send(register(SIMULATED_FAMILY_ID)).await, Err(RadioError::Io(_))));

        let sent = kernel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cmd, HWSIM_CMD_REGISTER);
    }

    #[tokio::test]
    async fn test_injected_messages_are_received() {
        let kernel = SimulatedKernel::new();
        kernel.inject(vec![Incoming::Done]);
        assert_eq!(kernel.recv().await.unwrap(), vec![Incoming::Done]);
    }

    #[test]
    fn test_recv_pends_until_injected() {
        let kernel = SimulatedKernel::new();
        let mut recv = tokio_test::task::spawn(kernel.recv());
        tokio_test::assert_pending!(recv.poll());

        kernel.inject(vec![Incoming::Done]);
        assert!(recv.is_woken());
        let messages = tokio_test::assert_ready_ok!(recv.poll());
        assert_eq!(messages, vec![Incoming::Done]);
    }
}

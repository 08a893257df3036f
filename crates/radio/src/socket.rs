//! `NETLINK_GENERIC` socket driven by the tokio reactor

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::kernel::KernelLink;
use crate::netlink::{self, GenlMessage, Incoming, GENL_ID_CTRL};
use crate::RadioError;

const RECV_BUF_LEN: usize = 64 * 1024;

pub struct NetlinkLink {
    fd: AsyncFd<OwnedFd>,
    family_id: u16,
    seq: AtomicU32,
}

fn open_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain syscalls; the descriptor is owned by the returned OwnedFd.
    unsafe {
        let fd = libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            libc::NETLINK_GENERIC,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = OwnedFd::from_raw_fd(fd);

        let mut addr: libc::sockaddr_nl = std::mem::zeroed();
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let ret = libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        );
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }
}

impl NetlinkLink {
    /// Connects a generic netlink socket and resolves `family`.
    pub async fn connect(family: &str) -> Result<Self, RadioError> {
        let fd = AsyncFd::with_interest(open_socket()?, Interest::READABLE | Interest::WRITABLE)?;
        let mut link = Self {
            fd,
            family_id: 0,
            seq: AtomicU32::new(1),
        };

        let seq = link.send_raw(netlink::get_family(family)).await?;
        loop {
            for incoming in link.recv_raw().await? {
                match incoming {
                    Incoming::Genl(reply) if reply.family == GENL_ID_CTRL && reply.seq == seq => {
                        link.family_id = netlink::family_id(&reply)?;
                        info!("Resolved generic netlink family {} to id {}", family, link.family_id);
                        return Ok(link);
                    }
                    Incoming::Error { errno, seq: err_seq } if errno != 0 && err_seq == seq => {
                        debug!("nl: family lookup seq {}: {}", seq, io::Error::from_raw_os_error(errno));
                        return Err(RadioError::FamilyNotRegistered(family.to_string()));
                    }
                    _ => {}
                }
            }
        }
    }

    async fn send_raw(&self, mut msg: GenlMessage) -> Result<u32, RadioError> {
        msg.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let bytes = msg.encode();
        loop {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: `bytes` outlives the call and the length matches.
                let ret = unsafe { libc::send(inner.as_raw_fd(), bytes.as_ptr() as *const libc::c_void, bytes.len(), 0) };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            });
            match result {
                Ok(Ok(_)) => return Ok(msg.seq),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_raw(&self) -> Result<Vec<Incoming>, RadioError> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: writes at most `buf.len()` bytes into `buf`.
                let ret = unsafe { libc::recv(inner.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            });
            match result {
                Ok(Ok(n)) => return netlink::parse_datagram(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl KernelLink for NetlinkLink {
    fn family_id(&self) -> u16 {
        self.family_id
    }

    async fn send(&self, msg: GenlMessage) -> Result<(), RadioError> {
        self.send_raw(msg).await.map(|_| ())
    }

    async fn recv(&self) -> Result<Vec<Incoming>, RadioError> {
        self.recv_raw().await
    }
}

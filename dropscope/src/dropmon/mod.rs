//! Kernel drop-monitor event channel
//!
//! Owns one `NETLINK_GENERIC` socket speaking to the kernel's `NET_DM`
//! family. The session moves through open (family resolution) → start
//! (multicast join + `START` request) → drain → stop, and the socket is
//! released unconditionally on drop. All wire-format work lives in
//! [`wire`]; this module is the syscall glue around it.

#![allow(unsafe_code)] // raw netlink socket syscalls require unsafe

pub mod wire;

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::{debug, trace};

use crate::domain::{ChannelError, DropEvent};

/// Per-recv buffer; comfortably holds the kernel's largest alert batches.
const RECV_BUF_SIZE: usize = 64 * 1024;

/// Drop-monitor channel session.
///
/// The request sequence number increases monotonically across control
/// requests; acknowledgments come back through the normal receive path and
/// are consumed by the datagram walk.
pub struct DropMonitor {
    fd: OwnedFd,
    family: u16,
    seq: u32,
    recv_buf: Vec<u8>,
}

impl DropMonitor {
    /// Allocate the socket and resolve the `NET_DM` family id.
    ///
    /// # Errors
    /// Socket allocation, bind, or family-resolution failure leaves no
    /// session behind; partially acquired resources are released.
    pub fn open() -> Result<Self, ChannelError> {
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_GENERIC,
            )
        };
        if raw < 0 {
            return Err(ChannelError::Socket(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(ChannelError::Socket(io::Error::last_os_error()));
        }

        let mut monitor =
            Self { fd, family: 0, seq: 1, recv_buf: vec![0u8; RECV_BUF_SIZE] };
        monitor.family = monitor.resolve_family(wire::NET_DM_FAMILY_NAME)?;
        debug!("drop monitor family {:?} = {}", wire::NET_DM_FAMILY_NAME, monitor.family);
        Ok(monitor)
    }

    /// Numeric id the kernel assigned to the drop-monitor family.
    #[must_use]
    pub fn family(&self) -> u16 {
        self.family
    }

    /// Join the alert group, switch to non-blocking, and request `START`.
    ///
    /// Success means the request was transmitted; the acknowledgment is
    /// not waited for here.
    ///
    /// # Errors
    /// Any syscall failure; the session is unusable afterwards.
    pub fn start(&mut self) -> Result<(), ChannelError> {
        self.join_group(wire::NET_DM_GRP_ALERT)?;
        self.set_nonblocking()?;
        self.send_command(wire::NET_DM_CMD_START, wire::NLM_F_REQUEST | wire::NLM_F_ACK)
    }

    /// Request `STOP`. Best-effort: shutdown proceeds regardless.
    ///
    /// # Errors
    /// Send failure, for the caller's diagnostics only.
    pub fn stop(&mut self) -> Result<(), ChannelError> {
        self.send_command(wire::NET_DM_CMD_STOP, wire::NLM_F_REQUEST | wire::NLM_F_ACK)
    }

    /// Drain every datagram currently queued on the socket and decode the
    /// accumulated messages into drop events.
    ///
    /// # Errors
    /// A receive failure other than "would block" (ends the drain
    /// normally) or "interrupted" (retried) is fatal for the channel.
    pub fn receive(&mut self) -> Result<Vec<DropEvent>, ChannelError> {
        let mut events = Vec::new();
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.recv_buf.as_mut_ptr().cast(),
                    self.recv_buf.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EAGAIN | libc::EWOULDBLOCK) => break,
                    _ => return Err(ChannelError::Receive(err)),
                }
            }
            if n == 0 {
                break;
            }
            #[allow(clippy::cast_sign_loss)]
            let datagram = &self.recv_buf[..n as usize];
            trace!("received {} bytes", datagram.len());
            wire::decode_datagram(datagram, self.family, &mut events);
        }
        Ok(events)
    }

    fn resolve_family(&mut self, name: &str) -> Result<u16, ChannelError> {
        let request = wire::family_request(self.seq, name);
        self.send_raw(&request)?;
        self.seq += 1;

        let n = loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.recv_buf.as_mut_ptr().cast(),
                    self.recv_buf.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(ChannelError::Receive(err));
            }
            break n;
        };

        #[allow(clippy::cast_sign_loss)]
        let reply = &self.recv_buf[..n as usize];
        wire::parse_family_id(reply).ok_or_else(|| ChannelError::FamilyNotFound(name.to_string()))
    }

    fn send_command(&mut self, cmd: u8, flags: u16) -> Result<(), ChannelError> {
        let request = wire::genl_request(self.family, flags, self.seq, cmd);
        self.send_raw(&request)?;
        self.seq += 1;
        Ok(())
    }

    fn send_raw(&self, buf: &[u8]) -> Result<(), ChannelError> {
        let n = unsafe { libc::send(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(ChannelError::Send(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn join_group(&self, group: u32) -> Result<(), ChannelError> {
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_NETLINK,
                libc::NETLINK_ADD_MEMBERSHIP,
                std::ptr::addr_of!(group).cast(),
                mem::size_of::<u32>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(ChannelError::Socket(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn set_nonblocking(&self) -> Result<(), ChannelError> {
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(ChannelError::Socket(io::Error::last_os_error()));
        }
        let rc =
            unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(ChannelError::Socket(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl AsRawFd for DropMonitor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

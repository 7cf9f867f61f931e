// AF_PACKET raw socket bound to a single interface.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::InterceptorError;
use crate::net::interface::Interface;

use super::LinkSocket;

// ---------------------------------------------------------------------------
// AF_PACKET constants
// ---------------------------------------------------------------------------

const ETH_P_ALL: u16 = 0x0003;

/// How long a send keeps retrying while the kernel queue is full.
const SEND_RETRY_BUDGET: Duration = Duration::from_millis(250);

const PERMISSION_HINT: &str =
    "raw packet sockets require root or CAP_NET_RAW (run with sudo)";

/// Non-blocking AF_PACKET socket. Drop closes the fd via OwnedFd.
pub struct AfPacketSocket {
    fd: OwnedFd,
    interface: String,
}

impl AfPacketSocket {
    /// Open a raw socket and bind it to `iface`.
    pub fn open(iface: &Interface) -> Result<Self, InterceptorError> {
        let fd = open_raw_socket()?;

        let if_index = if iface.index != 0 {
            iface.index
        } else {
            if_nametoindex(&iface.name)?
        };

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = ETH_P_ALL.to_be();
        sll.sll_ifindex = if_index as i32;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(InterceptorError::Socket {
                interface: iface.name.clone(),
                source: io::Error::last_os_error(),
            });
        }

        log::debug!("AF_PACKET socket on {} (if_index={})", iface.name, if_index);

        Ok(Self {
            fd,
            interface: iface.name.clone(),
        })
    }

    fn socket_error(&self, source: io::Error) -> InterceptorError {
        InterceptorError::Socket {
            interface: self.interface.clone(),
            source,
        }
    }
}

impl LinkSocket for AfPacketSocket {
    fn interface_name(&self) -> &str {
        &self.interface
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), InterceptorError> {
        let fd = self.fd.as_raw_fd();
        let sent = retry_send(SEND_RETRY_BUDGET, || {
            let n = unsafe {
                libc::send(fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0)
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });
        let n = sent.map_err(|e| self.socket_error(e))?;
        if n != frame.len() {
            return Err(self.socket_error(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {n} of {} bytes", frame.len()),
            )));
        }
        Ok(())
    }

    fn try_recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, InterceptorError> {
        let n = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(self.socket_error(err)),
            };
        }
        Ok(Some(n as usize))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A full socket queue, not a failure of the link.
fn is_transient_send(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::ENOBUFS)
}

/// Repeat `attempt` while it fails transiently and `budget` has not run out.
fn retry_send(
    budget: Duration,
    mut attempt: impl FnMut() -> io::Result<usize>,
) -> io::Result<usize> {
    let start = Instant::now();
    loop {
        match attempt() {
            Err(e) if is_transient_send(&e) && start.elapsed() < budget => {
                log::trace!("send deferred: {e}");
                thread::sleep(Duration::from_micros(200));
            }
            result => return result,
        }
    }
}

fn open_raw_socket() -> Result<OwnedFd, InterceptorError> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            (ETH_P_ALL as u32).to_be() as i32,
        )
    };
    if fd < 0 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => {
                InterceptorError::SocketPermission(PERMISSION_HINT.to_string())
            }
            _ => InterceptorError::Fatal(format!("socket(AF_PACKET) failed: {err}")),
        });
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Check whether raw packet sockets can be opened by this process.
pub fn check_raw_access() -> Result<(), InterceptorError> {
    open_raw_socket().map(drop)
}

fn if_nametoindex(name: &str) -> Result<u32, InterceptorError> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| InterceptorError::Interface(format!("invalid interface name: {name}")))?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(InterceptorError::Interface(format!(
            "interface {name} not found: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_send_retries_full_queue() {
        let mut calls = 0;
        let result = retry_send(Duration::from_secs(1), || {
            calls += 1;
            match calls {
                1 => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
                2 => Err(io::Error::from_raw_os_error(libc::ENOBUFS)),
                _ => Ok(60),
            }
        });
        assert_eq!(result.unwrap(), 60);
        assert_eq!(calls, 3);
    }

    #[test]
    fn ut_send_gives_up_after_budget() {
        let start = Instant::now();
        let result = retry_send(Duration::from_millis(20), || {
            Err(io::Error::from_raw_os_error(libc::ENOBUFS))
        });
        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::ENOBUFS));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn ut_send_hard_error_is_immediate() {
        let mut calls = 0;
        let result = retry_send(Duration::from_secs(1), || {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::ENETDOWN))
        });
        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::ENETDOWN));
        assert_eq!(calls, 1);
    }
}

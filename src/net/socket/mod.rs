// Layered raw-socket I/O.
//
// Layer 1 moves raw frames, layer 2 adds Ethernet framing, layer 3 adds IPv4
// with next-hop resolution. Every receive shares one busy-poll loop over a
// non-blocking `LinkSocket`, bounded by elapsed time and cancellation.

#[cfg(target_os = "linux")]
pub mod afpacket;
pub mod layer1;
pub mod layer2;
pub mod layer3;
mod memory;

use std::time::{Duration, Instant};

use crate::error::InterceptorError;
use crate::task::CancelToken;

#[cfg(target_os = "linux")]
pub use afpacket::AfPacketSocket;
pub use memory::MemoryLink;

/// Largest frame a receive can return.
pub const MAX_FRAME: usize = 65536;

/// A raw link-layer handle bound to one interface.
pub trait LinkSocket {
    fn interface_name(&self) -> &str;

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), InterceptorError>;

    /// Non-blocking read into `buf`. `Ok(None)` means nothing is queued.
    fn try_recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, InterceptorError>;
}

impl<S: LinkSocket + ?Sized> LinkSocket for Box<S> {
    fn interface_name(&self) -> &str {
        (**self).interface_name()
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), InterceptorError> {
        (**self).send_frame(frame)
    }

    fn try_recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, InterceptorError> {
        (**self).try_recv_frame(buf)
    }
}

/// Bounds for a receive call.
#[derive(Debug, Clone)]
pub struct RecvParams {
    /// Stop after this many accepted frames.
    pub count: usize,
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl RecvParams {
    pub fn new(count: usize, timeout: Duration) -> Self {
        Self {
            count,
            timeout,
            cancel: None,
        }
    }

    pub fn one(timeout: Duration) -> Self {
        Self::new(1, timeout)
    }

    /// Receive until cancelled, effectively without count or time limit.
    pub fn until_cancelled(token: CancelToken) -> Self {
        Self {
            count: usize::MAX,
            timeout: Duration::MAX,
            cancel: Some(token),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl Default for RecvParams {
    fn default() -> Self {
        Self::one(Duration::from_secs(5))
    }
}

/// Busy-poll `sock` until `params.count` frames are accepted, the timeout
/// elapses or the token is cancelled. `accept` maps a raw frame to a result
/// or rejects it; rejected frames do not count.
pub(crate) fn poll_frames<S, T, F>(
    sock: &mut S,
    params: &RecvParams,
    mut accept: F,
) -> Result<Vec<T>, InterceptorError>
where
    S: LinkSocket + ?Sized,
    F: FnMut(&[u8]) -> Option<T>,
{
    let mut buf = vec![0u8; MAX_FRAME];
    let mut matched = Vec::new();
    let start = Instant::now();

    while matched.len() < params.count && start.elapsed() < params.timeout {
        if params.cancelled() {
            log::debug!("receive on {} cancelled", sock.interface_name());
            break;
        }
        match sock.try_recv_frame(&mut buf)? {
            Some(n) => {
                if let Some(item) = accept(&buf[..n]) {
                    matched.push(item);
                }
            }
            None => std::hint::spin_loop(),
        }
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_poll_collects_up_to_count() {
        let mut link = MemoryLink::new("mock0");
        for i in 0..5u8 {
            link.push_inbound(vec![i; 3]);
        }
        let got = poll_frames(&mut link, &RecvParams::new(2, Duration::from_secs(1)), |f| {
            (f[0] % 2 == 1).then_some(f[0])
        })
        .unwrap();
        assert_eq!(got, vec![1, 3]);
    }

    #[test]
    fn ut_poll_times_out_with_partial_result() {
        let mut link = MemoryLink::new("mock0");
        link.push_inbound(vec![7]);
        let start = Instant::now();
        let got = poll_frames(
            &mut link,
            &RecvParams::new(3, Duration::from_millis(50)),
            |f| Some(f.to_vec()),
        )
        .unwrap();
        assert_eq!(got, vec![vec![7]]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn ut_poll_stops_on_cancel() {
        let token = CancelToken::new();
        token.cancel();
        let mut link = MemoryLink::new("mock0");
        link.push_inbound(vec![1]);
        let got = poll_frames(
            &mut link,
            &RecvParams::until_cancelled(token),
            |f| Some(f.len()),
        )
        .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn ut_poll_surfaces_socket_error() {
        let mut link = MemoryLink::new("mock0");
        link.fail_next_recv("link down");
        let err = poll_frames(&mut link, &RecvParams::default(), |_| Some(())).unwrap_err();
        assert!(matches!(err, InterceptorError::Socket { .. }));
    }
}

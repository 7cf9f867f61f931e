// Layer 1: raw frames on a bound interface.

use crate::error::InterceptorError;
use crate::net::interface::Interface;

use super::{LinkSocket, RecvParams, poll_frames};

/// Open a raw handle on `iface` for reuse across calls.
pub fn open(iface: &Interface) -> Result<Box<dyn LinkSocket + Send>, InterceptorError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(super::AfPacketSocket::open(iface)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(InterceptorError::Interface(format!(
            "raw sockets on {} are only supported on Linux",
            iface.name
        )))
    }
}

pub fn send<S: LinkSocket + ?Sized>(sock: &mut S, frame: &[u8]) -> Result<(), InterceptorError> {
    log::trace!("L1 send {} bytes on {}", frame.len(), sock.interface_name());
    sock.send_frame(frame)
}

/// Send one frame on a handle opened for this call only.
pub fn send_once(iface: &Interface, frame: &[u8]) -> Result<(), InterceptorError> {
    let mut sock = open(iface)?;
    send(&mut sock, frame)
}

/// Receive raw frames accepted by `filter`.
pub fn recv<S, F>(
    sock: &mut S,
    params: &RecvParams,
    mut filter: F,
) -> Result<Vec<Vec<u8>>, InterceptorError>
where
    S: LinkSocket + ?Sized,
    F: FnMut(&[u8]) -> bool,
{
    poll_frames(sock, params, |raw| filter(raw).then(|| raw.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::MemoryLink;
    use std::time::Duration;

    #[test]
    fn ut_l1_send_and_filtered_recv() {
        let mut link = MemoryLink::new("mock0");
        send(&mut link, &[1, 2, 3]).unwrap();
        assert_eq!(link.sent(), &[vec![1, 2, 3]]);

        link.push_inbound(vec![0xAA]);
        link.push_inbound(vec![0xBB, 0xBB]);
        let got = recv(&mut link, &RecvParams::one(Duration::from_millis(100)), |f| {
            f.len() == 2
        })
        .unwrap();
        assert_eq!(got, vec![vec![0xBB, 0xBB]]);
    }
}

// Layer 2: Ethernet framing over layer 1.

use crate::error::InterceptorError;
use crate::net::addr::MacAddress;
use crate::net::interface::Interface;
use crate::net::protocols::EthernetFrame;

use super::{LinkSocket, RecvParams, layer1, poll_frames};

/// Frame `payload` from the interface's own MAC to `target`.
pub fn send<S: LinkSocket + ?Sized>(
    sock: &mut S,
    iface: &Interface,
    target: MacAddress,
    ethertype: u16,
    payload: &[u8],
) -> Result<(), InterceptorError> {
    send_as(sock, iface.require_mac()?, target, ethertype, payload)
}

/// Frame `payload` with an explicit source MAC.
pub fn send_as<S: LinkSocket + ?Sized>(
    sock: &mut S,
    source: MacAddress,
    target: MacAddress,
    ethertype: u16,
    payload: &[u8],
) -> Result<(), InterceptorError> {
    let frame = EthernetFrame::new(target, source, ethertype, payload.to_vec());
    layer1::send(sock, &frame.encode())
}

/// Receive frames whose parsed header is accepted by `filter`. Runt
/// frames are skipped.
pub fn recv<S, F>(
    sock: &mut S,
    params: &RecvParams,
    mut filter: F,
) -> Result<Vec<EthernetFrame>, InterceptorError>
where
    S: LinkSocket + ?Sized,
    F: FnMut(&EthernetFrame) -> bool,
{
    poll_frames(sock, params, |raw| {
        let frame = EthernetFrame::decode(raw).ok()?;
        filter(&frame).then_some(frame)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocols::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
    use crate::net::socket::MemoryLink;
    use std::time::Duration;

    const OURS: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const PEER: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 2]);

    fn iface() -> Interface {
        Interface {
            name: "mock0".into(),
            mac: Some(OURS),
            ..Default::default()
        }
    }

    #[test]
    fn ut_l2_send_uses_interface_mac() {
        let mut link = MemoryLink::new("mock0");
        send(&mut link, &iface(), PEER, ETHERTYPE_ARP, b"hi").unwrap();
        let frame = EthernetFrame::decode(&link.sent()[0]).unwrap();
        assert_eq!(frame.src, OURS);
        assert_eq!(frame.dst, PEER);
        assert_eq!(frame.ethertype, ETHERTYPE_ARP);
        assert_eq!(frame.payload, b"hi");
    }

    #[test]
    fn ut_l2_recv_skips_runts_and_filters() {
        let mut link = MemoryLink::new("mock0");
        link.push_inbound(vec![0; 5]);
        link.push_inbound(EthernetFrame::new(OURS, PEER, ETHERTYPE_ARP, vec![]).encode());
        link.push_inbound(EthernetFrame::new(OURS, PEER, ETHERTYPE_IPV4, vec![9]).encode());
        let got = recv(&mut link, &RecvParams::new(5, Duration::from_millis(50)), |f| {
            f.ethertype == ETHERTYPE_IPV4
        })
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, vec![9]);
    }
}

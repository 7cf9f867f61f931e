// Layer 3: IPv4 over layer 2 with ARP next-hop resolution.

use std::time::Duration;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};
use crate::net::interface::Interface;
use crate::net::protocols::{ETHERTYPE_IPV4, EthernetFrame, Ipv4Packet};
use crate::net::resolver::ArpResolver;

use super::{LinkSocket, RecvParams, layer2, poll_frames};

/// An IPv4 packet with the link addresses it was framed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub packet: Ipv4Packet,
}

/// Send `payload` as an IPv4 packet from the interface's address.
pub fn send<S: LinkSocket + ?Sized>(
    sock: &mut S,
    resolver: &ArpResolver,
    iface: &Interface,
    target: Ipv4Address,
    protocol: u8,
    payload: &[u8],
    arp_timeout: Duration,
) -> Result<(), InterceptorError> {
    let packet = Ipv4Packet::new(iface.require_ipv4()?, target, protocol, payload.to_vec());
    send_packet(sock, resolver, iface, &packet, arp_timeout)
}

/// Send a prepared packet, e.g. one with a forged source address.
///
/// Fails with `HostUnresolved` when the destination does not answer ARP
/// within `arp_timeout`.
pub fn send_packet<S: LinkSocket + ?Sized>(
    sock: &mut S,
    resolver: &ArpResolver,
    iface: &Interface,
    packet: &Ipv4Packet,
    arp_timeout: Duration,
) -> Result<(), InterceptorError> {
    let mac = resolver
        .resolve(sock, iface, packet.dst, arp_timeout)?
        .ok_or(InterceptorError::HostUnresolved(packet.dst))?;
    layer2::send(sock, iface, mac, ETHERTYPE_IPV4, &packet.encode())
}

/// Receive IPv4 packets accepted by `filter`. Non-IPv4 frames and frames
/// that fail to decode are skipped and do not count.
pub fn recv<S, F>(
    sock: &mut S,
    params: &RecvParams,
    mut filter: F,
) -> Result<Vec<Datagram>, InterceptorError>
where
    S: LinkSocket + ?Sized,
    F: FnMut(&EthernetFrame, &Ipv4Packet) -> bool,
{
    poll_frames(sock, params, |raw| {
        let frame = EthernetFrame::decode(raw).ok()?;
        if frame.ethertype != ETHERTYPE_IPV4 {
            return None;
        }
        let packet = Ipv4Packet::decode(&frame.payload).ok()?;
        filter(&frame, &packet).then_some(Datagram {
            src_mac: frame.src,
            dst_mac: frame.dst,
            packet,
        })
    })
}

// Decoded layer stack for a captured frame.
//
// Decoding is best effort above the link layer: a network or transport
// header that fails to decode is simply absent from the stack.

use std::fmt;

use crate::error::InterceptorError;

use super::protocols::{
    ArpPacket, ETHERTYPE_ARP, ETHERTYPE_IPV4, EthernetFrame, IcmpPacket, Ipv4Packet, PROTO_ICMP,
    PROTO_TCP, TcpHeader,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    Arp(ArpPacket),
    Ipv4(Ipv4Packet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportLayer {
    Icmp(IcmpPacket),
    Tcp(TcpHeader),
}

/// A frame together with whatever could be decoded on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub frame: EthernetFrame,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

impl CapturedPacket {
    /// Decode a raw frame. Only an undersized Ethernet header is an error.
    pub fn decode(raw: &[u8]) -> Result<Self, InterceptorError> {
        Ok(Self::from_frame(EthernetFrame::decode(raw)?))
    }

    pub fn from_frame(frame: EthernetFrame) -> Self {
        let network = match frame.ethertype {
            ETHERTYPE_ARP => ArpPacket::decode(&frame.payload).ok().map(NetworkLayer::Arp),
            ETHERTYPE_IPV4 => Ipv4Packet::decode(&frame.payload).ok().map(NetworkLayer::Ipv4),
            _ => None,
        };
        let transport = match &network {
            Some(NetworkLayer::Ipv4(ip)) => match ip.protocol {
                PROTO_ICMP => IcmpPacket::decode(&ip.payload).ok().map(TransportLayer::Icmp),
                PROTO_TCP => TcpHeader::decode(&ip.payload).ok().map(TransportLayer::Tcp),
                _ => None,
            },
            _ => None,
        };
        Self {
            frame,
            network,
            transport,
        }
    }

    pub fn arp(&self) -> Option<&ArpPacket> {
        match &self.network {
            Some(NetworkLayer::Arp(arp)) => Some(arp),
            _ => None,
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Packet> {
        match &self.network {
            Some(NetworkLayer::Ipv4(ip)) => Some(ip),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpPacket> {
        match &self.transport {
            Some(TransportLayer::Icmp(icmp)) => Some(icmp),
            _ => None,
        }
    }

    pub fn tcp(&self) -> Option<&TcpHeader> {
        match &self.transport {
            Some(TransportLayer::Tcp(tcp)) => Some(tcp),
            _ => None,
        }
    }
}

/// One line per decoded layer, outermost first.
impl fmt::Display for CapturedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.frame)?;
        match &self.network {
            Some(NetworkLayer::Arp(arp)) => write!(f, "\n  {arp}")?,
            Some(NetworkLayer::Ipv4(ip)) => write!(f, "\n  {ip}")?,
            None => {}
        }
        match &self.transport {
            Some(TransportLayer::Icmp(icmp)) => write!(f, "\n  {icmp}")?,
            Some(TransportLayer::Tcp(tcp)) => write!(f, "\n  TCP {tcp}")?,
            None => {}
        }
        Ok(())
    }
}

use std::fmt;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};

use super::{ETHERTYPE_IPV4, require_len};

pub const ARP_LEN: usize = 28;
pub const HW_TYPE_ETHERNET: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

/// An Ethernet/IPv4 ARP packet (hardware length 6, protocol length 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub operation: u16,
    pub sender_hw: MacAddress,
    pub sender_proto: Ipv4Address,
    pub target_hw: MacAddress,
    pub target_proto: Ipv4Address,
}

impl ArpPacket {
    pub fn new(
        operation: u16,
        sender_hw: MacAddress,
        sender_proto: Ipv4Address,
        target_hw: MacAddress,
        target_proto: Ipv4Address,
    ) -> Self {
        Self {
            hardware_type: HW_TYPE_ETHERNET,
            protocol_type: ETHERTYPE_IPV4,
            operation,
            sender_hw,
            sender_proto,
            target_hw,
            target_proto,
        }
    }

    /// Who-has `target`? Target hardware address is left zeroed.
    pub fn request(sender_hw: MacAddress, sender_proto: Ipv4Address, target: Ipv4Address) -> Self {
        Self::new(OP_REQUEST, sender_hw, sender_proto, MacAddress::ZERO, target)
    }

    /// `sender_proto` is-at `sender_hw`, addressed to the target pair.
    pub fn reply(
        sender_hw: MacAddress,
        sender_proto: Ipv4Address,
        target_hw: MacAddress,
        target_proto: Ipv4Address,
    ) -> Self {
        Self::new(OP_REPLY, sender_hw, sender_proto, target_hw, target_proto)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ARP_LEN);
        out.extend_from_slice(&self.hardware_type.to_be_bytes());
        out.extend_from_slice(&self.protocol_type.to_be_bytes());
        out.push(6);
        out.push(4);
        out.extend_from_slice(&self.operation.to_be_bytes());
        out.extend_from_slice(&self.sender_hw.octets());
        out.extend_from_slice(&self.sender_proto.octets());
        out.extend_from_slice(&self.target_hw.octets());
        out.extend_from_slice(&self.target_proto.octets());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, InterceptorError> {
        require_len("arp", data, ARP_LEN)?;
        if data[4] != 6 || data[5] != 4 {
            return Err(InterceptorError::protocol(
                "arp",
                format!("address lengths {}/{} (expected 6/4)", data[4], data[5]),
            ));
        }
        Ok(Self {
            hardware_type: u16::from_be_bytes([data[0], data[1]]),
            protocol_type: u16::from_be_bytes([data[2], data[3]]),
            operation: u16::from_be_bytes([data[6], data[7]]),
            sender_hw: MacAddress::try_from(&data[8..14])?,
            sender_proto: Ipv4Address::try_from(&data[14..18])?,
            target_hw: MacAddress::try_from(&data[18..24])?,
            target_proto: Ipv4Address::try_from(&data[24..28])?,
        })
    }

    pub fn is_request(&self) -> bool {
        self.operation == OP_REQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.operation == OP_REPLY
    }
}

impl fmt::Display for ArpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            OP_REQUEST => write!(
                f,
                "ARP who-has {} tell {} ({})",
                self.target_proto, self.sender_proto, self.sender_hw
            ),
            OP_REPLY => write!(f, "ARP {} is-at {}", self.sender_proto, self.sender_hw),
            op => write!(f, "ARP op {op} {} -> {}", self.sender_proto, self.target_proto),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArpPacket {
        ArpPacket::reply(
            MacAddress::new([0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]),
            Ipv4Address::new(192, 168, 1, 1),
            MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]),
            Ipv4Address::new(192, 168, 1, 20),
        )
    }

    #[test]
    fn ut_arp_wire_layout() {
        let raw = sample().encode();
        assert_eq!(raw.len(), ARP_LEN);
        assert_eq!(&raw[0..8], &[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x02]);
        assert_eq!(&raw[14..18], &[192, 168, 1, 1]);
        assert_eq!(&raw[24..28], &[192, 168, 1, 20]);
    }

    #[test]
    fn ut_arp_roundtrip_request_and_reply() {
        let reply = sample();
        assert_eq!(ArpPacket::decode(&reply.encode()).unwrap(), reply);
        let request = ArpPacket::request(
            MacAddress::new([2, 0, 0, 0, 0, 9]),
            Ipv4Address::new(10, 0, 0, 9),
            Ipv4Address::new(10, 0, 0, 1),
        );
        let decoded = ArpPacket::decode(&request.encode()).unwrap();
        assert!(decoded.is_request());
        assert_eq!(decoded.target_hw, MacAddress::ZERO);
        assert_eq!(decoded, request);
    }

    #[test]
    fn ut_arp_ignores_trailing_padding() {
        let mut raw = sample().encode();
        raw.extend_from_slice(&[0u8; 18]);
        assert_eq!(ArpPacket::decode(&raw).unwrap(), sample());
    }

    #[test]
    fn ut_arp_short_or_wrong_lengths() {
        let raw = sample().encode();
        assert!(matches!(
            ArpPacket::decode(&raw[..27]),
            Err(InterceptorError::ProtocolFormat { protocol: "arp", .. })
        ));
        let mut bad = raw.clone();
        bad[4] = 8;
        assert!(ArpPacket::decode(&bad).is_err());
    }
}

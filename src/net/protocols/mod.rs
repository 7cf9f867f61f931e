//! Link-, network- and transport-layer codecs.
//!
//! Every codec is a pure `encode(&self) -> Vec<u8>` / `decode(&[u8]) ->
//! Result<Self, InterceptorError>` pair. Decoders never validate checksums;
//! the `verify_checksum` helpers in [`ipv4`] and [`icmp`] do that on demand.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;

pub use arp::ArpPacket;
pub use ethernet::EthernetFrame;
pub use icmp::{IcmpPacket, IcmpType};
pub use ipv4::Ipv4Packet;
pub use tcp::{TcpFlags, TcpHeader};

// EtherTypes
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

// IP protocol numbers
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// RFC 1071 internet checksum.
///
/// One's-complement sum of big-endian 16-bit words (odd input is padded with
/// a zero byte), carries folded back into the low 16 bits, then complemented.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Check that a buffer is at least `need` bytes long.
pub(crate) fn require_len(
    protocol: &'static str,
    data: &[u8],
    need: usize,
) -> Result<(), crate::error::InterceptorError> {
    if data.len() < need {
        return Err(crate::error::InterceptorError::protocol(
            protocol,
            format!("{} bytes, need at least {need}", data.len()),
        ));
    }
    Ok(())
}

use std::fmt;

use rand::Rng;

use crate::error::InterceptorError;
use crate::net::addr::Ipv4Address;

use super::{internet_checksum, require_len};

pub const IPV4_HLEN: usize = 20;

/// Don't Fragment, in the 3-bit flags field.
pub const FLAG_DF: u8 = 0b010;
/// More Fragments, in the 3-bit flags field.
pub const FLAG_MF: u8 = 0b001;

const DEFAULT_TTL: u8 = 64;

/// An IPv4 packet without options.
///
/// The header checksum and total length are not stored: both are computed on
/// [`encode`](Self::encode), and [`decode`](Self::decode) does not check the
/// checksum (see [`verify_checksum`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub dscp: u8,
    pub ecn: u8,
    /// `None` draws a random identification in `[1, 0xFFFF)` at encode time.
    pub identification: Option<u16>,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub payload: Vec<u8>,
}

impl Ipv4Packet {
    pub fn new(src: Ipv4Address, dst: Ipv4Address, protocol: u8, payload: Vec<u8>) -> Self {
        Self {
            dscp: 0,
            ecn: 0,
            identification: None,
            flags: FLAG_DF,
            fragment_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            src,
            dst,
            payload,
        }
    }

    pub fn with_identification(mut self, id: u16) -> Self {
        self.identification = Some(id);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let identification = self
            .identification
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..0xFFFF));
        let total_len = (IPV4_HLEN + self.payload.len()).min(u16::MAX as usize) as u16;
        // Flags occupy the top 3 bits, fragment offset the low 13.
        let flags_frag = ((self.flags as u16 & 0x7) << 13) | (self.fragment_offset & 0x1FFF);

        let mut out = Vec::with_capacity(IPV4_HLEN + self.payload.len());
        out.push(0x45);
        out.push((self.dscp << 2) | (self.ecn & 0x3));
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&identification.to_be_bytes());
        out.extend_from_slice(&flags_frag.to_be_bytes());
        out.push(self.ttl);
        out.push(self.protocol);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.dst.octets());
        let checksum = internet_checksum(&out);
        out[10..12].copy_from_slice(&checksum.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, InterceptorError> {
        require_len("ipv4", data, IPV4_HLEN)?;
        let version = data[0] >> 4;
        if version != 4 {
            return Err(InterceptorError::protocol(
                "ipv4",
                format!("version {version}"),
            ));
        }
        let ihl = ((data[0] & 0x0F) as usize) * 4;
        if ihl < IPV4_HLEN || ihl > data.len() {
            return Err(InterceptorError::protocol(
                "ipv4",
                format!("header length {ihl} with {} bytes available", data.len()),
            ));
        }
        // Trailing bytes past the total length are link-layer padding.
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let end = if (ihl..=data.len()).contains(&total_len) {
            total_len
        } else {
            data.len()
        };
        let flags_frag = u16::from_be_bytes([data[6], data[7]]);

        Ok(Self {
            dscp: data[1] >> 2,
            ecn: data[1] & 0x3,
            identification: Some(u16::from_be_bytes([data[4], data[5]])),
            flags: (flags_frag >> 13) as u8,
            fragment_offset: flags_frag & 0x1FFF,
            ttl: data[8],
            protocol: data[9],
            src: Ipv4Address::try_from(&data[12..16])?,
            dst: Ipv4Address::try_from(&data[16..20])?,
            payload: data[ihl..end].to_vec(),
        })
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags & FLAG_DF != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & FLAG_MF != 0
    }
}

impl fmt::Display for Ipv4Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (proto {})", self.src, self.dst, self.protocol)
    }
}

/// True when the header checksum of a raw IPv4 packet is consistent.
pub fn verify_checksum(raw: &[u8]) -> bool {
    if raw.len() < IPV4_HLEN {
        return false;
    }
    let ihl = ((raw[0] & 0x0F) as usize) * 4;
    ihl >= IPV4_HLEN && ihl <= raw.len() && internet_checksum(&raw[..ihl]) == 0
}

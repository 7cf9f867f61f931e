use std::fmt;

use crate::error::InterceptorError;
use crate::net::addr::MacAddress;

use super::require_len;

pub const ETH_HLEN: usize = 14;

/// An Ethernet II frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(dst: MacAddress, src: MacAddress, ethertype: u16, payload: Vec<u8>) -> Self {
        Self {
            dst,
            src,
            ethertype,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ETH_HLEN + self.payload.len());
        out.extend_from_slice(&self.dst.octets());
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.ethertype.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, InterceptorError> {
        require_len("ethernet", data, ETH_HLEN)?;
        Ok(Self {
            dst: MacAddress::try_from(&data[0..6])?,
            src: MacAddress::try_from(&data[6..12])?,
            ethertype: u16::from_be_bytes([data[12], data[13]]),
            payload: data[ETH_HLEN..].to_vec(),
        })
    }
}

impl fmt::Display for EthernetFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({:04x})", self.src, self.dst, self.ethertype)
    }
}

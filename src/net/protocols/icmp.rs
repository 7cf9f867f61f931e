use std::fmt;

use crate::error::InterceptorError;

use super::{internet_checksum, require_len};

/// Well-known ICMP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    Redirect = 5,
    EchoRequest = 8,
    RouterAdvertisement = 9,
    RouterSolicitation = 10,
    TimeExceeded = 11,
    BadIpHeader = 12,
    Timestamp = 13,
    TimestampReply = 14,
}

impl From<IcmpType> for u8 {
    fn from(t: IcmpType) -> u8 {
        t as u8
    }
}

/// Types whose header carries an identifier and sequence number.
pub fn has_id_seq(icmp_type: u8) -> bool {
    matches!(icmp_type, 0 | 8 | 13 | 14)
}

/// An ICMP message.
///
/// `id` and `seq` are only on the wire for echo and timestamp types; for the
/// others they are always zero after decoding and ignored by encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub id: u16,
    pub seq: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    pub fn new(icmp_type: impl Into<u8>, code: u8, payload: Vec<u8>) -> Self {
        Self {
            icmp_type: icmp_type.into(),
            code,
            id: 0,
            seq: 0,
            payload,
        }
    }

    pub fn echo_request(id: u16, seq: u16, payload: Vec<u8>) -> Self {
        Self {
            icmp_type: IcmpType::EchoRequest as u8,
            code: 0,
            id,
            seq,
            payload,
        }
    }

    pub fn is_type(&self, t: IcmpType) -> bool {
        self.icmp_type == t as u8
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.push(self.icmp_type);
        out.push(self.code);
        out.extend_from_slice(&[0, 0]);
        if has_id_seq(self.icmp_type) {
            out.extend_from_slice(&self.id.to_be_bytes());
            out.extend_from_slice(&self.seq.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        let checksum = internet_checksum(&out);
        out[2..4].copy_from_slice(&checksum.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, InterceptorError> {
        require_len("icmp", data, 4)?;
        let icmp_type = data[0];
        let code = data[1];
        if has_id_seq(icmp_type) {
            require_len("icmp", data, 8)?;
            Ok(Self {
                icmp_type,
                code,
                id: u16::from_be_bytes([data[4], data[5]]),
                seq: u16::from_be_bytes([data[6], data[7]]),
                payload: data[8..].to_vec(),
            })
        } else {
            Ok(Self::new(icmp_type, code, data[4..].to_vec()))
        }
    }

    /// The checksum [`encode`](Self::encode) writes.
    pub fn checksum(&self) -> u16 {
        let raw = self.encode();
        u16::from_be_bytes([raw[2], raw[3]])
    }
}

impl fmt::Display for IcmpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ICMP type {} code {}", self.icmp_type, self.code)?;
        if has_id_seq(self.icmp_type) {
            write!(f, " id {} seq {}", self.id, self.seq)?;
        }
        Ok(())
    }
}

/// True when the checksum over a whole raw ICMP message is consistent.
pub fn verify_checksum(raw: &[u8]) -> bool {
    raw.len() >= 4 && internet_checksum(raw) == 0
}

use std::collections::BTreeMap;
use std::fmt;

use crate::error::InterceptorError;

use super::require_len;

pub const TCP_MIN_HLEN: usize = 20;

const OPT_END: u8 = 0;
const OPT_NOP: u8 = 1;

/// The eight TCP control bits, FIN in bit 0 through CWR in bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    const NAMES: [&'static str; 8] = ["FIN", "SYN", "RST", "PSH", "ACK", "URG", "ECE", "CWR"];

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn fin(&self) -> bool {
        self.contains(Self::FIN)
    }
    pub fn syn(&self) -> bool {
        self.contains(Self::SYN)
    }
    pub fn rst(&self) -> bool {
        self.contains(Self::RST)
    }
    pub fn psh(&self) -> bool {
        self.contains(Self::PSH)
    }
    pub fn ack(&self) -> bool {
        self.contains(Self::ACK)
    }
    pub fn urg(&self) -> bool {
        self.contains(Self::URG)
    }
    pub fn ece(&self) -> bool {
        self.contains(Self::ECE)
    }
    pub fn cwr(&self) -> bool {
        self.contains(Self::CWR)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = Self::NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&set.join(" "))
    }
}

/// A parsed TCP segment header. Decode only: nothing here builds segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack_num: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
    /// Option kind to option data (the bytes after the kind and length).
    pub options: BTreeMap<u8, Vec<u8>>,
    pub payload: Vec<u8>,
}

impl TcpHeader {
    pub fn decode(data: &[u8]) -> Result<Self, InterceptorError> {
        require_len("tcp", data, TCP_MIN_HLEN)?;
        let header_len = ((data[12] >> 4) as usize) * 4;
        if header_len < TCP_MIN_HLEN || header_len > data.len() {
            return Err(InterceptorError::protocol(
                "tcp",
                format!("header length {header_len} with {} bytes available", data.len()),
            ));
        }
        Ok(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack_num: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: TcpFlags(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent_ptr: u16::from_be_bytes([data[18], data[19]]),
            options: parse_options(&data[TCP_MIN_HLEN..header_len])?,
            payload: data[header_len..].to_vec(),
        })
    }
}

/// Walk the option list: kind 0 ends it, kind 1 is a one-byte pad, every
/// other kind is `[kind, len, data...]` with `len` covering the whole option.
fn parse_options(raw: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>, InterceptorError> {
    let mut options = BTreeMap::new();
    let mut i = 0;
    while i < raw.len() {
        let kind = raw[i];
        match kind {
            OPT_END => break,
            OPT_NOP => {
                i += 1;
                continue;
            }
            _ => {}
        }
        let len = *raw.get(i + 1).ok_or_else(|| {
            InterceptorError::protocol("tcp", format!("option {kind} has no length byte"))
        })? as usize;
        if len < 2 || i + len > raw.len() {
            return Err(InterceptorError::protocol(
                "tcp",
                format!("option {kind} length {len} exceeds {} remaining bytes", raw.len() - i),
            ));
        }
        options.insert(kind, raw[i + 2..i + len].to_vec());
        i += len;
    }
    Ok(options)
}

impl fmt::Display for TcpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_port, self.dst_port)?;
        if self.flags.0 != 0 {
            write!(f, " {}", self.flags)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed header with the given flags and option bytes (padded by caller).
    fn segment(flags: u8, options: &[u8], payload: &[u8]) -> Vec<u8> {
        assert_eq!(options.len() % 4, 0);
        let offset_words = ((TCP_MIN_HLEN + options.len()) / 4) as u8;
        let mut raw = vec![
            0x30, 0x39, // 12345
            0x00, 0x50, // 80
            0x00, 0x00, 0x00, 0x64, // seq 100
            0x00, 0x00, 0x00, 0x00, // ack 0
            offset_words << 4,
            flags,
            0xff, 0xff, // window
            0x12, 0x34, // checksum
            0x00, 0x00, // urgent
        ];
        raw.extend_from_slice(options);
        raw.extend_from_slice(payload);
        raw
    }

    #[test]
    fn ut_tcp_fixed_fields() {
        let hdr = TcpHeader::decode(&segment(TcpFlags::SYN | TcpFlags::ECE, &[], b"data")).unwrap();
        assert_eq!(hdr.src_port, 12345);
        assert_eq!(hdr.dst_port, 80);
        assert_eq!(hdr.seq, 100);
        assert_eq!(hdr.window, 0xffff);
        assert_eq!(hdr.checksum, 0x1234);
        assert!(hdr.flags.syn() && hdr.flags.ece());
        assert!(!hdr.flags.ack() && !hdr.flags.fin());
        assert!(hdr.options.is_empty());
        assert_eq!(hdr.payload, b"data");
        assert_eq!(hdr.to_string(), "12345 -> 80 SYN ECE");
    }

    #[test]
    fn ut_tcp_option_then_terminator() {
        let opts = [0x02, 0x04, 0x05, 0xb4, 0x00, 0xaa, 0xbb, 0xcc];
        let hdr = TcpHeader::decode(&segment(TcpFlags::SYN, &opts, &[])).unwrap();
        assert_eq!(hdr.options.len(), 1);
        assert_eq!(hdr.options[&2], vec![0x05, 0xb4]);
    }

    #[test]
    fn ut_tcp_nop_padding_is_skipped() {
        let opts = [0x01, 0x01, 0x04, 0x02, 0x01, 0x03, 0x03, 0x07];
        let hdr = TcpHeader::decode(&segment(TcpFlags::SYN, &opts, &[])).unwrap();
        assert_eq!(hdr.options[&4], Vec::<u8>::new());
        assert_eq!(hdr.options[&3], vec![0x07]);
    }

    #[test]
    fn ut_tcp_truncated_option_length() {
        let missing_len = [0x01, 0x01, 0x01, 0x03];
        assert!(matches!(
            TcpHeader::decode(&segment(0, &missing_len, &[])),
            Err(InterceptorError::ProtocolFormat { protocol: "tcp", .. })
        ));
        let too_long = [0x08, 0x0a, 0x00, 0x00];
        assert!(TcpHeader::decode(&segment(0, &too_long, &[])).is_err());
        let zero_len = [0x05, 0x00, 0x00, 0x00];
        assert!(TcpHeader::decode(&segment(0, &zero_len, &[])).is_err());
    }

    #[test]
    fn ut_tcp_bad_data_offset() {
        let mut raw = segment(0, &[], &[]);
        raw[12] = 0x40;
        assert!(TcpHeader::decode(&raw).is_err());
        raw[12] = 0xf0;
        assert!(TcpHeader::decode(&raw).is_err());
        assert!(TcpHeader::decode(&raw[..19]).is_err());
    }
}

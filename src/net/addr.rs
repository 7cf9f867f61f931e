//! IPv4 and MAC address value types.
//!
//! Both types are immutable `Copy` wrappers around their octets. They parse
//! from text, integers and byte slices, render back to text, support bitwise
//! algebra, and order by their numeric value (octets are stored big-endian so
//! the derived ordering is the numeric ordering).

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InterceptorError;

const MAC_MASK: u64 = 0xFFFF_FFFF_FFFF;

// ---------------------------------------------------------------------------
// Ipv4Address
// ---------------------------------------------------------------------------

/// An IPv4 address: exactly four octets.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Ipv4Address([u8; 4]);

/// Classful addressing class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressClass {
    A,
    B,
    C,
    D,
    E,
}

impl Ipv4Address {
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);
    pub const BROADCAST: Ipv4Address = Ipv4Address([255, 255, 255, 255]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    /// Netmask with the top `prefix` bits set. `prefix` above 32 is clamped.
    pub fn netmask(prefix: u8) -> Self {
        let prefix = prefix.min(32);
        if prefix == 0 {
            Self::from(0u32)
        } else {
            Self::from(u32::MAX << (32 - prefix as u32))
        }
    }

    pub fn octets(&self) -> [u8; 4] {
        self.0
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Dotted-quad text form (`a.b.c.d`).
    pub fn dotted(&self) -> String {
        self.to_string()
    }

    pub fn class(&self) -> AddressClass {
        let v = self.to_u32();
        let in_range = |lo: [u8; 4], hi: [u8; 4]| {
            v >= u32::from_be_bytes(lo) && v <= u32::from_be_bytes(hi)
        };
        if in_range([1, 0, 0, 0], [127, 255, 255, 255]) {
            AddressClass::A
        } else if in_range([128, 0, 0, 0], [191, 255, 255, 255]) {
            AddressClass::B
        } else if in_range([192, 0, 0, 0], [223, 255, 255, 255]) {
            AddressClass::C
        } else if in_range([224, 0, 0, 0], [239, 255, 255, 255]) {
            AddressClass::D
        } else {
            AddressClass::E
        }
    }

    pub fn is_private(&self) -> bool {
        const PRIVATE: [([u8; 4], [u8; 4]); 3] = [
            ([10, 0, 0, 0], [10, 255, 255, 255]),
            ([172, 16, 0, 0], [172, 31, 255, 255]),
            ([192, 168, 0, 0], [192, 168, 255, 255]),
        ];
        let v = self.to_u32();
        PRIVATE
            .iter()
            .any(|(lo, hi)| v >= u32::from_be_bytes(*lo) && v <= u32::from_be_bytes(*hi))
    }

    pub fn is_public(&self) -> bool {
        !self.is_private()
    }

    /// 127.0.0.1 through 127.255.255.255.
    pub fn is_loopback(&self) -> bool {
        *self >= Self::new(127, 0, 0, 1) && *self <= Self::new(127, 255, 255, 255)
    }

    pub fn is_multicast(&self) -> bool {
        self.class() == AddressClass::D
    }

    pub fn is_research(&self) -> bool {
        self.class() == AddressClass::E
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Debug for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ipv4Address({self})")
    }
}

impl FromStr for Ipv4Address {
    type Err = InterceptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InterceptorError::AddressFormat(s.to_string());
        let mut octets = [0u8; 4];
        let mut parts = s.trim().split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(bad)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            *octet = part.parse().map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for Ipv4Address {
    type Error = InterceptorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Address> for String {
    fn from(addr: Ipv4Address) -> Self {
        addr.to_string()
    }
}

impl From<u32> for Ipv4Address {
    fn from(v: u32) -> Self {
        Self(v.to_be_bytes())
    }
}

impl From<Ipv4Address> for u32 {
    fn from(addr: Ipv4Address) -> Self {
        addr.to_u32()
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

impl TryFrom<&[u8]> for Ipv4Address {
    type Error = InterceptorError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; 4] = bytes.try_into().map_err(|_| {
            InterceptorError::AddressFormat(format!("{} bytes for an IPv4 address", bytes.len()))
        })?;
        Ok(Self(octets))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Ipv4Address> for Ipv4Addr {
    fn from(addr: Ipv4Address) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl BitAnd for Ipv4Address {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self::from(self.to_u32() & rhs.to_u32())
    }
}

impl BitOr for Ipv4Address {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self::from(self.to_u32() | rhs.to_u32())
    }
}

impl BitXor for Ipv4Address {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        Self::from(self.to_u32() ^ rhs.to_u32())
    }
}

impl Not for Ipv4Address {
    type Output = Self;
    fn not(self) -> Self {
        Self::from(!self.to_u32())
    }
}

// ---------------------------------------------------------------------------
// MacAddress
// ---------------------------------------------------------------------------

/// A MAC (Ethernet hardware) address: exactly six octets.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    /// Colon-separated lowercase hex (`12:34:56:ab:cd:ef`).
    pub fn colon(&self) -> String {
        self.join(':')
    }

    /// Hyphen-separated lowercase hex (`12-34-56-ab-cd-ef`).
    pub fn hyphen(&self) -> String {
        self.join('-')
    }

    fn join(&self, sep: char) -> String {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{b:02x}")).collect();
        parts.join(&sep.to_string())
    }

    /// Bit 1 of the first octet set.
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    pub fn is_universal(&self) -> bool {
        !self.is_local()
    }

    /// Bit 0 of the first octet set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Organizationally Unique Identifier (first three octets, colon form).
    pub fn oui(&self) -> String {
        self.colon()[..8].to_string()
    }

    /// NIC-specific part (last three octets, colon form).
    pub fn nic(&self) -> String {
        self.colon()[9..].to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.colon())
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl FromStr for MacAddress {
    type Err = InterceptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InterceptorError::AddressFormat(s.to_string());
        let s_trim = s.trim();
        let sep = if s_trim.contains(':') {
            ':'
        } else if s_trim.contains('-') {
            '-'
        } else {
            return Err(bad());
        };
        let mut octets = [0u8; 6];
        let mut parts = s_trim.split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(bad)?;
            if part.is_empty() || part.len() > 2 {
                return Err(bad());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = InterceptorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(addr: MacAddress) -> Self {
        addr.colon()
    }
}

/// Takes the low 48 bits, most significant octet first.
impl From<u64> for MacAddress {
    fn from(v: u64) -> Self {
        let b = (v & MAC_MASK).to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = InterceptorError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; 6] = bytes.try_into().map_err(|_| {
            InterceptorError::AddressFormat(format!("{} bytes for a MAC address", bytes.len()))
        })?;
        Ok(Self(octets))
    }
}

impl BitAnd for MacAddress {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self::from(self.to_u64() & rhs.to_u64())
    }
}

impl BitOr for MacAddress {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self::from(self.to_u64() | rhs.to_u64())
    }
}

impl BitXor for MacAddress {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        Self::from(self.to_u64() ^ rhs.to_u64())
    }
}

impl Not for MacAddress {
    type Output = Self;
    fn not(self) -> Self {
        Self::from(!self.to_u64() & MAC_MASK)
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Lazy iterator over a contiguous run of IPv4 addresses.
///
/// Cloning yields an independent iterator from the current position, so a
/// range can be walked more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressIter {
    next: u64,
    end: u64,
}

impl AddressIter {
    fn new(first: u64, end_exclusive: u64) -> Self {
        Self {
            next: first,
            end: end_exclusive.max(first),
        }
    }
}

impl Iterator for AddressIter {
    type Item = Ipv4Address;

    fn next(&mut self) -> Option<Ipv4Address> {
        if self.next >= self.end {
            return None;
        }
        let addr = Ipv4Address::from(self.next as u32);
        self.next += 1;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.end - self.next) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for AddressIter {}

/// A parsed `a.b.c.d/n` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: Ipv4Address,
    broadcast: Ipv4Address,
    prefix: u8,
}

impl CidrRange {
    pub fn network(&self) -> Ipv4Address {
        self.network
    }

    pub fn broadcast(&self) -> Ipv4Address {
        self.broadcast
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn netmask(&self) -> Ipv4Address {
        Ipv4Address::netmask(self.prefix)
    }

    /// Host addresses, network and broadcast excluded.
    pub fn hosts(&self) -> AddressIter {
        AddressIter::new(
            self.network.to_u32() as u64 + 1,
            self.broadcast.to_u32() as u64,
        )
    }

    pub fn contains(&self, addr: Ipv4Address) -> bool {
        addr & self.netmask() == self.network
    }
}

impl IntoIterator for &CidrRange {
    type Item = Ipv4Address;
    type IntoIter = AddressIter;

    fn into_iter(self) -> AddressIter {
        self.hosts()
    }
}

/// Parse `a.b.c.d/n` into its network, broadcast and host range.
pub fn cidr_range(text: &str) -> Result<CidrRange, InterceptorError> {
    let bad = || InterceptorError::AddressFormat(text.to_string());
    let (addr, bits) = text.trim().split_once('/').ok_or_else(bad)?;
    let addr: Ipv4Address = addr.parse()?;
    let prefix: u8 = bits.parse().map_err(|_| bad())?;
    if prefix > 32 {
        return Err(bad());
    }
    let mask = Ipv4Address::netmask(prefix);
    Ok(CidrRange {
        network: addr & mask,
        broadcast: addr | !mask,
        prefix,
    })
}

/// Parse an inclusive `first-last` range.
pub fn ip_range(text: &str) -> Result<AddressIter, InterceptorError> {
    let (first, last) = text
        .trim()
        .split_once('-')
        .ok_or_else(|| InterceptorError::AddressFormat(text.to_string()))?;
    let first: Ipv4Address = first.parse()?;
    let last: Ipv4Address = last.parse()?;
    if first > last {
        return Err(InterceptorError::AddressFormat(format!(
            "{text}: range end precedes start"
        )));
    }
    Ok(AddressIter::new(
        first.to_u32() as u64,
        last.to_u32() as u64 + 1,
    ))
}

/// Accept a CIDR block, a dashed range, or a single address.
pub fn parse_targets(text: &str) -> Result<AddressIter, InterceptorError> {
    if text.contains('/') {
        Ok(cidr_range(text)?.hosts())
    } else if text.contains('-') {
        ip_range(text)
    } else {
        let addr: Ipv4Address = text.parse()?;
        Ok(AddressIter::new(
            addr.to_u32() as u64,
            addr.to_u32() as u64 + 1,
        ))
    }
}

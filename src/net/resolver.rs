// IPv4 to MAC resolution.
//
// Lookup order: host store, kernel neighbor table, active ARP request.
// Anything learned from the last two is written back to the store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};
use crate::net::interface::Interface;
use crate::net::protocols::{ArpPacket, ETHERTYPE_ARP};
use crate::net::socket::{LinkSocket, RecvParams, layer2};
use crate::store::{self, HostStore};
use crate::task::CancelToken;

const PROC_NET_ARP: &str = "/proc/net/arp";

// ATF_COM: entry is complete.
const ATF_COM: u32 = 0x02;

/// Source of already-known neighbors, such as the kernel ARP cache.
pub trait NeighborTable: Send + Sync {
    fn lookup(&self, ip: Ipv4Address) -> Result<Option<MacAddress>, InterceptorError>;
}

impl NeighborTable for HashMap<Ipv4Address, MacAddress> {
    fn lookup(&self, ip: Ipv4Address) -> Result<Option<MacAddress>, InterceptorError> {
        Ok(self.get(&ip).copied())
    }
}

/// The kernel neighbor table exposed at `/proc/net/arp`.
#[derive(Debug, Clone)]
pub struct ProcNeighborTable {
    path: PathBuf,
}

impl ProcNeighborTable {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(PROC_NET_ARP),
        }
    }
}

impl Default for ProcNeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborTable for ProcNeighborTable {
    fn lookup(&self, ip: Ipv4Address) -> Result<Option<MacAddress>, InterceptorError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(parse_arp_table(&text).get(&ip).copied()),
            Err(e) => {
                log::debug!("neighbor table {} unavailable: {e}", self.path.display());
                Ok(None)
            }
        }
    }
}

/// Parse `/proc/net/arp` text. Incomplete entries are skipped.
pub fn parse_arp_table(text: &str) -> HashMap<Ipv4Address, MacAddress> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            let flags = u32::from_str_radix(cols[2].trim_start_matches("0x"), 16).ok()?;
            if flags & ATF_COM == 0 {
                return None;
            }
            let ip = cols[0].parse::<Ipv4Address>().ok()?;
            let mac = cols[3].parse::<MacAddress>().ok()?;
            (mac != MacAddress::ZERO).then_some((ip, mac))
        })
        .collect()
}

/// Broadcast an ARP request for `ip` and wait for the matching reply.
///
/// A reply matches when it comes from `ip`, is addressed to the
/// interface's IPv4 address and is framed to the interface's MAC.
pub fn arp_request<S: LinkSocket + ?Sized>(
    sock: &mut S,
    iface: &Interface,
    ip: Ipv4Address,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<Option<ArpPacket>, InterceptorError> {
    let our_mac = iface.require_mac()?;
    let our_ip = iface.require_ipv4()?;

    let request = ArpPacket::request(our_mac, our_ip, ip);
    layer2::send(sock, iface, MacAddress::BROADCAST, ETHERTYPE_ARP, &request.encode())?;

    let mut params = RecvParams::one(timeout);
    if let Some(token) = cancel {
        params = params.with_cancel(token.clone());
    }

    let replies = layer2::recv(sock, &params, |frame| {
        frame.ethertype == ETHERTYPE_ARP
            && frame.dst == our_mac
            && ArpPacket::decode(&frame.payload)
                .is_ok_and(|arp| arp.is_reply() && arp.sender_proto == ip && arp.target_proto == our_ip)
    })?;

    Ok(replies
        .first()
        .and_then(|frame| ArpPacket::decode(&frame.payload).ok()))
}

/// Resolves next-hop MAC addresses and caches them in the host store.
pub struct ArpResolver {
    store: Arc<dyn HostStore>,
    neighbors: Box<dyn NeighborTable>,
}

impl ArpResolver {
    pub fn new(store: Arc<dyn HostStore>, neighbors: impl NeighborTable + 'static) -> Self {
        Self {
            store,
            neighbors: Box::new(neighbors),
        }
    }

    /// A resolver backed by the kernel neighbor table.
    pub fn with_system_neighbors(store: Arc<dyn HostStore>) -> Self {
        Self::new(store, ProcNeighborTable::new())
    }

    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.store
    }

    /// Resolve without touching the network.
    pub fn cached(&self, ip: Ipv4Address) -> Result<Option<MacAddress>, InterceptorError> {
        let known = self
            .store
            .search_hosts(Some(ip), None)?
            .into_iter()
            .find_map(|h| h.mac);
        if let Some(mac) = known {
            log::trace!("ARP cache hit {ip} -> {mac}");
            return Ok(Some(mac));
        }

        if let Some(mac) = self.neighbors.lookup(ip)? {
            log::debug!("neighbor table {ip} -> {mac}");
            store::remember_mac(self.store.as_ref(), ip, mac)?;
            return Ok(Some(mac));
        }

        Ok(None)
    }

    /// Resolve `ip`, sending an ARP request on `sock` if it is not known.
    /// Returns `None` if nothing answers within `timeout`.
    pub fn resolve<S: LinkSocket + ?Sized>(
        &self,
        sock: &mut S,
        iface: &Interface,
        ip: Ipv4Address,
        timeout: Duration,
    ) -> Result<Option<MacAddress>, InterceptorError> {
        if let Some(mac) = self.cached(ip)? {
            return Ok(Some(mac));
        }

        log::debug!("ARP request for {ip} on {}", iface.name);
        match arp_request(sock, iface, ip, timeout, None)? {
            Some(reply) => {
                store::remember_mac(self.store.as_ref(), ip, reply.sender_hw)?;
                Ok(Some(reply.sender_hw))
            }
            None => {
                log::debug!("no ARP reply from {ip} within {timeout:?}");
                Ok(None)
            }
        }
    }
}

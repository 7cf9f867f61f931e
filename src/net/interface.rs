// Network interface enumeration and default-route lookup.
//
// Interfaces come from getifaddrs(3): AF_PACKET entries carry the index and
// hardware address, AF_INET entries the IPv4 address and netmask. The
// default route comes from the kernel routing table in /proc/net/route.

use std::collections::BTreeMap;
use std::ffi::CStr;

use serde::Serialize;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};

const PROC_NET_ROUTE: &str = "/proc/net/route";

/// A local network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub ipv4: Option<Ipv4Address>,
    pub netmask: Option<Ipv4Address>,
    pub mac: Option<MacAddress>,
    #[serde(skip)]
    pub flags: u32,
}

impl Interface {
    pub fn is_up(&self) -> bool {
        (self.flags & libc::IFF_UP as u32) != 0
    }

    pub fn is_loopback(&self) -> bool {
        (self.flags & libc::IFF_LOOPBACK as u32) != 0
    }

    /// Directed broadcast address of the interface's IPv4 subnet.
    pub fn broadcast(&self) -> Option<Ipv4Address> {
        Some(self.ipv4? | !self.netmask?)
    }

    pub fn require_ipv4(&self) -> Result<Ipv4Address, InterceptorError> {
        self.ipv4.ok_or_else(|| {
            InterceptorError::Interface(format!("{} has no IPv4 address", self.name))
        })
    }

    pub fn require_mac(&self) -> Result<MacAddress, InterceptorError> {
        self.mac.ok_or_else(|| {
            InterceptorError::Interface(format!("{} has no hardware address", self.name))
        })
    }

    /// Look an interface up by name, IPv4 address or MAC address.
    pub fn find(spec: &str) -> Result<Interface, InterceptorError> {
        let interfaces = list_interfaces()?;
        let ipv4 = spec.parse::<Ipv4Address>().ok();
        let mac = spec.parse::<MacAddress>().ok();
        interfaces
            .into_iter()
            .find(|i| {
                i.name == spec
                    || (ipv4.is_some() && i.ipv4 == ipv4)
                    || (mac.is_some() && i.mac == mac)
            })
            .ok_or_else(|| InterceptorError::Interface(format!("no such interface: {spec}")))
    }
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} (MAC = {}, IPv4 = {})",
            self.name,
            show(self.mac.map(|m| m.to_string())),
            show(self.ipv4.map(|a| a.to_string()))
        )
    }
}

/// Enumerate all network interfaces, sorted by index.
pub fn list_interfaces() -> Result<Vec<Interface>, InterceptorError> {
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();

    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return Err(InterceptorError::Interface(format!(
            "getifaddrs failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let result = collect_interfaces(ifaddrs);

    unsafe { libc::freeifaddrs(ifaddrs) };

    result
}

fn collect_interfaces(ifaddrs: *mut libc::ifaddrs) -> Result<Vec<Interface>, InterceptorError> {
    let mut interfaces: BTreeMap<String, Interface> = BTreeMap::new();
    let mut current = ifaddrs;

    while !current.is_null() {
        let entry = unsafe { &*current };
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();

        let iface = interfaces.entry(name.clone()).or_insert_with(|| Interface {
            name,
            ..Default::default()
        });
        iface.flags = entry.ifa_flags;

        if !entry.ifa_addr.is_null() {
            let family = unsafe { (*entry.ifa_addr).sa_family } as i32;
            match family {
                #[cfg(target_os = "linux")]
                libc::AF_PACKET => {
                    let sll = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_ll) };
                    iface.index = sll.sll_ifindex as u32;
                    if sll.sll_halen == 6 {
                        iface.mac = MacAddress::try_from(&sll.sll_addr[..6]).ok();
                    }
                }
                libc::AF_INET if iface.ipv4.is_none() => {
                    let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                    iface.ipv4 = Some(Ipv4Address::from(sin.sin_addr.s_addr.to_ne_bytes()));
                    if !entry.ifa_netmask.is_null() {
                        let mask = unsafe { &*(entry.ifa_netmask as *const libc::sockaddr_in) };
                        iface.netmask = Some(Ipv4Address::from(mask.sin_addr.s_addr.to_ne_bytes()));
                    }
                }
                _ => {}
            }
        }

        current = entry.ifa_next;
    }

    let mut list: Vec<Interface> = interfaces.into_values().collect();
    list.sort_by_key(|i| i.index);
    Ok(list)
}

/// The kernel's IPv4 default route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    pub interface: String,
    pub gateway: Ipv4Address,
}

/// Find the lowest-metric default route in `/proc/net/route` text.
///
/// Addresses in that file are hex renderings of the in-memory (network order)
/// value read as a native integer.
pub fn parse_route_table(text: &str) -> Option<DefaultRoute> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 8 || cols[1] != "00000000" || cols[7] != "00000000" {
                return None;
            }
            let gateway = u32::from_str_radix(cols[2], 16).ok()?;
            let metric: u32 = cols[6].parse().ok()?;
            Some((
                metric,
                DefaultRoute {
                    interface: cols[0].to_string(),
                    gateway: Ipv4Address::from(gateway.to_ne_bytes()),
                },
            ))
        })
        .min_by_key(|(metric, _)| *metric)
        .map(|(_, route)| route)
}

pub fn default_route() -> Result<DefaultRoute, InterceptorError> {
    let text = std::fs::read_to_string(PROC_NET_ROUTE)
        .map_err(|e| InterceptorError::Interface(format!("read {PROC_NET_ROUTE}: {e}")))?;
    parse_route_table(&text)
        .ok_or_else(|| InterceptorError::Interface("no IPv4 default route".to_string()))
}

/// The interface carrying the default route.
pub fn default_interface() -> Result<Interface, InterceptorError> {
    let route = default_route()?;
    Interface::find(&route.interface)
}

pub fn default_gateway() -> Result<Ipv4Address, InterceptorError> {
    Ok(default_route()?.gateway)
}

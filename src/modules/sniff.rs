// Passive capture: filtered packet dumps, host and service gathering.

use std::fmt::Write as _;

use crate::error::InterceptorError;
use crate::filter::Filter;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::net::addr::{Ipv4Address, MacAddress};
use crate::net::packet::CapturedPacket;
use crate::net::protocols::{PROTO_TCP, TcpHeader};
use crate::net::socket::{RecvParams, layer2, layer3};
use crate::store::HostStore;
use crate::task::OutputSink;

use super::INTERFACE_PARAM;

const DUMP_WIDTH: usize = 16;

/// Offset, hex bytes and printable ASCII, sixteen bytes per row.
pub fn hexdump(data: &[u8]) -> String {
    let mut text = String::new();
    for (row, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
        let _ = write!(text, "{:04x}  ", row * DUMP_WIDTH);
        for i in 0..DUMP_WIDTH {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(text, "{b:02x} ");
                }
                None => text.push_str("   "),
            }
        }
        text.push(' ');
        text.push_str(&asciidump(chunk));
        text.push('\n');
    }
    text
}

/// Printable ASCII with everything else shown as '.'.
pub fn asciidump(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

// ---------------------------------------------------------------------------
// sniff.dump
// ---------------------------------------------------------------------------

pub struct SniffDump;

const DUMP_PARAMS: &[ParamSpec] = &[
    INTERFACE_PARAM,
    ParamSpec::with_default("filter", ParamKind::Str, "", "packet filter expression"),
    ParamSpec::with_default("hexdump", ParamKind::Bool, "false", "print frame bytes in hex"),
    ParamSpec::with_default("asciidump", ParamKind::Bool, "false", "print frame bytes as text"),
];

impl Module for SniffDump {
    fn name(&self) -> &'static str {
        "sniff.dump"
    }

    fn description(&self) -> &'static str {
        "Print captured frames that match a filter"
    }

    fn params(&self) -> &'static [ParamSpec] {
        DUMP_PARAMS
    }

    fn stoppable(&self) -> bool {
        true
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let filter = match Filter::compile(args.str("filter").unwrap_or("")) {
            Ok(filter) => filter,
            Err(e) => {
                out.line(format_args!("Failed to compile filter: {e}"));
                return Ok(false);
            }
        };
        let hex = args.flag("hexdump");
        let ascii = args.flag("asciidump");

        let iface = ctx.interface(args)?;
        let mut sock = ctx.open(&iface)?;
        log::info!("sniffing on {} with filter '{filter}'", iface.name);

        let params = RecvParams::one(ctx.config.recv_timeout).with_cancel(ctx.cancel.clone());
        let mut seen = 0usize;
        while !ctx.is_cancelled() {
            for frame in layer2::recv(&mut sock, &params, |frame| filter.matches(frame))? {
                seen += 1;
                let raw = frame.encode();
                out.line(CapturedPacket::from_frame(frame));
                if hex {
                    out.write(hexdump(&raw));
                } else if ascii {
                    out.line(asciidump(&raw));
                }
            }
        }

        out.line(format_args!("Captured {seen} packets."));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// sniff.gather.hosts
// ---------------------------------------------------------------------------

pub struct GatherHosts;

const GATHER_PARAMS: &[ParamSpec] = &[INTERFACE_PARAM];

/// Record one observed (mac, ip) pairing. Only private unicast addresses
/// are kept; a broadcast MAC records the address alone.
fn observe(
    store: &dyn HostStore,
    out: &OutputSink,
    subnet_broadcast: Option<Ipv4Address>,
    mac: MacAddress,
    ip: Ipv4Address,
) -> Result<(), InterceptorError> {
    if !ip.is_private() || ip.is_multicast() || Some(ip) == subnet_broadcast {
        return Ok(());
    }
    let existing = store.search_hosts(Some(ip), None)?.into_iter().next();

    if mac == MacAddress::BROADCAST {
        if existing.is_none() {
            let id = store.add_host(Some(ip), None, None)?;
            out.line(format_args!("Added host {id}."));
        }
        return Ok(());
    }

    match existing {
        None => {
            let id = store.add_host(Some(ip), None, Some(mac))?;
            out.line(format_args!("Added host {id} ({ip}, {mac})"));
        }
        Some(host) => match host.mac {
            None => store.set_host(host.id, None, None, Some(mac))?,
            Some(known) if known != mac => {
                out.line(format_args!("WARNING: MAC address conflict for host {}", host.id));
            }
            Some(_) => {}
        },
    }
    Ok(())
}

impl Module for GatherHosts {
    fn name(&self) -> &'static str {
        "sniff.gather.hosts"
    }

    fn description(&self) -> &'static str {
        "Passively add hosts seen in IPv4 traffic to the database"
    }

    fn params(&self) -> &'static [ParamSpec] {
        GATHER_PARAMS
    }

    fn stoppable(&self) -> bool {
        true
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let iface = ctx.interface(args)?;
        let subnet_broadcast = iface.broadcast();
        let mut sock = ctx.open(&iface)?;

        out.line("Beginning host sniffing.");
        let params = RecvParams::one(ctx.config.recv_timeout).with_cancel(ctx.cancel.clone());
        while !ctx.is_cancelled() {
            for datagram in layer3::recv(&mut sock, &params, |_, _| true)? {
                let pkt = &datagram.packet;
                for (mac, ip) in [(datagram.src_mac, pkt.src), (datagram.dst_mac, pkt.dst)] {
                    observe(ctx.store.as_ref(), out, subnet_broadcast, mac, ip)?;
                }
            }
        }
        out.line("Stopping host gathering.");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// sniff.gather.services
// ---------------------------------------------------------------------------

pub struct GatherServices;

const SERVICES_PARAMS: &[ParamSpec] = &[
    INTERFACE_PARAM,
    ParamSpec::with_default(
        "ignore_unknown_hosts",
        ParamKind::Bool,
        "false",
        "only record services of hosts already in the database",
    ),
];

/// Record the port a private host answered a handshake from. Returns the
/// new service id, or `None` when nothing was added.
fn observe_service(
    store: &dyn HostStore,
    src_mac: MacAddress,
    ip: Ipv4Address,
    port: u16,
    ignore_unknown_hosts: bool,
) -> Result<Option<u64>, InterceptorError> {
    let host_id = match store.search_hosts(Some(ip), None)?.first() {
        Some(host) => host.id,
        None if ignore_unknown_hosts => return Ok(None),
        None => store.add_host(Some(ip), None, Some(src_mac))?,
    };
    if !store
        .search_services(Some(host_id), Some(port), Some("TCP"))?
        .is_empty()
    {
        return Ok(None);
    }
    store.add_service(host_id, "TCP", port, "").map(Some)
}

impl Module for GatherServices {
    fn name(&self) -> &'static str {
        "sniff.gather.services"
    }

    fn description(&self) -> &'static str {
        "Passively add TCP services to the database when a host answers a handshake"
    }

    fn params(&self) -> &'static [ParamSpec] {
        SERVICES_PARAMS
    }

    fn stoppable(&self) -> bool {
        true
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let ignore_unknown_hosts = args.flag("ignore_unknown_hosts");
        let iface = ctx.interface(args)?;
        let mut sock = ctx.open(&iface)?;

        out.line("Beginning service sniffing.");
        let params = RecvParams::one(ctx.config.recv_timeout).with_cancel(ctx.cancel.clone());
        while !ctx.is_cancelled() {
            let answers = layer3::recv(&mut sock, &params, |_, pkt| {
                pkt.protocol == PROTO_TCP && !pkt.src.is_public()
            })?;
            for datagram in answers {
                let pkt = &datagram.packet;
                let Ok(tcp) = TcpHeader::decode(&pkt.payload) else {
                    continue;
                };
                if !(tcp.flags.syn() && tcp.flags.ack()) {
                    continue;
                }
                let added = observe_service(
                    ctx.store.as_ref(),
                    datagram.src_mac,
                    pkt.src,
                    tcp.src_port,
                    ignore_unknown_hosts,
                )?;
                if let Some(id) = added {
                    out.line(format_args!("Added service {id} ({}, {}, TCP)", pkt.src, tcp.src_port));
                }
            }
        }
        out.line("Stopping service gathering.");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::{self, MockNetwork, OUR_IP, OUR_MAC};
    use crate::net::protocols::{
        ETHERTYPE_ARP, ETHERTYPE_IPV4, EthernetFrame, IcmpPacket, Ipv4Packet, PROTO_ICMP,
    };
    use crate::modules::testing::run_briefly;
    use crate::net::socket::MemoryLink;

    const PEER_MAC: MacAddress = MacAddress::new([0xcc, 0, 0, 0, 0, 1]);
    const PEER_IP: Ipv4Address = Ipv4Address::new(192, 168, 1, 40);

    fn ping(src: (MacAddress, Ipv4Address), dst: (MacAddress, Ipv4Address)) -> Vec<u8> {
        let icmp = IcmpPacket::echo_request(1, 1, b"hi there".to_vec());
        let ip = Ipv4Packet::new(src.1, dst.1, PROTO_ICMP, icmp.encode());
        EthernetFrame::new(dst.0, src.0, ETHERTYPE_IPV4, ip.encode()).encode()
    }

    fn network_with(frames: Vec<Vec<u8>>) -> MockNetwork {
        MockNetwork::new(move || {
            let mut link = MemoryLink::new("mock0");
            for frame in &frames {
                link.push_inbound(frame.clone());
            }
            link
        })
    }

    #[test]
    fn ut_hexdump_layout() {
        let dump = hexdump(b"ABCDEFGHIJKLMNOPQR\x00");
        let rows: Vec<&str> = dump.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("0000  41 42 43"));
        assert!(rows[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(rows[1].starts_with("0010  51 52 00"));
        assert!(rows[1].ends_with("QR."));
        assert_eq!(asciidump(b"a\tb"), "a.b");
    }

    #[test]
    fn ut_dump_bad_filter_reports_and_fails() {
        let (ctx, _) = testing::context(network_with(vec![]));
        let (result, out) = testing::run(&SniffDump, &ctx, &[("filter", "rm -rf")]);
        assert!(!result.unwrap());
        assert!(out.starts_with("Failed to compile filter:"));
    }

    #[test]
    fn ut_dump_prints_matching_frames() {
        let arp = crate::net::protocols::ArpPacket::request(PEER_MAC, PEER_IP, OUR_IP);
        let frames = vec![
            EthernetFrame::new(MacAddress::BROADCAST, PEER_MAC, ETHERTYPE_ARP, arp.encode()).encode(),
            ping((PEER_MAC, PEER_IP), (OUR_MAC, OUR_IP)),
        ];
        let (ctx, _) = testing::context(network_with(frames));

        let (result, out) = run_briefly(&SniffDump, &ctx, &[("filter", "icmp"), ("asciidump", "true")]);
        assert!(result.unwrap());
        assert!(out.contains(&format!("{PEER_IP}")));
        assert!(out.contains("hi there"));
        assert!(out.contains("Captured 1 packets."));
    }

    #[test]
    fn ut_gather_adds_private_hosts_only() {
        let public = (MacAddress::new([0xdd, 0, 0, 0, 0, 1]), Ipv4Address::new(8, 8, 8, 8));
        let multicast = (MacAddress::new([0x01, 0, 0x5e, 0, 0, 1]), Ipv4Address::new(224, 0, 0, 1));
        let subnet_bcast = (MacAddress::BROADCAST, Ipv4Address::new(192, 168, 1, 255));
        let frames = vec![
            ping((PEER_MAC, PEER_IP), (OUR_MAC, OUR_IP)),
            ping((PEER_MAC, PEER_IP), public),
            ping((PEER_MAC, PEER_IP), multicast),
            ping((PEER_MAC, PEER_IP), subnet_bcast),
        ];
        let (ctx, store) = testing::context(network_with(frames));

        let (result, out) = run_briefly(&GatherHosts, &ctx, &[]);
        assert!(result.unwrap());
        assert!(out.contains(&format!("({PEER_IP}, {PEER_MAC})")));
        assert!(out.ends_with("Stopping host gathering.\n"));

        let hosts = store.all_hosts().unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts.iter().all(|h| h.ipv4.is_some_and(|ip| ip.is_private())));
        assert!(hosts.iter().any(|h| h.ipv4 == Some(OUR_IP) && h.mac == Some(OUR_MAC)));
    }

    #[test]
    fn ut_gather_flags_mac_conflicts() {
        let (ctx, store) = testing::context(network_with(vec![]));
        let (sink, rx) = OutputSink::channel();
        let other = MacAddress::new([0xcc, 0, 0, 0, 0, 2]);

        observe(ctx.store.as_ref(), &sink, None, MacAddress::BROADCAST, PEER_IP).unwrap();
        let id = store.search_hosts(Some(PEER_IP), None).unwrap()[0].id;
        assert_eq!(store.get_host(id).unwrap().unwrap().mac, None);

        observe(ctx.store.as_ref(), &sink, None, PEER_MAC, PEER_IP).unwrap();
        assert_eq!(store.get_host(id).unwrap().unwrap().mac, Some(PEER_MAC));

        observe(ctx.store.as_ref(), &sink, None, other, PEER_IP).unwrap();
        assert_eq!(store.get_host(id).unwrap().unwrap().mac, Some(PEER_MAC));
        drop(sink);
        let out: String = rx.try_iter().collect();
        assert!(out.contains(&format!("WARNING: MAC address conflict for host {id}")));
    }

    fn syn_ack(src: (MacAddress, Ipv4Address), port: u16, flags: u8) -> Vec<u8> {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&port.to_be_bytes());
        tcp[2..4].copy_from_slice(&51000u16.to_be_bytes());
        tcp[4..8].copy_from_slice(&7u32.to_be_bytes());
        tcp[8..12].copy_from_slice(&1u32.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;
        tcp[14..16].copy_from_slice(&1024u16.to_be_bytes());
        let ip = Ipv4Packet::new(src.1, OUR_IP, PROTO_TCP, tcp);
        EthernetFrame::new(OUR_MAC, src.0, ETHERTYPE_IPV4, ip.encode()).encode()
    }

    const SYN_ACK: u8 = 0x12;

    #[test]
    fn ut_services_added_once_per_port() {
        let public = (MacAddress::new([0xdd, 0, 0, 0, 0, 1]), Ipv4Address::new(8, 8, 8, 8));
        let frames = vec![
            syn_ack((PEER_MAC, PEER_IP), 22, SYN_ACK),
            syn_ack((PEER_MAC, PEER_IP), 22, SYN_ACK),
            syn_ack((PEER_MAC, PEER_IP), 80, 0x02),
            syn_ack((PEER_MAC, PEER_IP), 443, SYN_ACK),
            syn_ack(public, 443, SYN_ACK),
        ];
        let (ctx, store) = testing::context(network_with(frames));

        let (result, out) = run_briefly(&GatherServices, &ctx, &[]);
        assert!(result.unwrap());
        assert!(out.starts_with("Beginning service sniffing.\n"));
        assert_eq!(out.matches(&format!("({PEER_IP}, 22, TCP)")).count(), 1);
        assert!(out.contains(&format!("({PEER_IP}, 443, TCP)")));
        assert!(out.ends_with("Stopping service gathering.\n"));

        let hosts = store.all_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].mac, Some(PEER_MAC));
        let mut ports: Vec<u16> = store.all_services().unwrap().iter().map(|s| s.port).collect();
        ports.sort_unstable();
        assert_eq!(ports, [22, 443]);
        assert!(store.all_services().unwrap().iter().all(|s| s.host_id == hosts[0].id));
    }

    #[test]
    fn ut_services_skip_unknown_hosts_when_asked() {
        let known_ip = Ipv4Address::new(192, 168, 1, 41);
        let known_mac = MacAddress::new([0xcc, 0, 0, 0, 0, 9]);
        let frames = vec![
            syn_ack((PEER_MAC, PEER_IP), 22, SYN_ACK),
            syn_ack((known_mac, known_ip), 3306, SYN_ACK),
        ];
        let (ctx, store) = testing::context(network_with(frames));
        let known = store.add_host(Some(known_ip), None, None).unwrap();
        store.add_service(known, "tcp", 8080, "http").unwrap();

        let (result, out) = run_briefly(&GatherServices, &ctx, &[("ignore_unknown_hosts", "true")]);
        assert!(result.unwrap());
        assert!(!out.contains(&PEER_IP.to_string()));
        assert!(out.contains(&format!("({known_ip}, 3306, TCP)")));

        assert!(store.search_hosts(Some(PEER_IP), None).unwrap().is_empty());
        let found = store.search_services(Some(known), Some(3306), Some("tcp")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.all_services().unwrap().len(), 2);
    }

    #[test]
    fn ut_services_match_existing_protocol_case_insensitively() {
        let (ctx, store) = testing::context(network_with(vec![]));
        let host = store.add_host(Some(PEER_IP), None, Some(PEER_MAC)).unwrap();
        store.add_service(host, "tcp", 22, "ssh").unwrap();

        let added = observe_service(ctx.store.as_ref(), PEER_MAC, PEER_IP, 22, false).unwrap();
        assert_eq!(added, None);
        let added = observe_service(ctx.store.as_ref(), PEER_MAC, PEER_IP, 25, false).unwrap();
        assert!(added.is_some());
    }
}

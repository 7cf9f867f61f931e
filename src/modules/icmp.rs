// ICMP echo sweep.

use rand::Rng;

use crate::error::InterceptorError;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::net::addr::parse_targets;
use crate::net::protocols::{IcmpPacket, IcmpType, PROTO_ICMP};
use crate::net::socket::{RecvParams, layer3};
use crate::task::OutputSink;

use super::{INTERFACE_PARAM, seconds};

const ECHO_PAYLOAD: &[u8] = b"1234567890";

pub struct PingSweep;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::required("range", ParamKind::Str, "CIDR block, a-b range or address"),
    ParamSpec::with_default("timeout", ParamKind::Float, "1.0", "seconds to wait per host"),
    INTERFACE_PARAM,
];

impl Module for PingSweep {
    fn name(&self) -> &'static str {
        "discover.icmp.pingsweep"
    }

    fn description(&self) -> &'static str {
        "Send ICMP echo requests across a range and record the hosts that answer"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
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
        let mut sock = ctx.open(&iface)?;

        let id: u16 = rand::thread_rng().r#gen();
        let mut live = 0usize;

        for (seq, ip) in targets.enumerate() {
            if ctx.is_cancelled() {
                out.line("Sweep stopped.");
                break;
            }
            let seq = seq as u16;
            out.line(format_args!("Sending ECHO REQUEST to {ip}"));

            let request = IcmpPacket::echo_request(id, seq, ECHO_PAYLOAD.to_vec());
            match layer3::send(
                &mut sock,
                &ctx.resolver,
                &iface,
                ip,
                PROTO_ICMP,
                &request.encode(),
                ctx.config.arp_timeout,
            ) {
                Ok(()) => {}
                Err(InterceptorError::HostUnresolved(_)) => {
                    out.line(format_args!("No reply from {ip}"));
                    continue;
                }
                Err(e) => return Err(e),
            }

            let params = RecvParams::one(timeout).with_cancel(ctx.cancel.clone());
            let replies = layer3::recv(&mut sock, &params, |_, pkt| {
                pkt.protocol == PROTO_ICMP
                    && pkt.src == ip
                    && IcmpPacket::decode(&pkt.payload).is_ok_and(|reply| {
                        reply.is_type(IcmpType::EchoReply) && reply.id == id && reply.seq == seq
                    })
            })?;

            if replies.is_empty() {
                out.line(format_args!("No reply from {ip}"));
                continue;
            }
            out.line(format_args!("Received ECHO REPLY from {ip}"));
            live += 1;
            if ctx.store.search_hosts(Some(ip), None)?.is_empty() {
                let host_id = ctx.store.add_host(Some(ip), None, None)?;
                log::debug!("pingsweep added host {host_id} for {ip}");
            }
        }

        out.line(format_args!("{live} hosts responded."));
        Ok(true)
    }
}

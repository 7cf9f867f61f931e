// Built-in modules.

pub mod arp;
pub mod db;
pub mod icmp;
pub mod mitm;
pub mod sniff;
pub mod util;

use std::sync::Arc;
use std::time::Duration;

use crate::module::{ModuleRegistry, ParamKind, ParamSpec};

/// The optional `interface` parameter shared by network modules.
pub(crate) const INTERFACE_PARAM: ParamSpec = ParamSpec::optional(
    "interface",
    ParamKind::Interface,
    "interface name, IPv4 or MAC (default: default route)",
);

/// A float seconds argument as a duration. Unset means one second;
/// negative values clamp to zero.
pub(crate) fn seconds(value: Option<f64>) -> Duration {
    Duration::try_from_secs_f64(value.unwrap_or(1.0).max(0.0)).unwrap_or(Duration::MAX)
}

pub fn register_builtin(registry: &mut ModuleRegistry) {
    registry.register(Arc::new(arp::ArpLookup));
    registry.register(Arc::new(arp::ArpScan));
    registry.register(Arc::new(arp::ArpSpoof));
    registry.register(Arc::new(mitm::IpForward));
    registry.register(Arc::new(icmp::PingSweep));
    registry.register(Arc::new(sniff::SniffDump));
    registry.register(Arc::new(sniff::GatherHosts));
    registry.register(Arc::new(sniff::GatherServices));
    registry.register(Arc::new(db::AddHost));
    registry.register(Arc::new(db::SetHost));
    registry.register(Arc::new(db::AddService));
    registry.register(Arc::new(db::AddCredential));
    registry.register(Arc::new(util::Count));
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_seconds_conversion() {
        assert_eq!(seconds(None), Duration::from_secs(1));
        assert_eq!(seconds(Some(0.25)), Duration::from_millis(250));
        assert_eq!(seconds(Some(-3.0)), Duration::ZERO);
    }

    #[test]
    fn ut_every_builtin_registered_once() {
        let registry = ModuleRegistry::builtin();
        let names = registry.list("");
        assert_eq!(names.len(), 13);
        for name in [
            "arp.lookup",
            "discover.arp.scan",
            "discover.icmp.pingsweep",
            "mitm.arp.spoof",
            "mitm.ip.forward",
            "sniff.dump",
            "sniff.gather.hosts",
            "sniff.gather.services",
            "db.add_host",
            "db.set_host",
            "db.add_service",
            "db.add_credential",
            "util.count",
        ] {
            assert!(names.contains(&name), "{name} missing");
        }
    }
}

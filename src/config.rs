use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the control plane and every module run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// JSON snapshot backing the host store. `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
    /// How long next-hop ARP resolution waits for a reply.
    pub arp_timeout: Duration,
    /// Bound on a single blocking-style receive in modules.
    pub recv_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            arp_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(5),
        }
    }
}

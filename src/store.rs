// Host, service and credential store.
//
// The core only needs simple CRUD by numeric id plus attribute search, so
// the store is a trait. `MemoryStore` keeps three id-keyed tables in memory
// and can mirror them to a JSON snapshot file after every change.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: u64,
    pub ipv4: Option<Ipv4Address>,
    pub ipv6: Option<String>,
    pub mac: Option<MacAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: u64,
    pub host_id: u64,
    pub transport_protocol: String,
    pub port: u16,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: u64,
    pub service_id: u64,
    pub login_name: String,
    pub credential: String,
}

fn or_dash<T: fmt::Display>(v: &Option<T>) -> String {
    v.as_ref().map_or_else(|| "-".to_string(), T::to_string)
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  {:<15}  {:<17}  {}",
            self.id,
            or_dash(&self.ipv4),
            or_dash(&self.mac),
            or_dash(&self.ipv6)
        )
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  host {:<4}  {}/{:<5}  {}",
            self.id, self.host_id, self.transport_protocol, self.port, self.service
        )
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  service {:<4}  {}:{}",
            self.id, self.service_id, self.login_name, self.credential
        )
    }
}

/// Persistent facts about the network. Implementations must tolerate
/// concurrent callers; last write wins.
pub trait HostStore: Send + Sync {
    fn add_host(
        &self,
        ipv4: Option<Ipv4Address>,
        ipv6: Option<String>,
        mac: Option<MacAddress>,
    ) -> Result<u64, InterceptorError>;

    fn get_host(&self, id: u64) -> Result<Option<Host>, InterceptorError>;

    /// Hosts matching every given attribute. No attributes matches all.
    fn search_hosts(
        &self,
        ipv4: Option<Ipv4Address>,
        mac: Option<MacAddress>,
    ) -> Result<Vec<Host>, InterceptorError>;

    /// Overwrite the given attributes; `None` leaves a field unchanged.
    fn set_host(
        &self,
        id: u64,
        ipv4: Option<Ipv4Address>,
        ipv6: Option<String>,
        mac: Option<MacAddress>,
    ) -> Result<(), InterceptorError>;

    fn add_service(
        &self,
        host_id: u64,
        transport_protocol: &str,
        port: u16,
        service: &str,
    ) -> Result<u64, InterceptorError>;

    fn get_service(&self, id: u64) -> Result<Option<Service>, InterceptorError>;

    /// Services matching every given attribute. Protocols compare
    /// case-insensitively.
    fn search_services(
        &self,
        host_id: Option<u64>,
        port: Option<u16>,
        transport_protocol: Option<&str>,
    ) -> Result<Vec<Service>, InterceptorError>;

    fn add_credential(
        &self,
        service_id: u64,
        login_name: &str,
        credential: &str,
    ) -> Result<u64, InterceptorError>;

    fn get_credential(&self, id: u64) -> Result<Option<Credential>, InterceptorError>;

    fn all_hosts(&self) -> Result<Vec<Host>, InterceptorError>;

    fn all_services(&self) -> Result<Vec<Service>, InterceptorError>;

    fn all_credentials(&self) -> Result<Vec<Credential>, InterceptorError>;

    /// Delete every row in every table.
    fn clear(&self) -> Result<(), InterceptorError>;
}

/// Record `mac` for `ip`, updating an existing host or adding a new one.
pub fn remember_mac(
    store: &dyn HostStore,
    ip: Ipv4Address,
    mac: MacAddress,
) -> Result<u64, InterceptorError> {
    match store.search_hosts(Some(ip), None)?.first() {
        Some(host) => {
            if host.mac != Some(mac) {
                store.set_host(host.id, None, None, Some(mac))?;
            }
            Ok(host.id)
        }
        None => store.add_host(Some(ip), None, Some(mac)),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    hosts: BTreeMap<u64, Host>,
    services: BTreeMap<u64, Service>,
    credentials: BTreeMap<u64, Credential>,
}

impl Tables {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store with optional JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists; later changes are written
    /// back to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InterceptorError> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| InterceptorError::Store(format!("read {}: {e}", path.display())))?;
            serde_json::from_str(&text)
                .map_err(|e| InterceptorError::Store(format!("parse {}: {e}", path.display())))?
        } else {
            Tables::default()
        };
        log::debug!(
            "store {} opened with {} hosts",
            path.display(),
            tables.hosts.len()
        );
        Ok(Self {
            tables: Mutex::new(tables),
            path: Some(path),
        })
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` under the lock. With a snapshot file the change is
    /// made on a copy and only committed once the copy is on disk.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Tables) -> Result<T, InterceptorError>,
    ) -> Result<T, InterceptorError> {
        let mut tables = self.tables();
        let Some(path) = &self.path else {
            return change(&mut tables);
        };
        let mut next = tables.clone();
        let value = change(&mut next)?;
        persist(path, &next)?;
        *tables = next;
        Ok(value)
    }
}

fn persist(path: &Path, tables: &Tables) -> Result<(), InterceptorError> {
    let json = serde_json::to_string_pretty(tables)
        .map_err(|e| InterceptorError::Store(format!("serialize store: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| InterceptorError::Store(format!("write {}: {e}", path.display())))?;
    log::trace!("store snapshot written to {}", path.display());
    Ok(())
}

impl HostStore for MemoryStore {
    fn add_host(
        &self,
        ipv4: Option<Ipv4Address>,
        ipv6: Option<String>,
        mac: Option<MacAddress>,
    ) -> Result<u64, InterceptorError> {
        self.mutate(|t| {
            let id = t.allocate();
            t.hosts.insert(id, Host { id, ipv4, ipv6, mac });
            Ok(id)
        })
    }

    fn get_host(&self, id: u64) -> Result<Option<Host>, InterceptorError> {
        Ok(self.tables().hosts.get(&id).cloned())
    }

    fn search_hosts(
        &self,
        ipv4: Option<Ipv4Address>,
        mac: Option<MacAddress>,
    ) -> Result<Vec<Host>, InterceptorError> {
        Ok(self
            .tables()
            .hosts
            .values()
            .filter(|h| ipv4.is_none() || h.ipv4 == ipv4)
            .filter(|h| mac.is_none() || h.mac == mac)
            .cloned()
            .collect())
    }

    fn set_host(
        &self,
        id: u64,
        ipv4: Option<Ipv4Address>,
        ipv6: Option<String>,
        mac: Option<MacAddress>,
    ) -> Result<(), InterceptorError> {
        self.mutate(|t| {
            let host = t
                .hosts
                .get_mut(&id)
                .ok_or(InterceptorError::HostNotFound(id))?;
            if ipv4.is_some() {
                host.ipv4 = ipv4;
            }
            if ipv6.is_some() {
                host.ipv6 = ipv6;
            }
            if mac.is_some() {
                host.mac = mac;
            }
            Ok(())
        })
    }

    fn add_service(
        &self,
        host_id: u64,
        transport_protocol: &str,
        port: u16,
        service: &str,
    ) -> Result<u64, InterceptorError> {
        self.mutate(|t| {
            if !t.hosts.contains_key(&host_id) {
                return Err(InterceptorError::HostNotFound(host_id));
            }
            let id = t.allocate();
            t.services.insert(
                id,
                Service {
                    id,
                    host_id,
                    transport_protocol: transport_protocol.to_string(),
                    port,
                    service: service.to_string(),
                },
            );
            Ok(id)
        })
    }

    fn get_service(&self, id: u64) -> Result<Option<Service>, InterceptorError> {
        Ok(self.tables().services.get(&id).cloned())
    }

    fn search_services(
        &self,
        host_id: Option<u64>,
        port: Option<u16>,
        transport_protocol: Option<&str>,
    ) -> Result<Vec<Service>, InterceptorError> {
        Ok(self
            .tables()
            .services
            .values()
            .filter(|s| host_id.is_none_or(|id| s.host_id == id))
            .filter(|s| port.is_none_or(|p| s.port == p))
            .filter(|s| {
                transport_protocol.is_none_or(|t| s.transport_protocol.eq_ignore_ascii_case(t))
            })
            .cloned()
            .collect())
    }

    fn add_credential(
        &self,
        service_id: u64,
        login_name: &str,
        credential: &str,
    ) -> Result<u64, InterceptorError> {
        self.mutate(|t| {
            if !t.services.contains_key(&service_id) {
                return Err(InterceptorError::ServiceNotFound(service_id));
            }
            let id = t.allocate();
            t.credentials.insert(
                id,
                Credential {
                    id,
                    service_id,
                    login_name: login_name.to_string(),
                    credential: credential.to_string(),
                },
            );
            Ok(id)
        })
    }

    fn get_credential(&self, id: u64) -> Result<Option<Credential>, InterceptorError> {
        Ok(self.tables().credentials.get(&id).cloned())
    }

    fn all_hosts(&self) -> Result<Vec<Host>, InterceptorError> {
        Ok(self.tables().hosts.values().cloned().collect())
    }

    fn all_services(&self) -> Result<Vec<Service>, InterceptorError> {
        Ok(self.tables().services.values().cloned().collect())
    }

    fn all_credentials(&self) -> Result<Vec<Credential>, InterceptorError> {
        Ok(self.tables().credentials.values().cloned().collect())
    }

    fn clear(&self) -> Result<(), InterceptorError> {
        log::info!("clearing all stored data");
        self.mutate(|t| {
            *t = Tables::default();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: Ipv4Address = Ipv4Address::new(192, 168, 1, 7);
    const MAC: MacAddress = MacAddress::new([0xAA, 0xBB, 0xCC, 0, 0, 1]);

    #[test]
    fn ut_ids_are_sequential_and_searchable() {
        let store = MemoryStore::new();
        let a = store.add_host(Some(IP), None, None).unwrap();
        let b = store.add_host(None, None, Some(MAC)).unwrap();
        assert!(b > a);
        assert_eq!(store.search_hosts(Some(IP), None).unwrap()[0].id, a);
        assert_eq!(store.search_hosts(None, Some(MAC)).unwrap()[0].id, b);
        assert!(store.search_hosts(Some(IP), Some(MAC)).unwrap().is_empty());
        assert_eq!(store.search_hosts(None, None).unwrap().len(), 2);
    }

    #[test]
    fn ut_set_host_keeps_unset_fields() {
        let store = MemoryStore::new();
        let id = store.add_host(Some(IP), Some("fe80::1".into()), None).unwrap();
        store.set_host(id, None, None, Some(MAC)).unwrap();
        let host = store.get_host(id).unwrap().unwrap();
        assert_eq!(host.ipv4, Some(IP));
        assert_eq!(host.ipv6.as_deref(), Some("fe80::1"));
        assert_eq!(host.mac, Some(MAC));
        assert!(matches!(
            store.set_host(99, None, None, None),
            Err(InterceptorError::HostNotFound(99))
        ));
    }

    #[test]
    fn ut_remember_mac_upserts() {
        let store = MemoryStore::new();
        let id = remember_mac(&store, IP, MAC).unwrap();
        assert_eq!(remember_mac(&store, IP, MAC).unwrap(), id);
        assert_eq!(store.all_hosts().unwrap().len(), 1);
    }

    #[test]
    fn ut_services_and_credentials_need_parents() {
        let store = MemoryStore::new();
        assert!(store.add_service(1, "tcp", 22, "ssh").is_err());
        let host = store.add_host(Some(IP), None, None).unwrap();
        let svc = store.add_service(host, "tcp", 22, "ssh").unwrap();
        let cred = store.add_credential(svc, "root", "toor").unwrap();
        assert_eq!(store.get_credential(cred).unwrap().unwrap().login_name, "root");
        store.clear().unwrap();
        assert!(store.all_services().unwrap().is_empty());
        assert!(store.get_host(host).unwrap().is_none());
    }

    #[test]
    fn ut_search_services_by_attribute() {
        let store = MemoryStore::new();
        let host = store.add_host(Some(IP), None, None).unwrap();
        let ssh = store.add_service(host, "tcp", 22, "ssh").unwrap();
        store.add_service(host, "udp", 53, "dns").unwrap();

        let found = store.search_services(Some(host), Some(22), Some("TCP")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ssh);
        assert!(store.search_services(Some(host), Some(22), Some("udp")).unwrap().is_empty());
        assert_eq!(store.search_services(Some(host), None, None).unwrap().len(), 2);
        assert!(store.search_services(Some(host + 100), None, None).unwrap().is_empty());
    }

    #[test]
    fn ut_failed_snapshot_write_leaves_store_unchanged() {
        let dir = std::env::temp_dir().join(format!("interceptor-store-fail-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let store = MemoryStore::open(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(
            store.add_host(Some(IP), None, None),
            Err(InterceptorError::Store(_))
        ));
        assert!(store.all_hosts().unwrap().is_empty());

        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(store.add_host(Some(IP), None, None).unwrap(), 1);
        assert_eq!(store.all_hosts().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn ut_snapshot_round_trip() {
        let dir = std::env::temp_dir().join(format!("interceptor-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let _ = std::fs::remove_file(&path);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.add_host(Some(IP), None, Some(MAC)).unwrap();
        }
        let store = MemoryStore::open(&path).unwrap();
        let hosts = store.all_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].mac, Some(MAC));
        assert_eq!(store.add_host(None, None, None).unwrap(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! Local node identity
//!
//! The identity of this machine is the id of the server it runs as. It is
//! looked up in this order, stopping at the first hit:
//!
//! 1. the reboot-scoped cache file (`/dev/shm` is cleared on reboot, so the
//!    cache needs no expiry of its own), then the cloud-init instance id
//! 2. matching the local IPv4 addresses against the network map of every
//!    active server of the scaling group
//!
//! A match found by the scan is written back to the cache file.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use sysinfo::Networks;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::scaling_group::ScalingGroup;

pub const REBOOT_SCOPED_DIR: &str = "/dev/shm";
pub const CACHE_FILE_NAME: &str = "fleet-autoscaler.uuid";
pub const CLOUD_INIT_INSTANCE_ID: &str = "/var/lib/cloud/data/instance-id";

/// Instance id cloud-init writes when no datasource is configured
pub const NO_DATASOURCE: &str = "iid-datasource-none";

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCache {
    cache_file: Option<PathBuf>,
    cloud_init_file: Option<PathBuf>,
}

impl IdentityCache {
    /// Cache locations of this host.
    ///
    /// Without a reboot-scoped directory file caching is disabled.
    pub fn system() -> Self {
        let dir = Path::new(REBOOT_SCOPED_DIR);
        let cache_file = dir.is_dir().then(|| dir.join(CACHE_FILE_NAME));
        if cache_file.is_none() {
            debug!("{REBOOT_SCOPED_DIR} not available, identity caching disabled");
        }

        Self {
            cache_file,
            cloud_init_file: Some(PathBuf::from(CLOUD_INIT_INSTANCE_ID)),
        }
    }

    pub fn new(cache_file: Option<PathBuf>, cloud_init_file: Option<PathBuf>) -> Self {
        Self {
            cache_file,
            cloud_init_file,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn read(&self) -> Option<Uuid> {
        if let Some(id) = self.cache_file.as_deref().and_then(read_uuid) {
            debug!("node id {id} read from cache");
            return Some(id);
        }

        let path = self.cloud_init_file.as_deref()?;
        let content = std::fs::read_to_string(path).ok()?;
        let content = content.trim();
        if content == NO_DATASOURCE {
            debug!("cloud-init has no datasource, ignoring its instance id");
            return None;
        }

        let id = Uuid::parse_str(content).ok()?;
        debug!("node id {id} read from cloud-init");
        Some(id)
    }

    /// Best effort: a failed write only costs a rescan on the next run.
    pub fn store(&self, id: &Uuid) {
        let Some(path) = &self.cache_file else {
            return;
        };

        if let Err(e) = std::fs::write(path, id.to_string()) {
            warn!("unable to cache node id in {}: {e}", path.display());
        }
    }
}

fn read_uuid(path: &Path) -> Option<Uuid> {
    let content = std::fs::read_to_string(path).ok()?;
    Uuid::parse_str(content.trim()).ok()
}

/// Source of the local addresses used for matching
#[derive(Debug, Clone, PartialEq)]
pub enum LocalAddresses {
    /// Enumerate the interfaces of this host
    System,
    Fixed(HashSet<IpAddr>),
}

impl LocalAddresses {
    /// Non-loopback IPv4 addresses.
    pub fn collect(&self) -> HashSet<IpAddr> {
        let all: HashSet<IpAddr> = match self {
            LocalAddresses::System => {
                let networks = Networks::new_with_refreshed_list();
                networks
                    .list()
                    .values()
                    .flat_map(|data| data.ip_networks().iter().map(|network| network.addr))
                    .collect()
            }
            LocalAddresses::Fixed(addresses) => addresses.clone(),
        };

        all.into_iter()
            .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    cache: IdentityCache,
    local: LocalAddresses,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(IdentityCache::system(), LocalAddresses::System)
    }
}

impl IdentityResolver {
    pub fn new(cache: IdentityCache, local: LocalAddresses) -> Self {
        Self { cache, local }
    }

    /// Resolve the id of the server this process runs on.
    #[instrument(skip_all, fields(group = %group.name()))]
    pub async fn resolve(&self, group: &ScalingGroup) -> Option<Uuid> {
        if let Some(id) = self.cache.read() {
            return Some(id);
        }

        let local = self.local.collect();
        if local.is_empty() {
            warn!("no local IPv4 address found");
            return None;
        }
        debug!("local addresses: {local:?}");

        for server_id in group.active_servers().await {
            // lookup failures are logged by the handle; try the next candidate
            let Some(server) = group.server(server_id).await else {
                continue;
            };

            if !server.addresses().any(|address| local.contains(address)) {
                continue;
            }

            match Uuid::parse_str(&server.id) {
                Ok(id) => {
                    info!("local addresses match server {} ({id})", server.name);
                    self.cache.store(&id);
                    return Some(id);
                }
                Err(e) => warn!("server id '{}' is not a uuid: {e}", server.id),
            }
        }

        None
    }
}

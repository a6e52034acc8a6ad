//! mDNS advertisement of the relay as `_bellphonics._tcp.local.`.
//!
//! The TXT record carries `service`, `version` and `path` so a hub can build
//! the `/speak` URL from a browse result alone, plus optional `zone` and
//! `subzone` placement hints.

use crate::config::DiscoveryConfig;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// DNS-SD service type the relay registers under.
pub const SERVICE_TYPE: &str = "_bellphonics._tcp.local.";

const DEFAULT_INSTANCE: &str = "Bellphonics";
const FALLBACK_HOST: &str = "bellphonics";
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur while registering the service.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS registration failed: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

/// One service record, fully resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub instance: String,
    /// Host name ending in `.local.`.
    pub host_name: String,
    pub port: u16,
    /// Empty when bound to the unspecified address; interfaces are then
    /// detected by the daemon.
    pub addresses: Vec<IpAddr>,
    pub properties: HashMap<String, String>,
}

impl Advertisement {
    /// Builds the record for a relay bound to `bind:port`.
    ///
    /// `local_host` is the machine's host name, used when `config.host` is
    /// empty.
    pub fn new(
        config: &DiscoveryConfig,
        default_instance: &str,
        bind: IpAddr,
        port: u16,
        local_host: Option<String>,
    ) -> Self {
        let instance = config
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| Some(default_instance.trim()).filter(|name| !name.is_empty()))
            .unwrap_or(DEFAULT_INSTANCE)
            .to_string();

        let addresses = if bind.is_unspecified() {
            Vec::new()
        } else {
            vec![bind]
        };

        Self {
            instance,
            host_name: mdns_host_name(&config.host, local_host.as_deref()),
            port,
            addresses,
            properties: txt_properties(config),
        }
    }
}

/// Normalizes a host name to the `<name>.local.` form mDNS requires.
fn mdns_host_name(configured: &str, local_host: Option<&str>) -> String {
    let base = Some(configured.trim())
        .filter(|host| !host.is_empty())
        .or_else(|| local_host.map(str::trim).filter(|host| !host.is_empty()))
        .unwrap_or(FALLBACK_HOST)
        .trim_end_matches('.');

    if base.to_ascii_lowercase().ends_with(".local") {
        format!("{}.", base)
    } else {
        format!("{}.local.", base)
    }
}

fn txt_properties(config: &DiscoveryConfig) -> HashMap<String, String> {
    let mut properties = HashMap::from([
        ("service".to_string(), "bellphonics".to_string()),
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("path".to_string(), "/speak".to_string()),
    ]);
    for (key, value) in [("zone", &config.zone), ("subzone", &config.subzone)] {
        let value = value.trim();
        if !value.is_empty() {
            properties.insert(key.to_string(), value.to_string());
        }
    }
    properties
}

/// A registered service; unregister it with [`MdnsAdvertiser::stop`].
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    /// Starts an mDNS responder and registers `advertisement` on it.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError` if the responder cannot start or the record
    /// is rejected.
    pub fn start(advertisement: Advertisement) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        let mut info = ServiceInfo::new(
            SERVICE_TYPE,
            &advertisement.instance,
            &advertisement.host_name,
            &advertisement.addresses[..],
            advertisement.port,
            advertisement.properties,
        )?;
        if advertisement.addresses.is_empty() {
            info = info.enable_addr_auto();
        }

        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;
        tracing::info!(
            service = %fullname,
            host = %advertisement.host_name,
            port = advertisement.port,
            "mDNS service registered"
        );

        Ok(Self { daemon, fullname })
    }

    /// Unregisters the service and shuts the responder down.
    ///
    /// Failures are logged; shutdown continues regardless.
    pub async fn stop(self) {
        let Self { daemon, fullname } = self;
        let result = tokio::task::spawn_blocking(move || {
            match daemon.unregister(&fullname) {
                Ok(receiver) => match receiver.recv_timeout(UNREGISTER_TIMEOUT) {
                    Ok(status) => {
                        tracing::info!(service = %fullname, ?status, "mDNS service unregistered")
                    }
                    Err(e) => {
                        tracing::warn!(service = %fullname, error = %e, "mDNS unregister unconfirmed")
                    }
                },
                Err(e) => {
                    tracing::warn!(service = %fullname, error = %e, "mDNS unregister failed")
                }
            }
            if let Err(e) = daemon.shutdown() {
                tracing::warn!(error = %e, "mDNS responder shutdown failed");
            }
        })
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "mDNS shutdown task failed");
        }
    }
}

//! Generated daemon configuration (config.toml) shipped in host bundles.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use canopy_types::{OrgName, Tag};
use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;

/// Where enrolled hosts find the rendezvous gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// The gateway's mesh address (`<prefix>::1`).
    pub mesh_address: Ipv6Addr,
    /// Public `host:port` endpoint, if the deployment has one configured.
    pub public_endpoint: Option<String>,
}

/// The group list embedded in a host's certificate: the reserved
/// per-organization group first, then the host's tags in order.
pub fn groups_for(org: &OrgName, tags: &[Tag]) -> Vec<String> {
    let mut groups = Vec::with_capacity(tags.len() + 1);
    groups.push(format!("org_{org}"));
    groups.extend(tags.iter().map(|t| t.to_string()));
    groups
}

/// Top-level generated config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub pki: PkiSection,
    pub rendezvous: RendezvousSection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_peer_map: BTreeMap<String, Vec<String>>,
    pub firewall: FirewallSection,
}

/// Paths inside the bundle; keys and certs travel next to the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiSection {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousSection {
    pub am_rendezvous: bool,
    pub interval_secs: u32,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallSection {
    pub conntrack: ConntrackSection,
    pub inbound_action: String,
    pub outbound_action: String,
    pub inbound: Vec<FirewallRule>,
    pub outbound: Vec<FirewallRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConntrackSection {
    pub default_timeout: String,
    pub tcp_timeout: String,
    pub udp_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    pub port: String,
    pub proto: String,
}

/// Builds the config for a host of the given organization: locked-down
/// inbound (same-organization group only), open outbound, gateway in the
/// static peer map when a public endpoint is configured.
#[must_use]
pub fn build_host_config(org: &OrgName, gateway: &GatewaySettings) -> HostConfig {
    let gateway_addr = gateway.mesh_address.to_string();
    let mut static_peer_map = BTreeMap::new();
    if let Some(endpoint) = &gateway.public_endpoint {
        static_peer_map.insert(gateway_addr.clone(), vec![endpoint.clone()]);
    }

    HostConfig {
        pki: PkiSection {
            ca: "./ca.crt".to_string(),
            cert: "./host.crt".to_string(),
            key: "./host.key".to_string(),
        },
        rendezvous: RendezvousSection {
            am_rendezvous: false,
            interval_secs: 60,
            hosts: vec![gateway_addr],
        },
        static_peer_map,
        firewall: FirewallSection {
            conntrack: ConntrackSection {
                default_timeout: "10m".to_string(),
                tcp_timeout: "12m".to_string(),
                udp_timeout: "3m".to_string(),
            },
            inbound_action: "drop".to_string(),
            outbound_action: "drop".to_string(),
            inbound: vec![FirewallRule {
                host: None,
                groups: Some(vec![format!("org_{org}")]),
                port: "any".to_string(),
                proto: "any".to_string(),
            }],
            outbound: vec![FirewallRule {
                host: Some("any".to_string()),
                groups: None,
                port: "any".to_string(),
                proto: "any".to_string(),
            }],
        },
    }
}

/// Renders the generated config as TOML.
pub fn render_host_config(org: &OrgName, gateway: &GatewaySettings) -> RegistryResult<String> {
    Ok(toml::to_string_pretty(&build_host_config(org, gateway))?)
}

//! Node configuration: the handful of knobs a node's bring-up code sets
//! before starting the routing tasks.
//!
//! A plain `serde`-derived struct loaded once at bring-up, not a
//! layered/hot-reloadable config system. Embedded callers that don't
//! carry a filesystem can just build the struct with
//! [`RoutingConfig::default`] and override fields directly.

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Which forwarding discipline the node runs. See [`crate::policy::RoutingPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Vector,
    Flooding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub local_address: Address,
    pub hello_interval_ms: u32,
    pub default_timeout_s: u32,
    pub max_history_nodes: usize,
    pub routing_policy: PolicyKind,
    pub default_hop_limit: u8,
    pub max_packet_size: u16,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            local_address: 0,
            hello_interval_ms: 120_000,
            default_timeout_s: 300,
            max_history_nodes: 64,
            routing_policy: PolicyKind::Vector,
            default_hop_limit: 10,
            max_packet_size: 255,
        }
    }
}

impl RoutingConfig {
    /// Parse a TOML document into a config, falling back to
    /// [`RoutingConfig::default`] for any field the document omits.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_s as u64 * 1000
    }
}

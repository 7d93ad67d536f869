//! Network connectivity queries.
//!
//! The download policy needs to know whether the device is online and, if
//! so, whether the active network is "Wi-Fi-like" (Wi-Fi, WiMAX or
//! Ethernet). Platforms answer this differently, so the engine only sees
//! the [`Connectivity`] trait.

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::state::DownloadPolicy;

/// Kind of network currently in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkType {
    /// No connectivity.
    None,
    /// Wi-Fi, WiMAX or Ethernet.
    #[default]
    WifiLike,
    /// Any other connected network (cellular, etc.).
    Other,
}

impl NetworkType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WifiLike => "wifi",
            Self::Other => "other",
        }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "offline" => Ok(Self::None),
            "wifi" | "wifi-like" | "ethernet" | "wimax" | "" => Ok(Self::WifiLike),
            "other" | "cellular" | "mobile" => Ok(Self::Other),
            other => Err(format!("unknown network type: {}", other)),
        }
    }
}

/// Answers "what network are we on right now".
pub trait Connectivity: Send + Sync {
    fn network_type(&self) -> NetworkType;
}

/// Connectivity fixed by configuration, adjustable at runtime.
#[derive(Debug, Default)]
pub struct StaticConnectivity {
    network: RwLock<NetworkType>,
}

impl StaticConnectivity {
    pub fn new(network: NetworkType) -> Self {
        Self {
            network: RwLock::new(network),
        }
    }

    /// Change the reported network type.
    pub fn set(&self, network: NetworkType) {
        *self.network.write() = network;
    }
}

impl Connectivity for StaticConnectivity {
    fn network_type(&self) -> NetworkType {
        *self.network.read()
    }
}

/// Outcome of checking the download policy against the current network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkDecision {
    Proceed,
    PolicyDisallowed,
    NoConnectivity,
}

/// Decide whether a download may start.
///
/// A `never` policy wins over everything else, so a disabled subscription
/// reports the policy rather than the lack of a network.
pub fn check_policy(policy: DownloadPolicy, network: NetworkType) -> NetworkDecision {
    match (policy, network) {
        (DownloadPolicy::Never, _) => NetworkDecision::PolicyDisallowed,
        (_, NetworkType::None) => NetworkDecision::NoConnectivity,
        (DownloadPolicy::WifiOnly, NetworkType::Other) => NetworkDecision::PolicyDisallowed,
        _ => NetworkDecision::Proceed,
    }
}

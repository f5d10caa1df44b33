use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// A per-interface network service managed by the router control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Nat,
    DhcpV4,
    MssClamp,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Nat => "nat",
            ServiceKind::DhcpV4 => "dhcp_v4",
            ServiceKind::MssClamp => "mss_clamp",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown service kind: {0}")]
pub struct UnknownServiceKind(pub String);

impl FromStr for ServiceKind {
    type Err = UnknownServiceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat" => Ok(ServiceKind::Nat),
            "dhcp_v4" => Ok(ServiceKind::DhcpV4),
            "mss_clamp" => Ok(ServiceKind::MssClamp),
            other => Err(UnknownServiceKind(other.to_string())),
        }
    }
}

/// Lifecycle state of a service on one interface.
///
/// `Unknown` is what a lookup yields for an interface that is absent from the
/// current snapshot. It is never stored in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Unknown,
    Active,
    Degraded,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Active => "active",
            ServiceState::Degraded => "degraded",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Live status of a service bound to one interface, as reported by the
/// control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Interface the service is bound to, e.g. "eth0".
    /// May be omitted on the wire, in which case the snapshot key is used.
    #[serde(default)]
    pub iface_name: String,

    pub state: ServiceState,

    /// Free-form diagnostic text, not interpreted
    #[serde(default)]
    pub message: Option<String>,
}

impl ServiceStatus {
    pub fn new(iface_name: impl Into<String>, state: ServiceState) -> Self {
        Self {
            iface_name: iface_name.into(),
            state,
            message: None,
        }
    }

    /// Status reported for an interface that has never been observed.
    pub fn unknown(iface_name: impl Into<String>) -> Self {
        Self::new(iface_name, ServiceState::Unknown)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot contains an empty interface name")]
    EmptyKey,
    #[error("snapshot key {key} holds status for interface {iface_name}")]
    KeyMismatch { key: String, iface_name: String },
    #[error("interface {0} reported state unknown")]
    UnknownState(String),
}

/// One interface whose state differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub iface_name: String,
    pub from: ServiceState,
    pub to: ServiceState,
}

/// Immutable, complete mapping from interface name to status at one refresh
/// instant. At most one entry per interface; no entry is ever `Unknown`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    entries: BTreeMap<String, ServiceStatus>,
}

impl StatusSnapshot {
    /// Build a snapshot from the keyed mapping returned by the control plane.
    /// An entry without an interface name inherits its key.
    pub fn from_entries(entries: BTreeMap<String, ServiceStatus>) -> Result<Self, SnapshotError> {
        let mut checked = BTreeMap::new();
        for (key, mut status) in entries {
            if key.trim().is_empty() {
                return Err(SnapshotError::EmptyKey);
            }
            if status.iface_name.is_empty() {
                status.iface_name = key.clone();
            } else if status.iface_name != key {
                return Err(SnapshotError::KeyMismatch {
                    key,
                    iface_name: status.iface_name,
                });
            }
            if status.state == ServiceState::Unknown {
                return Err(SnapshotError::UnknownState(key));
            }
            checked.insert(key, status);
        }
        Ok(Self { entries: checked })
    }

    /// Build a snapshot from statuses keyed by their own interface names.
    /// A later status for the same interface replaces an earlier one.
    pub fn from_statuses(
        statuses: impl IntoIterator<Item = ServiceStatus>,
    ) -> Result<Self, SnapshotError> {
        let entries = statuses
            .into_iter()
            .map(|status| (status.iface_name.clone(), status))
            .collect();
        Self::from_entries(entries)
    }

    pub fn get(&self, iface_name: &str) -> Option<&ServiceStatus> {
        self.entries.get(iface_name)
    }

    /// State for an interface, `Unknown` when absent.
    pub fn state(&self, iface_name: &str) -> ServiceState {
        self.entries
            .get(iface_name)
            .map(|status| status.state)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceStatus)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Interfaces whose state differs in `next`, including ones that
    /// appeared (from `Unknown`) or disappeared (to `Unknown`).
    pub fn transitions(&self, next: &StatusSnapshot) -> Vec<StateTransition> {
        let mut names: Vec<&String> = self.entries.keys().chain(next.entries.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .filter_map(|name| {
                let from = self.state(name);
                let to = next.state(name);
                (from != to).then(|| StateTransition {
                    iface_name: name.clone(),
                    from,
                    to,
                })
            })
            .collect()
    }
}

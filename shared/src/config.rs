use std::net::Ipv4Addr;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Serialize, Deserialize, Deserializer};
use thiserror::Error;
use crate::types::ServiceKind;

/// Rejections raised while constructing or updating a service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interface name must not be empty")]
    InvalidIdentifier,

    #[error("{field}: start {start} is greater than end {end}")]
    InvalidRange {
        field: &'static str,
        start: String,
        end: String,
    },

    #[error("{field}: {reason}")]
    InvalidParameter {
        field: &'static str,
        reason: String,
    },
}

/// Service-specific tunables carried by a [`ServiceConfig`].
pub trait ServiceParameters: Clone {
    /// Service kind these parameters configure
    const KIND: ServiceKind;

    /// Shape the parameters take when flattened into the serialized config,
    /// e.g. nested under `nat_config` or spread as top-level fields.
    type Wire: Serialize + DeserializeOwned + From<Self> + Into<Self>;

    fn validate(&self) -> Result<(), ConfigError>;
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Configuration of one service bound to one interface.
///
/// Deserialization goes through [`ServiceConfig::validate`], so a decoded
/// value is as trustworthy as one built with [`ServiceConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    bound = "P: ServiceParameters",
    try_from = "RawServiceConfig<P::Wire>",
    into = "RawServiceConfig<P::Wire>"
)]
pub struct ServiceConfig<P> {
    /// Interface name, unique per service kind
    pub iface_name: String,

    /// Whether the service is administratively active on this interface
    pub enable: bool,

    pub parameters: P,

    /// Epoch milliseconds of the last configuration write
    pub update_at: u64,
}

/// Unchecked wire form of a [`ServiceConfig`]
#[derive(Serialize, Deserialize)]
pub struct RawServiceConfig<W> {
    #[serde(default)]
    iface_name: String,
    enable: bool,
    #[serde(flatten)]
    parameters: W,
    #[serde(default = "now_millis", deserialize_with = "millis_from_number")]
    update_at: u64,
}

/// The control plane writes `update_at` as a float; accept either form.
fn millis_from_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Int(u64),
        Float(f64),
    }

    match Millis::deserialize(deserializer)? {
        Millis::Int(ms) => Ok(ms),
        Millis::Float(ms) if ms.is_finite() && ms >= 0.0 => Ok(ms as u64),
        Millis::Float(ms) => Err(serde::de::Error::custom(format!("invalid update_at: {}", ms))),
    }
}

impl<P: ServiceParameters> TryFrom<RawServiceConfig<P::Wire>> for ServiceConfig<P> {
    type Error = ConfigError;

    fn try_from(raw: RawServiceConfig<P::Wire>) -> Result<Self, Self::Error> {
        let config = Self {
            iface_name: raw.iface_name,
            enable: raw.enable,
            parameters: raw.parameters.into(),
            update_at: raw.update_at,
        };
        config.validate()?;
        Ok(config)
    }
}

impl<P: ServiceParameters> From<ServiceConfig<P>> for RawServiceConfig<P::Wire> {
    fn from(config: ServiceConfig<P>) -> Self {
        Self {
            iface_name: config.iface_name,
            enable: config.enable,
            parameters: config.parameters.into(),
            update_at: config.update_at,
        }
    }
}

impl<P: ServiceParameters> ServiceConfig<P> {
    pub fn new(iface_name: impl Into<String>, enable: bool, parameters: P) -> Result<Self, ConfigError> {
        let config = Self {
            iface_name: iface_name.into(),
            enable,
            parameters,
            update_at: now_millis(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check a value assembled field by field rather than through
    /// [`ServiceConfig::new`] or deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iface_name.trim().is_empty() {
            return Err(ConfigError::InvalidIdentifier);
        }
        self.parameters.validate()
    }

    pub fn kind(&self) -> ServiceKind {
        P::KIND
    }

    /// Replace the parameters. On error the configuration is left untouched.
    pub fn update_parameters(&mut self, parameters: P) -> Result<(), ConfigError> {
        parameters.validate()?;
        self.parameters = parameters;
        self.touch();
        Ok(())
    }

    pub fn set_enable(&mut self, enable: bool) {
        self.enable = enable;
        self.touch();
    }

    // update_at never moves backwards, even if the wall clock does
    fn touch(&mut self) {
        self.update_at = self.update_at.max(now_millis());
    }
}

/// Inclusive `[start, end]` range of 16-bit port or identifier values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, value: u16) -> bool {
        self.start <= value && value <= self.end
    }

    /// Number of values covered, zero for an inverted range.
    pub fn len(&self) -> u32 {
        if self.is_valid() {
            u32::from(self.end - self.start) + 1
        } else {
            0
        }
    }

    fn check(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::InvalidRange {
                field,
                start: self.start.to_string(),
                end: self.end.to_string(),
            })
        }
    }
}

/// Source port ranges used when masquerading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatConfig {
    pub tcp_range: PortRange,
    pub udp_range: PortRange,
    pub icmp_in_range: PortRange,
}

/// Ephemeral port range
const NAT_DEFAULT_RANGE: PortRange = PortRange::new(32768, 65535);

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            tcp_range: NAT_DEFAULT_RANGE,
            udp_range: NAT_DEFAULT_RANGE,
            icmp_in_range: NAT_DEFAULT_RANGE,
        }
    }
}

/// NAT parameters nest under `nat_config`
#[derive(Serialize, Deserialize)]
pub struct NatConfigWire {
    nat_config: NatConfig,
}

impl From<NatConfig> for NatConfigWire {
    fn from(nat_config: NatConfig) -> Self {
        Self { nat_config }
    }
}

impl From<NatConfigWire> for NatConfig {
    fn from(wire: NatConfigWire) -> Self {
        wire.nat_config
    }
}

impl ServiceParameters for NatConfig {
    const KIND: ServiceKind = ServiceKind::Nat;
    type Wire = NatConfigWire;

    fn validate(&self) -> Result<(), ConfigError> {
        self.tcp_range.check("tcp_range")?;
        self.udp_range.check("udp_range")?;
        self.icmp_in_range.check("icmp_in_range")
    }
}

/// TCP MSS clamping on egress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MssClampConfig {
    #[serde(default = "default_clamp_size")]
    pub clamp_size: u16,
}

/// PPPoE: 1500 - 8 = 1492
const fn default_clamp_size() -> u16 {
    1492
}

impl Default for MssClampConfig {
    fn default() -> Self {
        Self {
            clamp_size: default_clamp_size(),
        }
    }
}

impl ServiceParameters for MssClampConfig {
    const KIND: ServiceKind = ServiceKind::MssClamp;
    // clamp_size sits at the top level
    type Wire = Self;

    fn validate(&self) -> Result<(), ConfigError> {
        if self.clamp_size == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "clamp_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// DHCPv4 server handing out leases from a pool on the interface's subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpV4ServerConfig {
    pub server_ip_addr: Ipv4Addr,
    pub network_mask: u8,
    pub ip_range_start: Ipv4Addr,
    pub ip_range_end: Ipv4Addr,
}

impl Default for DhcpV4ServerConfig {
    fn default() -> Self {
        Self {
            server_ip_addr: Ipv4Addr::new(192, 168, 5, 1),
            network_mask: 24,
            ip_range_start: Ipv4Addr::new(192, 168, 5, 100),
            ip_range_end: Ipv4Addr::new(192, 168, 5, 200),
        }
    }
}

impl DhcpV4ServerConfig {
    fn network_of(&self, addr: Ipv4Addr) -> u32 {
        let mask = u32::MAX << (32 - u32::from(self.network_mask));
        u32::from(addr) & mask
    }
}

/// DHCPv4 server parameters nest under `config`
#[derive(Serialize, Deserialize)]
pub struct DhcpV4ServerConfigWire {
    config: DhcpV4ServerConfig,
}

impl From<DhcpV4ServerConfig> for DhcpV4ServerConfigWire {
    fn from(config: DhcpV4ServerConfig) -> Self {
        Self { config }
    }
}

impl From<DhcpV4ServerConfigWire> for DhcpV4ServerConfig {
    fn from(wire: DhcpV4ServerConfigWire) -> Self {
        wire.config
    }
}

impl ServiceParameters for DhcpV4ServerConfig {
    const KIND: ServiceKind = ServiceKind::DhcpV4;
    type Wire = DhcpV4ServerConfigWire;

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=30).contains(&self.network_mask) {
            return Err(ConfigError::InvalidParameter {
                field: "network_mask",
                reason: format!("prefix length {} outside 1..=30", self.network_mask),
            });
        }
        if self.ip_range_start > self.ip_range_end {
            return Err(ConfigError::InvalidRange {
                field: "ip_range",
                start: self.ip_range_start.to_string(),
                end: self.ip_range_end.to_string(),
            });
        }

        let network = self.network_of(self.server_ip_addr);
        if self.network_of(self.ip_range_start) != network || self.network_of(self.ip_range_end) != network {
            return Err(ConfigError::InvalidParameter {
                field: "ip_range",
                reason: format!(
                    "pool must lie within {}/{}",
                    Ipv4Addr::from(network),
                    self.network_mask
                ),
            });
        }
        if (self.ip_range_start..=self.ip_range_end).contains(&self.server_ip_addr) {
            return Err(ConfigError::InvalidParameter {
                field: "server_ip_addr",
                reason: "server address must not be inside the lease pool".to_string(),
            });
        }
        Ok(())
    }
}

pub type NatServiceConfig = ServiceConfig<NatConfig>;
pub type MssClampServiceConfig = ServiceConfig<MssClampConfig>;
pub type DhcpV4ServiceConfig = ServiceConfig<DhcpV4ServerConfig>;

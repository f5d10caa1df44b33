/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Lists the service kinds the daemon tracks
pub const SERVICES_PATH: &str = "/v1/services";

/// Whole snapshot for one service kind
pub const STATUS_PATH: &str = "/v1/services/:kind/status";

/// Status of one interface within a service kind
pub const IFACE_STATUS_PATH: &str = "/v1/services/:kind/status/:iface";

/// Long-poll for the next change of one interface's status
pub const IFACE_WATCH_PATH: &str = "/v1/services/:kind/status/:iface/watch";

/// SHA-256 digest of the current snapshot
pub const HASH_PATH: &str = "/v1/services/:kind/hash";

/// Manual refresh trigger
pub const REFRESH_PATH: &str = "/v1/services/:kind/refresh";

pub mod http;

use std::collections::BTreeMap;
use async_trait::async_trait;
use thiserror::Error;
use shared::types::{ServiceStatus, SnapshotError};

/// Why a status snapshot could not be obtained from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("failed to decode status response: {0}")]
    Decode(String),
    #[error("invalid snapshot: {0}")]
    Invalid(#[from] SnapshotError),
}

/// Authoritative source of per-interface status for one service kind.
///
/// Each call returns the complete current mapping, never a delta.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_all_statuses(&self) -> Result<BTreeMap<String, ServiceStatus>, FetchError>;
}

//! Tenant identity
//!
//! A tenant is the isolation unit of the fleet: one game region at one client
//! version. Its fingerprint is the key-path segment every tenant-scoped key
//! carries, so two tenants can never collide even with identical entity keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A tenant identity: `(id, region, major, minor)`.
///
/// Serialized with camelCase field names so the `_tenants` membership set
/// stays readable by every service in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub region: String,
    pub major_version: u16,
    pub minor_version: u16,
}

impl Tenant {
    pub fn new(id: Uuid, region: impl Into<String>, major_version: u16, minor_version: u16) -> Self {
        Self {
            id,
            region: region.into(),
            major_version,
            minor_version,
        }
    }

    /// Textual form used as a key-path segment: `uuid:region:major.minor`.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}.{}",
            self.id, self.region, self.major_version, self.minor_version
        )
    }

    /// `major.minor` rendered as decimal.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major_version, self.minor_version)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

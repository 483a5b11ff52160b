//! Staff identities and the external directory boundary.
//!
//! Identity and credential lifecycle is owned by an external collaborator
//! (staff management). The core only reads identities, reads credential
//! hashes, and replaces a hash on PIN reset. Deactivation is a soft delete so
//! historical audit entries stay resolvable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Manager,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "staff" => Some(Self::Staff),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
}

/// Read-mostly view of the external identity store.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;
    /// PHC-string PIN hash for an identity, if one is set.
    async fn credential_hash(&self, id: Uuid) -> Result<Option<String>, StoreError>;
    /// Replace the PIN hash wholesale (PIN reset).
    async fn set_credential_hash(&self, id: Uuid, phc: &str) -> Result<(), StoreError>;
}

/// One staff member in a roster file. The PIN is hashed at load time and
/// never kept around in cleartext.
#[derive(Debug, Deserialize)]
pub struct RosterEntry {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub display_name: String,
    pub role: Role,
    pub pin: String,
}

/// Load a JSON staff roster for DSN-less deployments.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn load_roster(path: &Path) -> anyhow::Result<Vec<RosterEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read roster {}: {err}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("failed to parse roster {}: {err}", path.display()))
}

struct MemoryEntry {
    identity: Identity,
    pin_hash: Option<String>,
}

/// In-memory directory for tests and DSN-less deployments.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<Uuid, MemoryEntry>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a roster, hashing each PIN.
    ///
    /// # Errors
    /// Returns an error when a PIN cannot be hashed.
    pub fn from_roster(entries: Vec<RosterEntry>) -> anyhow::Result<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            let id = entry.id.unwrap_or_else(Uuid::new_v4);
            let pin = secrecy::SecretString::from(entry.pin);
            let pin_hash = super::credentials::hash_pin(&pin)?;
            map.insert(
                id,
                MemoryEntry {
                    identity: Identity {
                        id,
                        display_name: entry.display_name,
                        role: entry.role,
                        active: true,
                    },
                    pin_hash: Some(pin_hash),
                },
            );
        }
        Ok(Self {
            entries: RwLock::new(map),
        })
    }

    pub async fn insert(&self, identity: Identity, pin_hash: Option<String>) {
        let mut entries = self.entries.write().await;
        entries.insert(identity.id, MemoryEntry { identity, pin_hash });
    }

    /// Soft-delete: the identity stays resolvable but no longer authenticates.
    pub async fn deactivate(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.identity.active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&id).map(|entry| entry.identity.clone()))
    }

    async fn credential_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&id).and_then(|entry| entry.pin_hash.clone()))
    }

    async fn set_credential_hash(&self, id: Uuid, phc: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.pin_hash = Some(phc.to_string());
        }
        Ok(())
    }
}

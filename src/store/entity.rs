use crate::store::lifecycle::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Independent namespaces inside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Key,
    Secret,
    Certificate,
    Vault,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Key => "key",
            EntityKind::Secret => "secret",
            EntityKind::Certificate => "certificate",
            EntityKind::Vault => "vault",
        }
    }

    /// Collection segment used in recovery ids, e.g. `deletedkeys`.
    pub fn deleted_collection(&self) -> String {
        format!("deleted{}s", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 版本载荷：密钥、机密或证书各自的内容
pub trait VersionPayload: Clone + Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Policy slot kept on the record (not on versions).
    type Policy: Clone + Debug + Send + Sync + 'static;
}

/// 版本属性。只有 `enabled` 可在原位修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionAttributes {
    pub enabled: bool,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Default for VersionAttributes {
    fn default() -> Self {
        Self {
            enabled: true,
            not_before: None,
            expires: None,
            tags: BTreeMap::new(),
        }
    }
}

impl VersionAttributes {
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityVersion<P> {
    pub(crate) id: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) attributes: VersionAttributes,
    pub(crate) payload: P,
}

impl<P> EntityVersion<P> {
    /// 32 lowercase hex characters.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn attributes(&self) -> &VersionAttributes {
        &self.attributes
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn is_enabled(&self) -> bool {
        self.attributes.enabled
    }
}

/// Bookkeeping for a soft-deleted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionInfo {
    pub deleted_on: DateTime<Utc>,
    pub scheduled_purge_on: DateTime<Utc>,
    pub recovery_id: String,
}

#[derive(Debug)]
pub struct EntityRecord<P: VersionPayload> {
    pub(crate) name: String,
    pub(crate) versions: Vec<Arc<EntityVersion<P>>>,
    pub(crate) state: LifecycleState,
    pub(crate) deletion: Option<DeletionInfo>,
    pub(crate) policy: Option<P::Policy>,
}

impl<P: VersionPayload> EntityRecord<P> {
    pub(crate) fn new(name: &str, first: Arc<EntityVersion<P>>, policy: Option<P::Policy>) -> Self {
        Self {
            name: name.to_string(),
            versions: vec![first],
            state: LifecycleState::Active,
            deletion: None,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The most recent version. Records are never empty.
    pub fn current(&self) -> Option<&Arc<EntityVersion<P>>> {
        self.versions.last()
    }

    pub fn version(&self, id: &str) -> Option<&Arc<EntityVersion<P>>> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn versions(&self) -> &[Arc<EntityVersion<P>>] {
        &self.versions
    }

    pub(crate) fn target(&self) -> String {
        format!("{} '{}'", P::KIND, self.name)
    }
}

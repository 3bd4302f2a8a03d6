//! # 版本化实体存储
//!
//! A sharded map from entity name to a record holding an ordered chain of
//! immutable versions. Each record sits behind its own `RwLock`, so writers of
//! one name are serialized while other names and readers proceed concurrently.

pub mod entity;
pub mod lifecycle;

pub use self::entity::{
    DeletionInfo, EntityKind, EntityRecord, EntityVersion, VersionAttributes, VersionPayload,
};
pub use self::lifecycle::{LifecycleEvent, LifecycleState};

use crate::common::clock::Clock;
use crate::common::config::VaultConfig;
use crate::common::errors::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type SharedRecord<P> = Arc<RwLock<EntityRecord<P>>>;

pub struct VersionedEntityStore<P: VersionPayload> {
    vault: String,
    records: DashMap<String, SharedRecord<P>>,
    config: Arc<VaultConfig>,
    clock: Arc<dyn Clock>,
}

impl<P: VersionPayload> VersionedEntityStore<P> {
    pub fn new(vault: impl Into<String>, config: Arc<VaultConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault: vault.into(),
            records: DashMap::new(),
            config,
            clock,
        }
    }

    fn new_version(&self, attributes: VersionAttributes, payload: P) -> Arc<EntityVersion<P>> {
        Arc::new(EntityVersion {
            id: Uuid::new_v4().simple().to_string(),
            created: self.clock.now(),
            attributes,
            payload,
        })
    }

    fn target(name: &str) -> String {
        format!("{} '{}'", P::KIND, name)
    }

    pub(crate) fn record(&self, name: &str) -> Result<SharedRecord<P>> {
        // 先克隆 Arc 再释放分片锁，避免持有分片锁时再去获取记录锁
        self.records
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found(P::KIND, name))
    }

    /// Creates a record holding `payload` as its first version. On an active
    /// name the payload becomes the new current version instead, unless
    /// overwriting is disabled.
    pub fn create(
        &self,
        name: &str,
        attributes: VersionAttributes,
        payload: P,
    ) -> Result<Arc<EntityVersion<P>>> {
        self.create_with_policy(name, attributes, payload, None)
    }

    /// Like [`create`](Self::create), also replacing the record's policy when one is given.
    pub fn create_with_policy(
        &self,
        name: &str,
        attributes: VersionAttributes,
        payload: P,
        policy: Option<P::Policy>,
    ) -> Result<Arc<EntityVersion<P>>> {
        let version = self.new_version(attributes, payload);

        loop {
            let record = match self.records.entry(name.to_string()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(RwLock::new(EntityRecord::new(
                        name,
                        Arc::clone(&version),
                        policy,
                    ))));
                    info!(vault = %self.vault, kind = %P::KIND, name, version = %version.id, "created entity");
                    return Ok(version);
                }
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            };

            let mut guard = record.write();
            match guard.state {
                LifecycleState::Active => {
                    if !self.config.allow_overwrite {
                        return Err(Error::already_exists(P::KIND, name));
                    }
                    guard.versions.push(Arc::clone(&version));
                    if policy.is_some() {
                        guard.policy = policy;
                    }
                    info!(vault = %self.vault, kind = %P::KIND, name, version = %version.id, "added version on create");
                    return Ok(version);
                }
                LifecycleState::Deleted => {
                    return Err(Error::conflict(
                        guard.target(),
                        guard.state,
                        "name is held by a deleted entity; recover or purge it first",
                    ));
                }
                LifecycleState::Purged => {
                    // 与清除并发：移除残留记录后重试
                    drop(guard);
                    self.records
                        .remove_if(name, |_, current| Arc::ptr_eq(current, &record));
                    debug!(vault = %self.vault, kind = %P::KIND, name, "replacing purged record");
                }
            }
        }
    }

    pub fn add_version(
        &self,
        name: &str,
        attributes: VersionAttributes,
        payload: P,
    ) -> Result<Arc<EntityVersion<P>>> {
        let record = self.record(name)?;
        let version = self.new_version(attributes, payload);

        let mut guard = record.write();
        match guard.state {
            LifecycleState::Active => {
                guard.versions.push(Arc::clone(&version));
                info!(vault = %self.vault, kind = %P::KIND, name, version = %version.id, "added version");
                Ok(version)
            }
            LifecycleState::Deleted => Err(Error::conflict(
                guard.target(),
                guard.state,
                "cannot add a version to a deleted entity",
            )),
            LifecycleState::Purged => Err(Error::not_found(P::KIND, name)),
        }
    }

    /// Removes a version written by an operation that failed afterwards. A
    /// record left without versions is dropped, regardless of purge protection.
    pub(crate) fn discard_version(&self, name: &str, version: &str) -> Result<()> {
        let record = self.record(name)?;
        let mut guard = record.write();
        if guard.state == LifecycleState::Purged {
            return Err(Error::not_found(P::KIND, name));
        }
        let index = guard
            .versions
            .iter()
            .position(|v| v.id == version)
            .ok_or_else(|| Error::version_not_found(P::KIND, name, version))?;
        guard.versions.remove(index);
        debug!(vault = %self.vault, kind = %P::KIND, name, version, "discarded version");

        if guard.versions.is_empty() {
            guard.state = LifecycleState::Purged;
            drop(guard);
            self.records
                .remove_if(name, |_, current| Arc::ptr_eq(current, &record));
        }
        Ok(())
    }

    /// A specific version, or the current one when `version` is `None`.
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<Arc<EntityVersion<P>>> {
        let record = self.record(name)?;
        let guard = record.read();
        if !guard.state.is_active() {
            return Err(Error::not_found(P::KIND, name));
        }
        Self::select_version(&guard, version)
    }

    pub fn current(&self, name: &str) -> Result<Arc<EntityVersion<P>>> {
        self.get(name, None)
    }

    fn select_version(record: &EntityRecord<P>, version: Option<&str>) -> Result<Arc<EntityVersion<P>>> {
        let found = match version {
            Some(id) => record.version(id),
            None => record.current(),
        };
        found.cloned().ok_or_else(|| match version {
            Some(id) => Error::version_not_found(P::KIND, &record.name, id),
            None => Error::not_found(P::KIND, &record.name),
        })
    }

    /// Snapshot of all versions, oldest first.
    pub fn list_versions(&self, name: &str) -> Result<Vec<Arc<EntityVersion<P>>>> {
        let record = self.record(name)?;
        let guard = record.read();
        if !guard.state.is_active() {
            return Err(Error::not_found(P::KIND, name));
        }
        Ok(guard.versions.clone())
    }

    pub fn soft_delete(&self, name: &str) -> Result<DeletionInfo> {
        let record = self.record(name)?;
        let mut guard = record.write();
        if guard.state == LifecycleState::Purged {
            return Err(Error::not_found(P::KIND, name));
        }

        let next = guard.state.transition(LifecycleEvent::SoftDelete, guard.target())?;
        if guard.state.is_active() {
            let deleted_on = self.clock.now();
            guard.deletion = Some(DeletionInfo {
                deleted_on,
                scheduled_purge_on: deleted_on
                    + Duration::days(i64::from(self.config.recoverable_days)),
                recovery_id: format!(
                    "{}/{}/{}",
                    self.vault,
                    P::KIND.deleted_collection(),
                    name
                ),
            });
            info!(vault = %self.vault, kind = %P::KIND, name, "soft-deleted entity");
        }
        guard.state = next;

        guard
            .deletion
            .clone()
            .ok_or_else(|| Error::conflict(guard.target(), guard.state, "deletion info missing"))
    }

    /// Returns a deleted record to active, yielding its current version.
    pub fn recover(&self, name: &str) -> Result<Arc<EntityVersion<P>>> {
        let record = self.record(name)?;
        let mut guard = record.write();
        if guard.state == LifecycleState::Purged {
            return Err(Error::not_found(P::KIND, name));
        }

        guard.state = guard.state.transition(LifecycleEvent::Recover, guard.target())?;
        guard.deletion = None;
        info!(vault = %self.vault, kind = %P::KIND, name, "recovered entity");
        Self::select_version(&guard, None)
    }

    /// Permanently removes a deleted record.
    pub fn purge(&self, name: &str) -> Result<()> {
        let Ok(record) = self.record(name) else {
            return Err(Error::conflict(Self::target(name), "absent", "nothing to purge"));
        };

        let mut guard = record.write();
        if guard.state == LifecycleState::Purged {
            return Err(Error::conflict(guard.target(), guard.state, "already purged"));
        }
        if self.config.purge_protection {
            return Err(Error::conflict(
                guard.target(),
                guard.state,
                "purge protection is enabled",
            ));
        }
        guard.state = guard.state.transition(LifecycleEvent::Purge, guard.target())?;
        drop(guard);

        self.records
            .remove_if(name, |_, current| Arc::ptr_eq(current, &record));
        warn!(vault = %self.vault, kind = %P::KIND, name, "purged entity");
        Ok(())
    }

    /// Flips the `enabled` flag of one version in place.
    pub fn set_enabled(&self, name: &str, version: &str, enabled: bool) -> Result<Arc<EntityVersion<P>>> {
        let record = self.record(name)?;
        let mut guard = record.write();
        self.ensure_writable(&guard)?;

        let index = guard
            .versions
            .iter()
            .position(|v| v.id == version)
            .ok_or_else(|| Error::version_not_found(P::KIND, name, version))?;
        // 仍被读者持有的快照保持原值
        Arc::make_mut(&mut guard.versions[index]).attributes.enabled = enabled;
        info!(vault = %self.vault, kind = %P::KIND, name, version, enabled, "updated version state");
        Ok(Arc::clone(&guard.versions[index]))
    }

    fn ensure_writable(&self, record: &EntityRecord<P>) -> Result<()> {
        match record.state {
            LifecycleState::Active => Ok(()),
            LifecycleState::Deleted => Err(Error::conflict(
                record.target(),
                record.state,
                "deleted entities are read-only",
            )),
            LifecycleState::Purged => Err(Error::not_found(P::KIND, &record.name)),
        }
    }

    pub fn policy(&self, name: &str) -> Result<Option<P::Policy>> {
        let record = self.record(name)?;
        let guard = record.read();
        if !guard.state.is_active() {
            return Err(Error::not_found(P::KIND, name));
        }
        Ok(guard.policy.clone())
    }

    pub fn set_policy(&self, name: &str, policy: P::Policy) -> Result<()> {
        let record = self.record(name)?;
        let mut guard = record.write();
        self.ensure_writable(&guard)?;
        guard.policy = Some(policy);
        debug!(vault = %self.vault, kind = %P::KIND, name, "replaced policy");
        Ok(())
    }

    /// Lifecycle state of `name`, if a record exists.
    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.record(name).ok().map(|record| record.read().state)
    }

    fn names_in(&self, state: LifecycleState) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.value().read().state == state)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Names of active records, sorted.
    pub fn names(&self) -> Vec<String> {
        self.names_in(LifecycleState::Active)
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.names_in(LifecycleState::Deleted)
    }

    pub fn get_deleted(&self, name: &str, version: Option<&str>) -> Result<Arc<EntityVersion<P>>> {
        let record = self.record(name)?;
        let guard = record.read();
        if guard.state != LifecycleState::Deleted {
            return Err(Error::not_found(P::KIND, name));
        }
        Self::select_version(&guard, version)
    }

    pub fn deletion_info(&self, name: &str) -> Result<DeletionInfo> {
        let record = self.record(name)?;
        let guard = record.read();
        match (&guard.deletion, guard.state) {
            (Some(info), LifecycleState::Deleted) => Ok(info.clone()),
            _ => Err(Error::not_found(P::KIND, name)),
        }
    }

    /// Purges deleted records whose scheduled purge date is not after `now`.
    /// Scheduled purges ignore purge protection.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let candidates: Vec<(String, SharedRecord<P>)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut purged = Vec::new();
        for (name, record) in candidates {
            let mut guard = record.write();
            let due = guard.state == LifecycleState::Deleted
                && guard
                    .deletion
                    .as_ref()
                    .is_some_and(|info| info.scheduled_purge_on <= now);
            if !due {
                continue;
            }
            guard.state = LifecycleState::Purged;
            drop(guard);
            self.records
                .remove_if(&name, |_, current| Arc::ptr_eq(current, &record));
            info!(vault = %self.vault, kind = %P::KIND, name = %name, "purged expired entity");
            purged.push(name);
        }
        purged.sort();
        purged
    }
}

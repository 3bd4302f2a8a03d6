//! # 保管库门面
//!
//! `Vault` ties the three kind-specific stores together and is the boundary
//! every external caller goes through. Each operation validates its request,
//! runs any cryptography, and only then touches a store, so a failure leaves
//! the vault unchanged.
//!
//! Certificates publish their exported content as a *managed* secret and
//! their key pair as a *managed* key under the certificate's name. Managed
//! entities follow the certificate's lifecycle and reject direct writes.

mod certificates;
mod keys;
mod secrets;

pub use self::certificates::{
    CertificateOperation, CertificateVersion, ImportCertificateRequest, PendingCertificate,
};
pub use self::keys::{CreateKeyRequest, ImportKeyRequest, KeyVersion};
pub use self::secrets::{SecretVersion, SetSecretRequest};

use crate::common::clock::{Clock, SystemClock};
use crate::common::config::VaultConfig;
use crate::common::errors::{Error, Result};
use crate::store::{EntityKind, VersionedEntityStore};
use crate::validation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::info;

/// Names purged by one [`Vault::purge_expired`] sweep, per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub keys: Vec<String>,
    pub secrets: Vec<String>,
    pub certificates: Vec<String>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.secrets.is_empty() && self.certificates.is_empty()
    }
}

/// 单个保管库
pub struct Vault {
    name: String,
    config: Arc<VaultConfig>,
    clock: Arc<dyn Clock>,
    keys: VersionedEntityStore<KeyVersion>,
    secrets: VersionedEntityStore<SecretVersion>,
    certificates: VersionedEntityStore<CertificateVersion>,
    pending_certificates: DashMap<String, PendingCertificate>,
}

impl Vault {
    pub fn new(
        name: impl Into<String>,
        config: Arc<VaultConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        validation::ensure_entity_name(&name)?;
        config.validate()?;

        info!(vault = %name, recoverable_days = config.recoverable_days, "opened vault");
        Ok(Self {
            keys: VersionedEntityStore::new(name.clone(), Arc::clone(&config), Arc::clone(&clock)),
            secrets: VersionedEntityStore::new(name.clone(), Arc::clone(&config), Arc::clone(&clock)),
            certificates: VersionedEntityStore::new(name.clone(), Arc::clone(&config), Arc::clone(&clock)),
            pending_certificates: DashMap::new(),
            name,
            config,
            clock,
        })
    }

    /// Default configuration and the system clock.
    pub fn with_defaults(name: impl Into<String>) -> Result<Self> {
        Self::new(name, Arc::new(VaultConfig::default()), Arc::new(SystemClock))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn keys(&self) -> &VersionedEntityStore<KeyVersion> {
        &self.keys
    }

    pub fn secrets(&self) -> &VersionedEntityStore<SecretVersion> {
        &self.secrets
    }

    pub fn certificates(&self) -> &VersionedEntityStore<CertificateVersion> {
        &self.certificates
    }

    /// Purges every deleted entity whose scheduled purge date is not after `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> PurgeReport {
        let report = PurgeReport {
            certificates: self.certificates.purge_expired(now),
            keys: self.keys.purge_expired(now),
            secrets: self.secrets.purge_expired(now),
        };
        if !report.is_empty() {
            info!(
                vault = %self.name,
                keys = report.keys.len(),
                secrets = report.secrets.len(),
                certificates = report.certificates.len(),
                "purged expired entities"
            );
        }
        report
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("name", &self.name)
            .field("keys", &self.keys.names().len())
            .field("secrets", &self.secrets.names().len())
            .field("certificates", &self.certificates.names().len())
            .finish()
    }
}

/// 按名称管理多个保管库，所有保管库共享同一配置与时钟
pub struct VaultRegistry {
    vaults: DashMap<String, Arc<Vault>>,
    config: Arc<VaultConfig>,
    clock: Arc<dyn Clock>,
}

impl VaultRegistry {
    pub fn new(config: VaultConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            vaults: DashMap::new(),
            config: Arc::new(config),
            clock,
        })
    }

    pub fn create_vault(&self, name: &str) -> Result<Arc<Vault>> {
        validation::ensure_entity_name(name)?;
        match self.vaults.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::Vault, name)),
            Entry::Vacant(vacant) => {
                let vault = Arc::new(Vault::new(name, Arc::clone(&self.config), Arc::clone(&self.clock))?);
                vacant.insert(Arc::clone(&vault));
                Ok(vault)
            }
        }
    }

    pub fn vault(&self, name: &str) -> Result<Arc<Vault>> {
        self.vaults
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found(EntityKind::Vault, name))
    }

    pub fn get_or_create(&self, name: &str) -> Result<Arc<Vault>> {
        if let Some(existing) = self.vaults.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        validation::ensure_entity_name(name)?;
        let vault = self
            .vaults
            .entry(name.to_string())
            .or_try_insert_with(|| {
                Vault::new(name, Arc::clone(&self.config), Arc::clone(&self.clock)).map(Arc::new)
            })?;
        Ok(Arc::clone(vault.value()))
    }

    pub fn remove_vault(&self, name: &str) -> Result<Arc<Vault>> {
        let (_, vault) = self
            .vaults
            .remove(name)
            .ok_or_else(|| Error::not_found(EntityKind::Vault, name))?;
        info!(vault = %name, "removed vault");
        Ok(vault)
    }

    /// Sorted vault names.
    pub fn vault_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vaults.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::ManualClock;

    fn setup_registry() -> VaultRegistry {
        VaultRegistry::new(VaultConfig::default(), Arc::new(ManualClock::new(Utc::now()))).unwrap()
    }

    #[test]
    fn test_registry_create_and_lookup() {
        let registry = setup_registry();
        registry.create_vault("alpha").unwrap();
        registry.get_or_create("beta").unwrap();
        registry.get_or_create("beta").unwrap();

        assert_eq!(registry.vault_names(), vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(registry.vault("alpha").unwrap().name(), "alpha");
        assert!(matches!(registry.create_vault("alpha"), Err(Error::AlreadyExists { .. })));
        assert!(matches!(registry.vault("gamma"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_registry_rejects_bad_names() {
        let registry = setup_registry();
        assert!(matches!(registry.create_vault("bad name"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(registry.get_or_create(""), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_remove_vault() {
        let registry = setup_registry();
        registry.create_vault("alpha").unwrap();
        registry.remove_vault("alpha").unwrap();
        assert!(registry.vault_names().is_empty());
        assert!(registry.remove_vault("alpha").is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = VaultConfig {
            recoverable_days: 3,
            ..VaultConfig::default()
        };
        let result = Vault::new("v", Arc::new(config), Arc::new(SystemClock));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

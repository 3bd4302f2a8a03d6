//! Secret operations of [`Vault`].

use super::Vault;
use crate::common::errors::{Error, Result};
use crate::store::{DeletionInfo, EntityKind, EntityVersion, LifecycleState, VersionAttributes, VersionPayload};
use crate::validation;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// 机密版本载荷
#[derive(Clone)]
pub struct SecretVersion {
    value: Zeroizing<String>,
    pub content_type: Option<String>,
    /// Published by the certificate of the same name.
    pub managed: bool,
}

impl SecretVersion {
    pub fn new(value: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            content_type,
            managed: false,
        }
    }

    pub(crate) fn managed(value: String, content_type: &str) -> Self {
        Self {
            managed: true,
            ..Self::new(value, Some(content_type.to_string()))
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for SecretVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVersion")
            .field("value", &format_args!("[REDACTED; {} bytes]", self.value.len()))
            .field("content_type", &self.content_type)
            .field("managed", &self.managed)
            .finish()
    }
}

impl VersionPayload for SecretVersion {
    const KIND: EntityKind = EntityKind::Secret;
    type Policy = ();
}

#[derive(Clone)]
pub struct SetSecretRequest {
    pub value: String,
    pub content_type: Option<String>,
    pub attributes: VersionAttributes,
}

impl SetSecretRequest {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            content_type: None,
            attributes: VersionAttributes::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_attributes(mut self, attributes: VersionAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl fmt::Debug for SetSecretRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetSecretRequest")
            .field("content_type", &self.content_type)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

type SecretEntity = Arc<EntityVersion<SecretVersion>>;

impl Vault {
    /// Creates the secret or adds a version to it.
    pub fn set_secret(&self, name: &str, request: SetSecretRequest) -> Result<SecretEntity> {
        validation::ensure_entity_name(name)?;
        validation::ensure_validity_window(request.attributes.not_before, request.attributes.expires)?;
        self.ensure_secret_not_managed(name)?;

        let payload = SecretVersion::new(request.value, request.content_type);
        let version = self.secrets.create(name, request.attributes, payload)?;
        info!(vault = %self.name, name, version = %version.id(), "set secret");
        Ok(version)
    }

    pub fn get_secret(&self, name: &str, version: Option<&str>) -> Result<SecretEntity> {
        self.secrets.get(name, version)
    }

    pub fn list_secrets(&self) -> Vec<String> {
        self.secrets.names()
    }

    pub fn list_secret_versions(&self, name: &str) -> Result<Vec<SecretEntity>> {
        self.secrets.list_versions(name)
    }

    pub fn delete_secret(&self, name: &str) -> Result<DeletionInfo> {
        self.ensure_secret_not_managed(name)?;
        self.secrets.soft_delete(name)
    }

    pub fn recover_secret(&self, name: &str) -> Result<SecretEntity> {
        self.ensure_secret_not_managed(name)?;
        self.secrets.recover(name)
    }

    pub fn purge_secret(&self, name: &str) -> Result<()> {
        self.ensure_secret_not_managed(name)?;
        self.secrets.purge(name)
    }

    pub fn set_secret_enabled(&self, name: &str, version: &str, enabled: bool) -> Result<SecretEntity> {
        self.secrets.set_enabled(name, version, enabled)
    }

    pub fn get_deleted_secret(&self, name: &str) -> Result<(SecretEntity, DeletionInfo)> {
        let version = self.secrets.get_deleted(name, None)?;
        Ok((version, self.secrets.deletion_info(name)?))
    }

    pub fn list_deleted_secrets(&self) -> Vec<String> {
        self.secrets.deleted_names()
    }

    /// Publishes certificate content as a managed secret version.
    pub(crate) fn publish_managed_secret(
        &self,
        name: &str,
        value: String,
        content_type: &str,
        attributes: VersionAttributes,
    ) -> Result<SecretEntity> {
        let payload = SecretVersion::managed(value, content_type);
        let version = if self.secrets.state(name) == Some(LifecycleState::Active) {
            self.secrets.add_version(name, attributes, payload)?
        } else {
            self.secrets.create(name, attributes, payload)?
        };
        info!(vault = %self.name, name, version = %version.id(), "published managed secret");
        Ok(version)
    }

    /// `true` when `name` is free for a certificate or already held by one.
    pub(crate) fn secret_available_for_certificate(&self, name: &str) -> bool {
        match self.secrets.state(name) {
            None => true,
            Some(LifecycleState::Active) => self
                .secrets
                .current(name)
                .map(|version| version.payload().managed)
                .unwrap_or(true),
            Some(_) => false,
        }
    }

    fn ensure_secret_not_managed(&self, name: &str) -> Result<()> {
        let current = self
            .secrets
            .current(name)
            .or_else(|_| self.secrets.get_deleted(name, None));
        match current {
            Ok(version) if version.payload().managed => Err(Error::conflict(
                format!("secret '{name}'"),
                "managed",
                "secret is managed by the certificate of the same name",
            )),
            _ => Ok(()),
        }
    }
}

//! Key operations of [`Vault`].

use super::Vault;
use crate::common::errors::{Error, Result};
use crate::crypto::{
    CryptoEngine, EncryptedPayload, EncryptionAlgorithm, JsonWebKey, KeyMaterial, KeyOperation,
    SignatureAlgorithm,
};
use crate::key_type::{KeyParameter, KeyType};
use crate::rotation::{self, KeyRotationPolicy, LifetimeAction};
use crate::store::{DeletionInfo, EntityKind, EntityVersion, VersionAttributes, VersionPayload};
use crate::validation;
use chrono::{DateTime, Utc};
use rand_core::OsRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// 密钥版本载荷
#[derive(Debug, Clone)]
pub struct KeyVersion {
    pub key_type: KeyType,
    pub material: KeyMaterial,
    pub key_ops: BTreeSet<KeyOperation>,
    /// Owned by the certificate of the same name.
    pub managed: bool,
}

impl KeyVersion {
    pub fn new(key_type: KeyType, material: KeyMaterial, key_ops: BTreeSet<KeyOperation>) -> Self {
        Self {
            key_type,
            material,
            key_ops,
            managed: false,
        }
    }

    pub(crate) fn managed(key_type: KeyType, material: KeyMaterial) -> Self {
        let key_ops = KeyOperation::supported_by(key_type.family())
            .iter()
            .copied()
            .collect();
        Self {
            managed: true,
            ..Self::new(key_type, material, key_ops)
        }
    }

    pub fn parameter(&self) -> KeyParameter {
        self.material.parameter()
    }
}

impl VersionPayload for KeyVersion {
    const KIND: EntityKind = EntityKind::Key;
    type Policy = KeyRotationPolicy;
}

/// 创建密钥的请求
#[derive(Debug, Clone)]
pub struct CreateKeyRequest {
    pub key_type: KeyType,
    pub parameter: Option<KeyParameter>,
    /// Defaults to every operation the key family supports.
    pub key_ops: Option<BTreeSet<KeyOperation>>,
    pub attributes: VersionAttributes,
}

impl CreateKeyRequest {
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            parameter: None,
            key_ops: None,
            attributes: VersionAttributes::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: impl Into<KeyParameter>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    pub fn with_key_size(self, bits: u32) -> Self {
        self.with_parameter(KeyParameter::KeySize(bits))
    }

    pub fn with_key_ops(mut self, ops: impl IntoIterator<Item = KeyOperation>) -> Self {
        self.key_ops = Some(ops.into_iter().collect());
        self
    }

    pub fn with_attributes(mut self, attributes: VersionAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// 导入密钥的请求
#[derive(Debug, Clone)]
pub struct ImportKeyRequest {
    /// Private JWK; its `kty` decides the family.
    pub key: JsonWebKey,
    pub hsm: bool,
    /// Falls back to the JWK's `key_ops`, then to the family's full set.
    pub key_ops: Option<BTreeSet<KeyOperation>>,
    pub attributes: VersionAttributes,
}

impl ImportKeyRequest {
    pub fn new(key: JsonWebKey) -> Self {
        Self {
            key,
            hsm: false,
            key_ops: None,
            attributes: VersionAttributes::default(),
        }
    }

    pub fn with_hsm(mut self, hsm: bool) -> Self {
        self.hsm = hsm;
        self
    }

    pub fn with_attributes(mut self, attributes: VersionAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

type KeyEntity = Arc<EntityVersion<KeyVersion>>;

impl Vault {
    pub fn create_key(&self, name: &str, request: CreateKeyRequest) -> Result<KeyEntity> {
        validation::ensure_entity_name(name)?;
        validation::ensure_key_type_enabled(&self.config, request.key_type)?;
        request.key_type.validate(request.parameter)?;
        validation::ensure_validity_window(request.attributes.not_before, request.attributes.expires)?;
        let key_ops = validation::ensure_key_operations(request.key_type.family(), request.key_ops.as_ref())?;
        self.ensure_key_not_managed(name)?;

        let material = CryptoEngine::generate(request.key_type, request.parameter, &mut OsRng)?;
        let payload = KeyVersion::new(request.key_type, material, key_ops);
        let version = self.keys.create(name, request.attributes, payload)?;
        info!(vault = %self.name, name, key_type = %request.key_type, version = %version.id(), "created key");
        Ok(version)
    }

    pub fn import_key(&self, name: &str, request: ImportKeyRequest) -> Result<KeyEntity> {
        validation::ensure_entity_name(name)?;
        let (imported_type, material) = request.key.to_material()?;
        let key_type = KeyType::from_family(imported_type.family(), request.hsm || imported_type.is_hsm());
        validation::ensure_key_type_enabled(&self.config, key_type)?;
        validation::ensure_validity_window(request.attributes.not_before, request.attributes.expires)?;

        let jwk_ops: BTreeSet<KeyOperation> = request.key.key_ops.iter().copied().collect();
        let requested = request.key_ops.or((!jwk_ops.is_empty()).then_some(jwk_ops));
        let key_ops = validation::ensure_key_operations(key_type.family(), requested.as_ref())?;
        self.ensure_key_not_managed(name)?;

        let version = self
            .keys
            .create(name, request.attributes, KeyVersion::new(key_type, material, key_ops))?;
        info!(vault = %self.name, name, key_type = %key_type, version = %version.id(), "imported key");
        Ok(version)
    }

    pub fn get_key(&self, name: &str, version: Option<&str>) -> Result<KeyEntity> {
        self.keys.get(name, version)
    }

    /// Public JWK projection of a key version.
    pub fn get_key_jwk(&self, name: &str, version: Option<&str>) -> Result<JsonWebKey> {
        let entity = self.keys.get(name, version)?;
        let kid = format!("{}/keys/{}/{}", self.name, name, entity.id());
        let payload = entity.payload();
        JsonWebKey::public_from_material(kid, payload.key_type, &payload.material, payload.key_ops.iter().copied())
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.keys.names()
    }

    pub fn list_key_versions(&self, name: &str) -> Result<Vec<KeyEntity>> {
        self.keys.list_versions(name)
    }

    pub fn delete_key(&self, name: &str) -> Result<DeletionInfo> {
        self.ensure_key_not_managed(name)?;
        self.keys.soft_delete(name)
    }

    pub fn recover_key(&self, name: &str) -> Result<KeyEntity> {
        self.ensure_key_not_managed(name)?;
        self.keys.recover(name)
    }

    pub fn purge_key(&self, name: &str) -> Result<()> {
        self.ensure_key_not_managed(name)?;
        self.keys.purge(name)
    }

    pub fn get_deleted_key(&self, name: &str) -> Result<(KeyEntity, DeletionInfo)> {
        let version = self.keys.get_deleted(name, None)?;
        Ok((version, self.keys.deletion_info(name)?))
    }

    pub fn list_deleted_keys(&self) -> Vec<String> {
        self.keys.deleted_names()
    }

    pub fn set_key_enabled(&self, name: &str, version: &str, enabled: bool) -> Result<KeyEntity> {
        self.keys.set_enabled(name, version, enabled)
    }

    /// Adds a fresh version with the current version's type, parameter and
    /// operations. Rotated versions expire per the key's rotation policy.
    pub fn rotate_key(&self, name: &str) -> Result<KeyEntity> {
        let current = self.keys.current(name)?;
        let payload = current.payload();
        if payload.managed {
            return Err(self.managed_key_conflict(name));
        }
        let policy = self.keys.policy(name)?.unwrap_or_default();

        let material = CryptoEngine::generate(payload.key_type, Some(payload.parameter()), &mut OsRng)?;
        let now = self.clock.now();
        let mut attributes = VersionAttributes {
            tags: current.attributes().tags.clone(),
            ..VersionAttributes::default()
        };
        attributes.expires = policy.expiry_for(now);

        let version = self.keys.add_version(
            name,
            attributes,
            KeyVersion::new(payload.key_type, material, payload.key_ops.clone()),
        )?;
        info!(vault = %self.name, name, version = %version.id(), "rotated key");
        Ok(version)
    }

    /// The stored rotation policy, or the default one.
    pub fn key_rotation_policy(&self, name: &str) -> Result<KeyRotationPolicy> {
        Ok(self.keys.policy(name)?.unwrap_or_default())
    }

    pub fn set_key_rotation_policy(&self, name: &str, policy: KeyRotationPolicy) -> Result<()> {
        policy.validate()?;
        self.keys.set_policy(name, policy)
    }

    /// Lifetime actions of the key's policy that are due for its current version.
    pub fn due_key_actions(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<LifetimeAction>> {
        let current = self.keys.current(name)?;
        let policy = self.key_rotation_policy(name)?;
        Ok(rotation::due_actions(
            current.created(),
            current.attributes().expires,
            &policy.lifetime_actions,
            now,
        ))
    }

    pub fn sign(
        &self,
        name: &str,
        version: Option<&str>,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        let key = self.usable_key(name, version, KeyOperation::Sign)?;
        debug!(vault = %self.name, name, version = %key.id(), algorithm = %algorithm, "sign");
        CryptoEngine::sign(&key.payload().material, algorithm, digest, &mut OsRng)
    }

    pub fn verify(
        &self,
        name: &str,
        version: Option<&str>,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let key = self.usable_key(name, version, KeyOperation::Verify)?;
        CryptoEngine::verify_with_material(&key.payload().material, algorithm, digest, signature)
    }

    pub fn encrypt(
        &self,
        name: &str,
        version: Option<&str>,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<EncryptedPayload> {
        let key = self.usable_key(name, version, KeyOperation::Encrypt)?;
        debug!(vault = %self.name, name, version = %key.id(), algorithm = %algorithm, "encrypt");
        CryptoEngine::encrypt(&key.payload().material, algorithm, plaintext, aad, &mut OsRng)
    }

    pub fn decrypt(
        &self,
        name: &str,
        version: Option<&str>,
        payload: &EncryptedPayload,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let key = self.usable_key(name, version, KeyOperation::Decrypt)?;
        CryptoEngine::decrypt(&key.payload().material, payload, aad)
    }

    pub fn wrap_key(
        &self,
        name: &str,
        version: Option<&str>,
        algorithm: EncryptionAlgorithm,
        key_bytes: &[u8],
    ) -> Result<EncryptedPayload> {
        let key = self.usable_key(name, version, KeyOperation::WrapKey)?;
        CryptoEngine::wrap_key(&key.payload().material, algorithm, key_bytes, &mut OsRng)
    }

    pub fn unwrap_key(
        &self,
        name: &str,
        version: Option<&str>,
        payload: &EncryptedPayload,
    ) -> Result<Vec<u8>> {
        let key = self.usable_key(name, version, KeyOperation::UnwrapKey)?;
        CryptoEngine::unwrap_key(&key.payload().material, payload)
    }

    fn usable_key(&self, name: &str, version: Option<&str>, operation: KeyOperation) -> Result<KeyEntity> {
        let key = self.keys.get(name, version)?;
        let family = key.payload().key_type.family();
        if !KeyOperation::supported_by(family).contains(&operation) {
            return Err(Error::unsupported(operation, format!("{} key '{}'", family.algorithm_name(), name)));
        }
        validation::ensure_operation_permitted(name, &key, operation, self.clock.now())?;
        Ok(key)
    }

    fn ensure_key_not_managed(&self, name: &str) -> Result<()> {
        let current = self
            .keys
            .current(name)
            .or_else(|_| self.keys.get_deleted(name, None));
        match current {
            Ok(version) if version.payload().managed => Err(self.managed_key_conflict(name)),
            _ => Ok(()),
        }
    }

    fn managed_key_conflict(&self, name: &str) -> Error {
        Error::conflict(
            format!("key '{name}'"),
            "managed",
            "key is managed by the certificate of the same name",
        )
    }
}

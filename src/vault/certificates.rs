//! Certificate operations of [`Vault`].

use super::{KeyVersion, Vault};
use crate::certificate::{
    CertificateContentType, CertificateIssuer, CertificatePolicy, IssuedCertificate, IssuerKind,
    decode_certificate_content, export_secret_value,
};
use crate::certificate::policy::MAX_VALIDITY_MONTHS;
use crate::common::errors::{Error, Result};
use crate::crypto::{CryptoEngine, KeyMaterial};
use crate::key_type::KeyType;
use crate::rotation::{self, LifetimeAction};
use crate::store::{DeletionInfo, EntityKind, EntityVersion, LifecycleState, VersionAttributes, VersionPayload};
use crate::validation;
use chrono::{DateTime, Utc};
use rand_core::OsRng;
use std::sync::Arc;
use tracing::{info, warn};

/// 证书版本载荷
#[derive(Debug, Clone)]
pub struct CertificateVersion {
    pub certificate_der: Vec<u8>,
    pub key: KeyMaterial,
    /// Policy snapshot that produced this version.
    pub policy: CertificatePolicy,
    pub thumbprint: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateVersion {
    fn from_issued(issued: IssuedCertificate, policy: CertificatePolicy) -> Self {
        Self {
            certificate_der: issued.certificate_der,
            key: issued.key,
            policy,
            thumbprint: issued.thumbprint,
            not_before: issued.not_before,
            not_after: issued.not_after,
        }
    }

    /// Hex encoded SHA-1 thumbprint.
    pub fn thumbprint_hex(&self) -> String {
        self.thumbprint.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl VersionPayload for CertificateVersion {
    const KIND: EntityKind = EntityKind::Certificate;
    type Policy = CertificatePolicy;
}

/// Outcome of a create or renew request.
#[derive(Debug, Clone)]
pub enum CertificateOperation {
    Completed(Arc<EntityVersion<CertificateVersion>>),
    /// Waiting for an externally signed certificate; `csr` is DER PKCS#10.
    Pending { csr: Vec<u8> },
}

impl CertificateOperation {
    pub fn completed(self) -> Option<Arc<EntityVersion<CertificateVersion>>> {
        match self {
            CertificateOperation::Completed(version) => Some(version),
            CertificateOperation::Pending { .. } => None,
        }
    }
}

/// 等待外部 CA 签发的证书请求
#[derive(Debug, Clone)]
pub struct PendingCertificate {
    pub policy: CertificatePolicy,
    pub key: KeyMaterial,
    pub csr: Vec<u8>,
    pub created: DateTime<Utc>,
    pub attributes: VersionAttributes,
}

#[derive(Clone)]
pub struct ImportCertificateRequest {
    /// PEM text, or base64 of a PKCS#12 keystore.
    pub content: String,
    pub content_type: CertificateContentType,
    pub password: Option<String>,
    /// Replaces the policy derived from the certificate when given.
    pub policy: Option<CertificatePolicy>,
    pub attributes: VersionAttributes,
}

impl ImportCertificateRequest {
    pub fn new(content: impl Into<String>, content_type: CertificateContentType) -> Self {
        Self {
            content: content.into(),
            content_type,
            password: None,
            policy: None,
            attributes: VersionAttributes::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_policy(mut self, policy: CertificatePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl std::fmt::Debug for ImportCertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportCertificateRequest")
            .field("content_type", &self.content_type)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

type CertificateEntity = Arc<EntityVersion<CertificateVersion>>;

impl Vault {
    /// Issues a self-signed certificate, or starts a pending operation with a
    /// CSR when the policy names an external issuer.
    pub fn create_certificate(
        &self,
        name: &str,
        policy: CertificatePolicy,
        attributes: VersionAttributes,
    ) -> Result<CertificateOperation> {
        validation::ensure_entity_name(name)?;
        self.ensure_policy_allowed(&policy)?;
        self.ensure_managed_names_available(name)?;
        if self.pending_certificates.contains_key(name) {
            return Err(self.pending_conflict(name));
        }
        let existing = self.certificates.state(name);
        if existing == Some(LifecycleState::Active) && !self.config.allow_overwrite {
            return Err(Error::already_exists(EntityKind::Certificate, name));
        }

        match policy.issuer {
            IssuerKind::SelfSigned => {
                let issued = CertificateIssuer::issue(&policy, self.clock.now(), &mut OsRng)?;
                let payload = CertificateVersion::from_issued(issued, policy);
                let version = self.commit_certificate(name, payload, attributes, false)?;
                Ok(CertificateOperation::Completed(version))
            }
            IssuerKind::Unknown => {
                let key = CryptoEngine::generate(policy.key_spec.key_type, Some(policy.key_parameter()?), &mut OsRng)?;
                self.start_pending(name, policy, key, attributes)
            }
        }
    }

    pub fn pending_certificate(&self, name: &str) -> Result<PendingCertificate> {
        self.pending_certificates
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(EntityKind::Certificate, name))
    }

    pub fn cancel_certificate_operation(&self, name: &str) -> Result<()> {
        self.pending_certificates
            .remove(name)
            .map(|_| info!(vault = %self.name, name, "cancelled pending certificate"))
            .ok_or_else(|| Error::not_found(EntityKind::Certificate, name))
    }

    /// Completes a pending operation with the externally signed chain, leaf first.
    pub fn merge_certificate(&self, name: &str, chain: &[Vec<u8>]) -> Result<CertificateEntity> {
        let (_, pending) = self
            .pending_certificates
            .remove(name)
            .ok_or_else(|| Error::not_found(EntityKind::Certificate, name))?;

        match self.merge_pending(name, &pending, chain) {
            Ok(version) => Ok(version),
            Err(err) => {
                // 合并失败时保留挂起操作
                self.pending_certificates.entry(name.to_string()).or_insert(pending);
                Err(err)
            }
        }
    }

    fn merge_pending(
        &self,
        name: &str,
        pending: &PendingCertificate,
        chain: &[Vec<u8>],
    ) -> Result<CertificateEntity> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::invalid_parameter("certificate chain", "<empty>", ["leaf certificate first"]))?;
        if !CertificateIssuer::matches_key(leaf, &pending.key)? {
            return Err(Error::conflict(
                format!("certificate '{name}'"),
                "pending",
                "merged certificate does not carry the pending public key",
            ));
        }

        let parsed = CertificateIssuer::parse_certificate(leaf)?;
        let payload = CertificateVersion {
            certificate_der: leaf.clone(),
            key: pending.key.clone(),
            policy: pending.policy.clone(),
            thumbprint: parsed.thumbprint,
            not_before: parsed.not_before,
            not_after: parsed.not_after,
        };
        let renewal = self.certificates.state(name) == Some(LifecycleState::Active);
        let version = self.commit_certificate(name, payload, pending.attributes.clone(), renewal)?;
        info!(vault = %self.name, name, version = %version.id(), "merged certificate");
        Ok(version)
    }

    /// Imports a certificate with its private key from PEM or PKCS#12.
    pub fn import_certificate(&self, name: &str, request: ImportCertificateRequest) -> Result<CertificateEntity> {
        validation::ensure_entity_name(name)?;
        validation::ensure_content_type_enabled(&self.config, request.content_type)?;

        let content = decode_certificate_content(request.content_type, &request.content, request.password.as_deref())?;
        let leaf = content.leaf()?.to_vec();
        let key = content
            .key
            .ok_or_else(|| Error::invalid_parameter("certificate content", "<no private key>", ["certificate with private key"]))?;
        if !CertificateIssuer::verify_key_pair(&leaf, &key, &mut OsRng)? {
            return Err(Error::invalid_parameter(
                "certificate content",
                "key pair mismatch",
                ["private key matching the certificate"],
            ));
        }

        let parsed = CertificateIssuer::parse_certificate(&leaf)?;
        let key_type = KeyType::from_family(key.family(), false);
        let mut policy = match request.policy {
            Some(policy) => policy,
            None => {
                let issuer = if parsed.is_self_issued() {
                    IssuerKind::SelfSigned
                } else {
                    IssuerKind::Unknown
                };
                // 续订时按上限签发
                CertificatePolicy::new(parsed.subject.clone())
                    .with_validity_months(parsed.validity_months().min(MAX_VALIDITY_MONTHS))
                    .with_issuer(issuer)
                    .with_dns_names(parsed.dns_names.clone())
            }
        };
        policy.content_type = request.content_type;
        policy.key_spec.key_type = key_type;
        policy.key_spec.parameter = Some(key.parameter());
        policy.validate()?;
        validation::ensure_key_type_enabled(&self.config, key_type)?;

        let payload = CertificateVersion {
            certificate_der: leaf,
            key,
            policy,
            thumbprint: parsed.thumbprint,
            not_before: parsed.not_before,
            not_after: parsed.not_after,
        };
        let version = self.commit_certificate(name, payload, request.attributes, false)?;
        info!(vault = %self.name, name, version = %version.id(), "imported certificate");
        Ok(version)
    }

    pub fn get_certificate(&self, name: &str, version: Option<&str>) -> Result<CertificateEntity> {
        self.certificates.get(name, version)
    }

    pub fn list_certificates(&self) -> Vec<String> {
        self.certificates.names()
    }

    pub fn list_certificate_versions(&self, name: &str) -> Result<Vec<CertificateEntity>> {
        self.certificates.list_versions(name)
    }

    pub fn list_deleted_certificates(&self) -> Vec<String> {
        self.certificates.deleted_names()
    }

    pub fn get_deleted_certificate(&self, name: &str) -> Result<(CertificateEntity, DeletionInfo)> {
        let version = self.certificates.get_deleted(name, None)?;
        Ok((version, self.certificates.deletion_info(name)?))
    }

    /// Certificate and private key encoded per the version's content type.
    pub fn export_certificate(&self, name: &str, version: Option<&str>) -> Result<String> {
        let entity = self.certificates.get(name, version)?;
        let payload = entity.payload();
        export_secret_value(payload.policy.content_type, &payload.certificate_der, &payload.key, name)
    }

    pub fn certificate_policy(&self, name: &str) -> Result<CertificatePolicy> {
        match self.certificates.policy(name)? {
            Some(policy) => Ok(policy),
            None => Ok(self.certificates.current(name)?.payload().policy.clone()),
        }
    }

    /// Replaces the policy used by future renewals. Existing versions keep theirs.
    pub fn set_certificate_policy(&self, name: &str, policy: CertificatePolicy) -> Result<()> {
        self.ensure_policy_allowed(&policy)?;
        self.certificates.set_policy(name, policy)?;
        info!(vault = %self.name, name, "replaced certificate policy");
        Ok(())
    }

    /// Issues a new version from the current policy.
    pub fn renew_certificate(&self, name: &str) -> Result<CertificateOperation> {
        let current = self.certificates.current(name)?;
        let policy = self.certificate_policy(name)?;
        if self.pending_certificates.contains_key(name) {
            return Err(self.pending_conflict(name));
        }

        let previous_key = &current.payload().key;
        let reuse = policy.key_spec.reuse_key
            && previous_key.family() == policy.key_spec.key_type.family();
        let key = if reuse {
            previous_key.clone()
        } else {
            CryptoEngine::generate(policy.key_spec.key_type, Some(policy.key_parameter()?), &mut OsRng)?
        };

        let attributes = VersionAttributes {
            tags: current.attributes().tags.clone(),
            ..VersionAttributes::default()
        };
        match policy.issuer {
            IssuerKind::SelfSigned => {
                let issued = CertificateIssuer::issue_with_key(&policy, key, self.clock.now(), &mut OsRng)?;
                let payload = CertificateVersion::from_issued(issued, policy);
                let version = self.commit_certificate(name, payload, attributes, true)?;
                info!(vault = %self.name, name, version = %version.id(), reused_key = reuse, "renewed certificate");
                Ok(CertificateOperation::Completed(version))
            }
            IssuerKind::Unknown => self.start_pending(name, policy, key, attributes),
        }
    }

    pub fn set_certificate_enabled(&self, name: &str, version: &str, enabled: bool) -> Result<CertificateEntity> {
        self.certificates.set_enabled(name, version, enabled)
    }

    /// Lifetime actions of the certificate's policy due for its current version.
    pub fn due_certificate_actions(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<LifetimeAction>> {
        let current = self.certificates.current(name)?;
        let policy = self.certificate_policy(name)?;
        let payload = current.payload();
        Ok(rotation::due_actions(
            payload.not_before,
            Some(payload.not_after),
            &policy.lifetime_actions,
            now,
        ))
    }

    /// Soft-deletes the certificate together with its managed secret and key.
    pub fn delete_certificate(&self, name: &str) -> Result<DeletionInfo> {
        let info = self.certificates.soft_delete(name)?;
        self.pending_certificates.remove(name);
        self.cascade_managed(name, |vault| {
            if vault.managed_secret_in(name, LifecycleState::Active) {
                vault.secrets.soft_delete(name)?;
            }
            if vault.managed_key_in(name, LifecycleState::Active) {
                vault.keys.soft_delete(name)?;
            }
            Ok(())
        });
        Ok(info)
    }

    pub fn recover_certificate(&self, name: &str) -> Result<CertificateEntity> {
        let version = self.certificates.recover(name)?;
        self.cascade_managed(name, |vault| {
            if vault.managed_secret_in(name, LifecycleState::Deleted) {
                vault.secrets.recover(name)?;
            }
            if vault.managed_key_in(name, LifecycleState::Deleted) {
                vault.keys.recover(name)?;
            }
            Ok(())
        });
        Ok(version)
    }

    pub fn purge_certificate(&self, name: &str) -> Result<()> {
        self.certificates.purge(name)?;
        self.cascade_managed(name, |vault| {
            if vault.managed_secret_in(name, LifecycleState::Deleted) {
                vault.secrets.purge(name)?;
            }
            if vault.managed_key_in(name, LifecycleState::Deleted) {
                vault.keys.purge(name)?;
            }
            Ok(())
        });
        Ok(())
    }

    fn ensure_policy_allowed(&self, policy: &CertificatePolicy) -> Result<()> {
        policy.validate()?;
        validation::ensure_key_type_enabled(&self.config, policy.key_spec.key_type)?;
        validation::ensure_content_type_enabled(&self.config, policy.content_type)
    }

    /// The managed secret and key names must be free or already managed.
    fn ensure_managed_names_available(&self, name: &str) -> Result<()> {
        if !self.secret_available_for_certificate(name) {
            return Err(Error::conflict(
                format!("secret '{name}'"),
                self.secrets.state(name).map(|s| s.to_string()).unwrap_or_default(),
                "name is held by a secret not managed by a certificate",
            ));
        }
        let key_free = match self.keys.state(name) {
            None => true,
            Some(LifecycleState::Active) => self.keys.current(name).map(|v| v.payload().managed).unwrap_or(true),
            Some(_) => false,
        };
        if !key_free {
            return Err(Error::conflict(
                format!("key '{name}'"),
                self.keys.state(name).map(|s| s.to_string()).unwrap_or_default(),
                "name is held by a key not managed by a certificate",
            ));
        }
        Ok(())
    }

    fn start_pending(
        &self,
        name: &str,
        policy: CertificatePolicy,
        key: KeyMaterial,
        attributes: VersionAttributes,
    ) -> Result<CertificateOperation> {
        let csr = CertificateIssuer::create_csr(&policy, &key, &mut OsRng)?;
        let pending = PendingCertificate {
            policy,
            key,
            csr: csr.clone(),
            created: self.clock.now(),
            attributes,
        };
        match self.pending_certificates.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(self.pending_conflict(name)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(pending);
                info!(vault = %self.name, name, "certificate operation pending");
                Ok(CertificateOperation::Pending { csr })
            }
        }
    }

    /// Stores the version, then publishes its managed secret and key. A
    /// renewal appends to the existing record and keeps its policy. When a
    /// later write fails the earlier ones are undone.
    fn commit_certificate(
        &self,
        name: &str,
        payload: CertificateVersion,
        mut attributes: VersionAttributes,
        renewal: bool,
    ) -> Result<CertificateEntity> {
        self.ensure_managed_names_available(name)?;
        let content_type = payload.policy.content_type;
        let secret_value = export_secret_value(content_type, &payload.certificate_der, &payload.key, name)?;
        let key_type = KeyType::from_family(payload.key.family(), payload.policy.key_spec.key_type.is_hsm());
        let managed_key = KeyVersion::managed(key_type, payload.key.clone());

        attributes.not_before = Some(payload.not_before);
        attributes.expires = Some(payload.not_after);
        // 覆盖创建会替换策略，回滚时需要还原
        let prior_policy = if renewal {
            None
        } else {
            self.certificates.policy(name).ok().flatten()
        };
        let version = if renewal {
            self.certificates.add_version(name, attributes.clone(), payload)?
        } else {
            let policy = payload.policy.clone();
            self.certificates
                .create_with_policy(name, attributes.clone(), payload, Some(policy))?
        };

        let managed_attributes = VersionAttributes {
            tags: Default::default(),
            ..attributes
        };
        let published =
            self.publish_managed_secret(name, secret_value, content_type.mime_type(), managed_attributes.clone());
        let secret = match published {
            Ok(secret) => secret,
            Err(err) => {
                self.undo_certificate_write(name, version.id(), prior_policy);
                return Err(err);
            }
        };
        let key_written = if self.keys.state(name) == Some(LifecycleState::Active) {
            self.keys.add_version(name, managed_attributes, managed_key)
        } else {
            self.keys.create(name, managed_attributes, managed_key)
        };
        if let Err(err) = key_written {
            if let Err(undo) = self.secrets.discard_version(name, secret.id()) {
                warn!(vault = %self.name, name, error = %undo, "failed to discard managed secret version");
            }
            self.undo_certificate_write(name, version.id(), prior_policy);
            return Err(err);
        }
        info!(vault = %self.name, name, version = %version.id(), content_type = %content_type, "stored certificate");
        Ok(version)
    }

    fn undo_certificate_write(&self, name: &str, version: &str, prior_policy: Option<CertificatePolicy>) {
        let undone = self.certificates.discard_version(name, version).and_then(|()| match prior_policy {
            Some(policy) => self.certificates.set_policy(name, policy),
            None => Ok(()),
        });
        match undone {
            Ok(()) => warn!(vault = %self.name, name, version, "rolled back certificate version"),
            Err(err) => warn!(vault = %self.name, name, version, error = %err, "failed to roll back certificate version"),
        }
    }

    fn managed_secret_in(&self, name: &str, state: LifecycleState) -> bool {
        let version = match state {
            LifecycleState::Active => self.secrets.current(name),
            _ => self.secrets.get_deleted(name, None),
        };
        version.is_ok_and(|v| v.payload().managed)
    }

    fn managed_key_in(&self, name: &str, state: LifecycleState) -> bool {
        let version = match state {
            LifecycleState::Active => self.keys.current(name),
            _ => self.keys.get_deleted(name, None),
        };
        version.is_ok_and(|v| v.payload().managed)
    }

    /// Applies a lifecycle step to managed entities. The certificate transition
    /// has already happened, so failures here are logged, not returned.
    fn cascade_managed(&self, name: &str, step: impl FnOnce(&Self) -> Result<()>) {
        if let Err(err) = step(self) {
            warn!(vault = %self.name, name, error = %err, "managed entity lifecycle step failed");
        }
    }

    fn pending_conflict(&self, name: &str) -> Error {
        Error::conflict(
            format!("certificate '{name}'"),
            "pending",
            "a certificate operation is already pending",
        )
    }
}

//! # Vault-Engine: versioned credential vault core
//!
//! `vault-engine` is the core of a local key-management emulator. It stores keys,
//! secrets and certificates as immutable version chains, enforces the
//! soft-delete / recover / purge lifecycle and performs the cryptography a
//! cloud key vault offers: key generation, sign/verify, encrypt/decrypt,
//! wrap/unwrap and self-signed X.509 issuance with PEM or PKCS#12 export.
//!
//! ## Core Concepts
//!
//! - **`Vault`**: the per-vault facade exposing key, secret and certificate operations.
//! - **`VersionedEntityStore`**: a concurrent map of named entities, each an ordered chain of versions.
//! - **`KeyType`**: the closed set of key kinds with their legal sizes and curves.
//! - **`CryptoEngine`**: stateless dispatch of cryptographic operations over `KeyMaterial`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vault_engine::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let vault = Vault::with_defaults("local")?;
//!
//!     let key = vault.create_key("signing-key", CreateKeyRequest::new(KeyType::Ec))?;
//!     let digest = SignatureAlgorithm::ES256.digest(b"hello vault");
//!     let signature = vault.sign("signing-key", None, SignatureAlgorithm::ES256, &digest)?;
//!
//!     assert!(vault.verify("signing-key", Some(key.id()), SignatureAlgorithm::ES256, &digest, &signature)?);
//!     Ok(())
//! }
//! ```

pub mod certificate;
pub mod common;
pub mod crypto;
pub mod key_type;
pub mod rotation;
pub mod store;
pub mod validation;
pub mod vault;

// --- Prelude ---
// The types most callers need.
pub mod prelude {
    pub use crate::certificate::{
        CertificateContentType, CertificateKeySpec, CertificatePolicy, IssuerKind,
        SubjectAlternativeNames,
    };
    pub use crate::common::{
        Clock, Error, ManualClock, Result, SystemClock, VaultConfig,
    };
    pub use crate::crypto::{
        CryptoEngine, EncryptedPayload, EncryptionAlgorithm, JsonWebKey, KeyMaterial,
        KeyOperation, SignatureAlgorithm,
    };
    pub use crate::key_type::{KeyCurveName, KeyFamily, KeyParameter, KeyType};
    pub use crate::rotation::{KeyRotationPolicy, LifetimeAction, LifetimeActionType, LifetimeTrigger};
    pub use crate::store::{EntityKind, EntityVersion, LifecycleState, VersionAttributes};
    pub use crate::vault::{
        CertificateOperation, CreateKeyRequest, ImportCertificateRequest, ImportKeyRequest,
        SetSecretRequest, Vault, VaultRegistry,
    };
}

pub use common::{Error, Result};

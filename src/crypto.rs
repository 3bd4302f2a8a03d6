//! 密码学操作引擎
//!
//! 对 `KeyMaterial` 进行无状态的分派：密钥生成、签名/验签、加解密与密钥包装。
//! 每个密钥族（RSA、EC、oct）各自实现 [`traits::KeyFamilySystem`]。

pub mod ec;
pub mod jwk;
pub mod material;
pub mod oct;
pub mod rsa;
pub mod traits;

pub use self::jwk::JsonWebKey;
pub use self::material::{
    EcKeyPair, EcPublicKey, KeyMaterial, OctKey, PublicKeyMaterial, RsaKeyPair, RsaPublicKeyInfo,
};
pub use self::traits::KeyFamilySystem;

use self::ec::EcSystem;
use self::oct::OctSystem;
use self::rsa::RsaSystem;
use crate::common::errors::{Error, Result};
use crate::key_type::{KeyCurveName, KeyFamily, KeyParameter, KeyType};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Hash functions backing the signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum SignatureAlgorithm {
    PS256,
    PS384,
    PS512,
    RS256,
    RS384,
    RS512,
    ES256,
    ES256K,
    ES384,
    ES512,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 10] = [
        Self::PS256,
        Self::PS384,
        Self::PS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
        Self::ES256,
        Self::ES256K,
        Self::ES384,
        Self::ES512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES256K => "ES256K",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            Self::ES256 | Self::ES256K | Self::ES384 | Self::ES512 => KeyFamily::Ec,
            _ => KeyFamily::Rsa,
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        match self {
            Self::PS256 | Self::RS256 | Self::ES256 | Self::ES256K => HashAlgorithm::Sha256,
            Self::PS384 | Self::RS384 | Self::ES384 => HashAlgorithm::Sha384,
            Self::PS512 | Self::RS512 | Self::ES512 => HashAlgorithm::Sha512,
        }
    }

    /// The curve an ECDSA algorithm is bound to.
    pub fn curve(&self) -> Option<KeyCurveName> {
        match self {
            Self::ES256 => Some(KeyCurveName::P256),
            Self::ES256K => Some(KeyCurveName::P256K),
            Self::ES384 => Some(KeyCurveName::P384),
            Self::ES512 => Some(KeyCurveName::P521),
            _ => None,
        }
    }

    pub fn for_curve(curve: KeyCurveName) -> SignatureAlgorithm {
        match curve {
            KeyCurveName::P256 => Self::ES256,
            KeyCurveName::P256K => Self::ES256K,
            KeyCurveName::P384 => Self::ES384,
            KeyCurveName::P521 => Self::ES512,
        }
    }

    /// Hashes `data` with the algorithm's digest function.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.hash().digest(data)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| Error::invalid_parameter("signature algorithm", s, Self::ALL))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    #[serde(rename = "RSA1_5")]
    Rsa15,
    #[serde(rename = "RSA-OAEP")]
    RsaOaep,
    #[serde(rename = "RSA-OAEP-256")]
    RsaOaep256,
    #[serde(rename = "A128GCM")]
    A128Gcm,
    #[serde(rename = "A192GCM")]
    A192Gcm,
    #[serde(rename = "A256GCM")]
    A256Gcm,
}

impl EncryptionAlgorithm {
    pub const ALL: [EncryptionAlgorithm; 6] = [
        Self::Rsa15,
        Self::RsaOaep,
        Self::RsaOaep256,
        Self::A128Gcm,
        Self::A192Gcm,
        Self::A256Gcm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa15 => "RSA1_5",
            Self::RsaOaep => "RSA-OAEP",
            Self::RsaOaep256 => "RSA-OAEP-256",
            Self::A128Gcm => "A128GCM",
            Self::A192Gcm => "A192GCM",
            Self::A256Gcm => "A256GCM",
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            Self::Rsa15 | Self::RsaOaep | Self::RsaOaep256 => KeyFamily::Rsa,
            Self::A128Gcm | Self::A192Gcm | Self::A256Gcm => KeyFamily::Oct,
        }
    }

    /// AES key size in bits required by a GCM algorithm.
    pub fn aes_key_bits(&self) -> Option<u32> {
        match self {
            Self::A128Gcm => Some(128),
            Self::A192Gcm => Some(192),
            Self::A256Gcm => Some(256),
            _ => None,
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| Error::invalid_parameter("encryption algorithm", s, Self::ALL))
    }
}

/// Operations a key version may be permitted to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyOperation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    WrapKey,
    UnwrapKey,
}

impl KeyOperation {
    pub const ALL: [KeyOperation; 6] = [
        Self::Encrypt,
        Self::Decrypt,
        Self::Sign,
        Self::Verify,
        Self::WrapKey,
        Self::UnwrapKey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Sign => "sign",
            Self::Verify => "verify",
            Self::WrapKey => "wrapKey",
            Self::UnwrapKey => "unwrapKey",
        }
    }

    /// Operations a key family can perform at all.
    pub fn supported_by(family: KeyFamily) -> &'static [KeyOperation] {
        match family {
            KeyFamily::Rsa => &Self::ALL,
            KeyFamily::Ec => &[Self::Sign, Self::Verify],
            KeyFamily::Oct => &[Self::Encrypt, Self::Decrypt, Self::WrapKey, Self::UnwrapKey],
        }
    }
}

impl fmt::Display for KeyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of an encryption or wrap operation.
///
/// `iv` and `tag` are only present for AES-GCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub algorithm: EncryptionAlgorithm,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
}

/// 密码学操作的统一入口
pub struct CryptoEngine;

impl CryptoEngine {
    /// Generates fresh material for `key_type`, defaulting the parameter.
    pub fn generate<R: CryptoRngCore>(
        key_type: KeyType,
        parameter: Option<KeyParameter>,
        rng: &mut R,
    ) -> Result<KeyMaterial> {
        let parameter = key_type.validate_or_default(parameter)?;
        let material = match key_type.family() {
            KeyFamily::Rsa => KeyMaterial::Rsa(RsaSystem::generate(parameter, rng)?),
            KeyFamily::Ec => KeyMaterial::Ec(EcSystem::generate(parameter, rng)?),
            KeyFamily::Oct => KeyMaterial::Oct(OctSystem::generate(parameter, rng)?),
        };
        tracing::debug!(key_type = %key_type, parameter = %parameter, "generated key material");
        Ok(material)
    }

    pub fn sign<R: CryptoRngCore>(
        material: &KeyMaterial,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        ensure_family(algorithm.as_str(), algorithm.family(), material.family())?;
        ensure_digest_len(algorithm, digest)?;
        match material {
            KeyMaterial::Rsa(key) => RsaSystem::sign(key, algorithm, digest, rng),
            KeyMaterial::Ec(key) => EcSystem::sign(key, algorithm, digest, rng),
            KeyMaterial::Oct(key) => OctSystem::sign(key, algorithm, digest, rng),
        }
    }

    pub fn verify(
        public: &PublicKeyMaterial,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        ensure_family(algorithm.as_str(), algorithm.family(), public.family())?;
        ensure_digest_len(algorithm, digest)?;
        match public {
            PublicKeyMaterial::Rsa(key) => RsaSystem::verify(key, algorithm, digest, signature),
            PublicKeyMaterial::Ec(key) => EcSystem::verify(key, algorithm, digest, signature),
        }
    }

    /// Verifies with the public half of `material`. Oct keys have none.
    pub fn verify_with_material(
        material: &KeyMaterial,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        match material.public() {
            Some(public) => Self::verify(&public, algorithm, digest, signature),
            None => Err(Error::unsupported(algorithm, "oct key")),
        }
    }

    pub fn encrypt<R: CryptoRngCore>(
        material: &KeyMaterial,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
        aad: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<EncryptedPayload> {
        ensure_family(algorithm.as_str(), algorithm.family(), material.family())?;
        match material {
            KeyMaterial::Rsa(key) => RsaSystem::encrypt(key, algorithm, plaintext, aad, rng),
            KeyMaterial::Ec(key) => EcSystem::encrypt(key, algorithm, plaintext, aad, rng),
            KeyMaterial::Oct(key) => OctSystem::encrypt(key, algorithm, plaintext, aad, rng),
        }
    }

    pub fn decrypt(
        material: &KeyMaterial,
        payload: &EncryptedPayload,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let algorithm = payload.algorithm;
        ensure_family(algorithm.as_str(), algorithm.family(), material.family())?;
        match material {
            KeyMaterial::Rsa(key) => RsaSystem::decrypt(key, payload, aad),
            KeyMaterial::Ec(key) => EcSystem::decrypt(key, payload, aad),
            KeyMaterial::Oct(key) => OctSystem::decrypt(key, payload, aad),
        }
    }

    /// Wraps a key with the same algorithms as [`CryptoEngine::encrypt`], without AAD.
    pub fn wrap_key<R: CryptoRngCore>(
        material: &KeyMaterial,
        algorithm: EncryptionAlgorithm,
        key: &[u8],
        rng: &mut R,
    ) -> Result<EncryptedPayload> {
        Self::encrypt(material, algorithm, key, None, rng)
    }

    pub fn unwrap_key(material: &KeyMaterial, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        Self::decrypt(material, payload, None)
    }

    /// SHA-1 thumbprint of a DER encoded certificate.
    pub fn thumbprint(der: &[u8]) -> Vec<u8> {
        Sha1::digest(der).to_vec()
    }
}

fn ensure_family(operation: &str, expected: KeyFamily, actual: KeyFamily) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::unsupported(operation, format!("{} key", actual.algorithm_name())))
    }
}

fn ensure_digest_len(algorithm: SignatureAlgorithm, digest: &[u8]) -> Result<()> {
    let expected = algorithm.hash().output_len();
    if digest.len() == expected {
        Ok(())
    } else {
        Err(Error::invalid_parameter(
            "digest length",
            digest.len(),
            [expected],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn all_valid_combinations() -> Vec<(KeyType, KeyParameter)> {
        [KeyType::Ec, KeyType::Rsa]
            .iter()
            .flat_map(|kt| kt.valid_parameters().iter().map(move |p| (*kt, *p)))
            .collect()
    }

    fn signature_algorithms_for(material: &KeyMaterial) -> Vec<SignatureAlgorithm> {
        match material {
            KeyMaterial::Ec(key) => vec![SignatureAlgorithm::for_curve(key.curve())],
            KeyMaterial::Rsa(_) => vec![
                SignatureAlgorithm::PS256,
                SignatureAlgorithm::PS384,
                SignatureAlgorithm::PS512,
                SignatureAlgorithm::RS256,
                SignatureAlgorithm::RS384,
                SignatureAlgorithm::RS512,
            ],
            KeyMaterial::Oct(_) => vec![],
        }
    }

    #[test]
    fn test_sign_verify_all_valid_parameters() {
        for (key_type, parameter) in all_valid_combinations() {
            let material = CryptoEngine::generate(key_type, Some(parameter), &mut OsRng).unwrap();
            assert_eq!(material.parameter(), parameter);

            for algorithm in signature_algorithms_for(&material) {
                let digest = algorithm.digest(b"fixed message");
                let mut signature =
                    CryptoEngine::sign(&material, algorithm, &digest, &mut OsRng).unwrap();
                assert!(
                    CryptoEngine::verify_with_material(&material, algorithm, &digest, &signature)
                        .unwrap(),
                    "{key_type} {parameter} {algorithm}"
                );

                signature[0] ^= 0x01;
                assert!(
                    !CryptoEngine::verify_with_material(&material, algorithm, &digest, &signature)
                        .unwrap(),
                    "{key_type} {parameter} {algorithm} accepted a corrupted signature"
                );
            }
        }
    }

    #[test]
    fn test_generate_oct_sizes() {
        for parameter in KeyType::Oct.valid_parameters() {
            let material = CryptoEngine::generate(KeyType::Oct, Some(*parameter), &mut OsRng).unwrap();
            assert_eq!(material.parameter(), *parameter);
        }
    }

    #[test]
    fn test_generate_defaults_parameter() {
        let material = CryptoEngine::generate(KeyType::EcHsm, None, &mut OsRng).unwrap();
        assert_eq!(material.parameter(), KeyParameter::Curve(KeyCurveName::P256));
    }

    #[test]
    fn test_generate_rejects_invalid_parameter() {
        let result = CryptoEngine::generate(KeyType::Oct, Some(KeyParameter::KeySize(64)), &mut OsRng);
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_sign_family_mismatch_is_unsupported() {
        let material = CryptoEngine::generate(KeyType::Ec, None, &mut OsRng).unwrap();
        let digest = SignatureAlgorithm::RS256.digest(b"data");
        let result = CryptoEngine::sign(&material, SignatureAlgorithm::RS256, &digest, &mut OsRng);
        assert!(matches!(result, Err(Error::UnsupportedOperation { .. })));

        let oct = CryptoEngine::generate(KeyType::Oct, None, &mut OsRng).unwrap();
        let result = CryptoEngine::sign(&oct, SignatureAlgorithm::ES256, &digest, &mut OsRng);
        assert!(matches!(result, Err(Error::UnsupportedOperation { .. })));
    }

    #[test]
    fn test_sign_curve_mismatch_is_conflict() {
        let material =
            CryptoEngine::generate(KeyType::Ec, Some(KeyCurveName::P384.into()), &mut OsRng).unwrap();
        let digest = SignatureAlgorithm::ES256.digest(b"data");
        let result = CryptoEngine::sign(&material, SignatureAlgorithm::ES256, &digest, &mut OsRng);
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_sign_wrong_digest_length() {
        let material = CryptoEngine::generate(KeyType::Ec, None, &mut OsRng).unwrap();
        let result = CryptoEngine::sign(&material, SignatureAlgorithm::ES256, &[0u8; 20], &mut OsRng);
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_verify_malformed_signature_is_crypto_failure() {
        let material = CryptoEngine::generate(KeyType::Ec, None, &mut OsRng).unwrap();
        let digest = SignatureAlgorithm::ES256.digest(b"data");
        let result =
            CryptoEngine::verify_with_material(&material, SignatureAlgorithm::ES256, &digest, &[1, 2, 3]);
        assert!(matches!(result, Err(Error::CryptoFailure(_))));
    }

    #[test]
    fn test_encrypt_decrypt_rsa_and_oct() {
        let rsa = CryptoEngine::generate(KeyType::Rsa, None, &mut OsRng).unwrap();
        for algorithm in [
            EncryptionAlgorithm::Rsa15,
            EncryptionAlgorithm::RsaOaep,
            EncryptionAlgorithm::RsaOaep256,
        ] {
            let payload = CryptoEngine::encrypt(&rsa, algorithm, b"plaintext", None, &mut OsRng).unwrap();
            assert_eq!(payload.iv, None);
            assert_eq!(CryptoEngine::decrypt(&rsa, &payload, None).unwrap(), b"plaintext");
        }

        for (bits, algorithm) in [
            (128, EncryptionAlgorithm::A128Gcm),
            (192, EncryptionAlgorithm::A192Gcm),
            (256, EncryptionAlgorithm::A256Gcm),
        ] {
            let oct =
                CryptoEngine::generate(KeyType::Oct, Some(KeyParameter::KeySize(bits)), &mut OsRng).unwrap();
            let payload =
                CryptoEngine::encrypt(&oct, algorithm, b"plaintext", Some(b"aad"), &mut OsRng).unwrap();
            assert_eq!(payload.iv.as_ref().map(Vec::len), Some(12));
            assert_eq!(payload.tag.as_ref().map(Vec::len), Some(16));
            assert_eq!(
                CryptoEngine::decrypt(&oct, &payload, Some(b"aad")).unwrap(),
                b"plaintext"
            );
        }
    }

    #[test]
    fn test_encrypt_with_ec_is_unsupported() {
        let ec = CryptoEngine::generate(KeyType::Ec, None, &mut OsRng).unwrap();
        let result = CryptoEngine::encrypt(&ec, EncryptionAlgorithm::RsaOaep, b"x", None, &mut OsRng);
        assert!(matches!(result, Err(Error::UnsupportedOperation { .. })));
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let oct = CryptoEngine::generate(KeyType::Oct, Some(KeyParameter::KeySize(256)), &mut OsRng).unwrap();
        let cek = [7u8; 32];
        let wrapped = CryptoEngine::wrap_key(&oct, EncryptionAlgorithm::A256Gcm, &cek, &mut OsRng).unwrap();
        assert_ne!(wrapped.ciphertext, cek);
        assert_eq!(CryptoEngine::unwrap_key(&oct, &wrapped).unwrap(), cek);
    }

    #[test]
    fn test_thumbprint_is_sha1() {
        assert_eq!(CryptoEngine::thumbprint(b"abc").len(), 20);
        assert_eq!(
            CryptoEngine::thumbprint(b"abc")[..4],
            [0xa9, 0x99, 0x3e, 0x36]
        );
    }

    #[test]
    fn test_algorithm_names_parse() {
        for algorithm in SignatureAlgorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<SignatureAlgorithm>().unwrap(), algorithm);
        }
        for algorithm in EncryptionAlgorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<EncryptionAlgorithm>().unwrap(), algorithm);
        }
        assert!("HS256".parse::<SignatureAlgorithm>().is_err());
    }
}

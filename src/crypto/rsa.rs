//! `RsaSystem` 提供 RSA 签名（PSS 与 PKCS#1 v1.5）以及 RSA1_5 / OAEP 加解密。

use crate::common::errors::{Error, Result};
use crate::crypto::material::{RsaKeyPair, RsaPublicKeyInfo};
use crate::crypto::traits::KeyFamilySystem;
use crate::crypto::{EncryptedPayload, EncryptionAlgorithm, SignatureAlgorithm};
use crate::key_type::{KeyFamily, KeyParameter};
use rand_core::CryptoRngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

/// RSA加密系统实现
pub struct RsaSystem;

impl KeyFamilySystem for RsaSystem {
    const FAMILY: KeyFamily = KeyFamily::Rsa;
    type KeyPair = RsaKeyPair;
    type PublicKey = RsaPublicKeyInfo;

    fn generate<R: CryptoRngCore>(parameter: KeyParameter, rng: &mut R) -> Result<Self::KeyPair> {
        let bits = match parameter {
            KeyParameter::KeySize(bits) => bits as usize,
            other => {
                return Err(Error::invalid_parameter(
                    "key size",
                    other,
                    KeyFamily::Rsa.valid_parameters(),
                ));
            }
        };
        let private_key = RsaPrivateKey::new(rng, bits)
            .map_err(|e| Error::crypto(format!("生成RSA密钥失败: {}", e)))?;
        RsaKeyPair::from_private_key(&private_key)
    }

    fn sign<R: CryptoRngCore>(
        key: &Self::KeyPair,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let private_key = key.private_key()?;
        // PSS salt length equals the digest length
        let signature = match algorithm {
            SignatureAlgorithm::PS256 => private_key.sign_with_rng(rng, Pss::new::<Sha256>(), digest),
            SignatureAlgorithm::PS384 => private_key.sign_with_rng(rng, Pss::new::<Sha384>(), digest),
            SignatureAlgorithm::PS512 => private_key.sign_with_rng(rng, Pss::new::<Sha512>(), digest),
            SignatureAlgorithm::RS256 => private_key.sign(Pkcs1v15Sign::new::<Sha256>(), digest),
            SignatureAlgorithm::RS384 => private_key.sign(Pkcs1v15Sign::new::<Sha384>(), digest),
            SignatureAlgorithm::RS512 => private_key.sign(Pkcs1v15Sign::new::<Sha512>(), digest),
            other => return Err(Error::unsupported(other, "RSA key")),
        };
        signature.map_err(|e| Error::crypto(format!("RSA签名失败: {}", e)))
    }

    fn verify(
        key: &Self::PublicKey,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let public_key = key.public_key()?;
        if signature.len() != public_key.size() {
            return Err(Error::crypto(format!(
                "malformed RSA signature: expected {} bytes, got {}",
                public_key.size(),
                signature.len()
            )));
        }
        let outcome = match algorithm {
            SignatureAlgorithm::PS256 => public_key.verify(Pss::new::<Sha256>(), digest, signature),
            SignatureAlgorithm::PS384 => public_key.verify(Pss::new::<Sha384>(), digest, signature),
            SignatureAlgorithm::PS512 => public_key.verify(Pss::new::<Sha512>(), digest, signature),
            SignatureAlgorithm::RS256 => {
                public_key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            }
            SignatureAlgorithm::RS384 => {
                public_key.verify(Pkcs1v15Sign::new::<Sha384>(), digest, signature)
            }
            SignatureAlgorithm::RS512 => {
                public_key.verify(Pkcs1v15Sign::new::<Sha512>(), digest, signature)
            }
            other => return Err(Error::unsupported(other, "RSA key")),
        };
        Ok(outcome.is_ok())
    }

    fn encrypt<R: CryptoRngCore>(
        key: &Self::KeyPair,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
        _aad: Option<&[u8]>, // RSA 填充不使用附加数据
        rng: &mut R,
    ) -> Result<EncryptedPayload> {
        let public_key = key.public().public_key()?;
        let ciphertext = match algorithm {
            EncryptionAlgorithm::Rsa15 => public_key.encrypt(rng, Pkcs1v15Encrypt, plaintext),
            EncryptionAlgorithm::RsaOaep => public_key.encrypt(rng, Oaep::new::<Sha1>(), plaintext),
            EncryptionAlgorithm::RsaOaep256 => {
                public_key.encrypt(rng, Oaep::new::<Sha256>(), plaintext)
            }
            other => return Err(Error::unsupported(other, "RSA key")),
        }
        .map_err(|e| Error::crypto(format!("RSA加密失败: {}", e)))?;

        Ok(EncryptedPayload {
            algorithm,
            ciphertext,
            iv: None,
            tag: None,
        })
    }

    fn decrypt(
        key: &Self::KeyPair,
        payload: &EncryptedPayload,
        _aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let private_key = key.private_key()?;
        let ciphertext = &payload.ciphertext;
        match payload.algorithm {
            EncryptionAlgorithm::Rsa15 => private_key.decrypt(Pkcs1v15Encrypt, ciphertext),
            EncryptionAlgorithm::RsaOaep => private_key.decrypt(Oaep::new::<Sha1>(), ciphertext),
            EncryptionAlgorithm::RsaOaep256 => {
                private_key.decrypt(Oaep::new::<Sha256>(), ciphertext)
            }
            other => return Err(Error::unsupported(other, "RSA key")),
        }
        .map_err(|e| Error::crypto(format!("RSA解密失败: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn setup_keypair() -> RsaKeyPair {
        RsaSystem::generate(KeyParameter::KeySize(2048), &mut OsRng).unwrap()
    }

    #[test]
    fn test_rsa_generate_2048() {
        let key = setup_keypair();
        assert_eq!(key.bits(), 2048);
        assert_eq!(key.public().bits(), 2048);
    }

    #[test]
    fn test_rsa_pkcs1_signature_is_deterministic() {
        let key = setup_keypair();
        let digest = SignatureAlgorithm::RS256.digest(b"message");
        let first = RsaSystem::sign(&key, SignatureAlgorithm::RS256, &digest, &mut OsRng).unwrap();
        let second = RsaSystem::sign(&key, SignatureAlgorithm::RS256, &digest, &mut OsRng).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 256);
    }

    #[test]
    fn test_rsa_pss_verify_wrong_digest() {
        let key = setup_keypair();
        let digest = SignatureAlgorithm::PS256.digest(b"message");
        let signature = RsaSystem::sign(&key, SignatureAlgorithm::PS256, &digest, &mut OsRng).unwrap();

        let other = SignatureAlgorithm::PS256.digest(b"other message");
        assert!(!RsaSystem::verify(&key.public(), SignatureAlgorithm::PS256, &other, &signature).unwrap());
    }

    #[test]
    fn test_rsa_short_signature_is_malformed() {
        let key = setup_keypair();
        let digest = SignatureAlgorithm::RS256.digest(b"message");
        let result = RsaSystem::verify(&key.public(), SignatureAlgorithm::RS256, &digest, &[0u8; 10]);
        assert!(matches!(result, Err(Error::CryptoFailure(_))));
    }

    #[test]
    fn test_rsa_oaep_decrypt_with_wrong_padding_fails() {
        let key = setup_keypair();
        let mut payload =
            RsaSystem::encrypt(&key, EncryptionAlgorithm::RsaOaep256, b"secret", None, &mut OsRng).unwrap();
        payload.algorithm = EncryptionAlgorithm::RsaOaep;
        assert!(matches!(
            RsaSystem::decrypt(&key, &payload, None),
            Err(Error::CryptoFailure(_))
        ));
    }
}

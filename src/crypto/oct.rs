//! AES-GCM 对称加密实现（oct 密钥族）
use crate::common::errors::{Error, Result};
use crate::common::utils::ZeroizingVec;
use crate::crypto::material::OctKey;
use crate::crypto::traits::KeyFamilySystem;
use crate::crypto::{EncryptedPayload, EncryptionAlgorithm};
use crate::key_type::{KeyFamily, KeyParameter};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use rand_core::CryptoRngCore;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM 对称加密系统
#[derive(Debug)]
pub struct OctSystem;

impl OctSystem {
    fn ensure_key_size(key: &OctKey, algorithm: EncryptionAlgorithm) -> Result<()> {
        match algorithm.aes_key_bits() {
            Some(bits) if bits == key.bits() => Ok(()),
            Some(bits) => Err(Error::conflict(
                "oct key",
                format!("{} bits", key.bits()),
                format!("{} requires a {}-bit key", algorithm, bits),
            )),
            None => Err(Error::unsupported(algorithm, "oct key")),
        }
    }
}

fn seal<C: AeadInPlace + KeyInit>(
    key: &[u8],
    iv: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = C::new_from_slice(key).map_err(|e| Error::crypto(format!("无效的AES密钥: {}", e)))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(iv), aad, &mut buffer)
        .map_err(|e| Error::crypto(format!("AES-GCM加密失败: {}", e)))?;
    Ok((buffer, tag.to_vec()))
}

fn open<C: AeadInPlace + KeyInit>(
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|e| Error::crypto(format!("无效的AES密钥: {}", e)))?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<C>::from_slice(iv),
            aad,
            &mut buffer,
            Tag::<C>::from_slice(tag),
        )
        .map_err(|_| Error::crypto("AES-GCM解密失败: authentication tag mismatch"))?;
    Ok(buffer)
}

impl KeyFamilySystem for OctSystem {
    const FAMILY: KeyFamily = KeyFamily::Oct;
    type KeyPair = OctKey;
    type PublicKey = OctKey;

    fn generate<R: CryptoRngCore>(parameter: KeyParameter, rng: &mut R) -> Result<Self::KeyPair> {
        let KeyParameter::KeySize(bits) = parameter else {
            return Err(Error::invalid_parameter(
                "key size",
                parameter,
                KeyFamily::Oct.valid_parameters(),
            ));
        };
        let mut key_bytes = vec![0u8; (bits / 8) as usize];
        rng.fill_bytes(&mut key_bytes);
        Ok(OctKey::new(ZeroizingVec(key_bytes)))
    }

    fn encrypt<R: CryptoRngCore>(
        key: &Self::KeyPair,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
        aad: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<EncryptedPayload> {
        Self::ensure_key_size(key, algorithm)?;
        let mut iv = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut iv);
        let aad = aad.unwrap_or_default();

        let (ciphertext, tag) = match algorithm {
            EncryptionAlgorithm::A128Gcm => seal::<Aes128Gcm>(key.bytes(), &iv, plaintext, aad)?,
            EncryptionAlgorithm::A192Gcm => seal::<Aes192Gcm>(key.bytes(), &iv, plaintext, aad)?,
            EncryptionAlgorithm::A256Gcm => seal::<Aes256Gcm>(key.bytes(), &iv, plaintext, aad)?,
            other => return Err(Error::unsupported(other, "oct key")),
        };

        Ok(EncryptedPayload {
            algorithm,
            ciphertext,
            iv: Some(iv.to_vec()),
            tag: Some(tag),
        })
    }

    fn decrypt(
        key: &Self::KeyPair,
        payload: &EncryptedPayload,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        Self::ensure_key_size(key, payload.algorithm)?;
        let iv = match payload.iv.as_deref() {
            Some(iv) if iv.len() == NONCE_SIZE => iv,
            other => {
                return Err(Error::invalid_parameter(
                    "iv length",
                    other.map_or(0, <[u8]>::len),
                    [NONCE_SIZE],
                ));
            }
        };
        let tag = match payload.tag.as_deref() {
            Some(tag) if tag.len() == TAG_SIZE => tag,
            other => {
                return Err(Error::invalid_parameter(
                    "tag length",
                    other.map_or(0, <[u8]>::len),
                    [TAG_SIZE],
                ));
            }
        };
        let aad = aad.unwrap_or_default();
        let ciphertext = &payload.ciphertext;

        match payload.algorithm {
            EncryptionAlgorithm::A128Gcm => open::<Aes128Gcm>(key.bytes(), iv, tag, ciphertext, aad),
            EncryptionAlgorithm::A192Gcm => open::<Aes192Gcm>(key.bytes(), iv, tag, ciphertext, aad),
            EncryptionAlgorithm::A256Gcm => open::<Aes256Gcm>(key.bytes(), iv, tag, ciphertext, aad),
            other => Err(Error::unsupported(other, "oct key")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn setup_key(bits: u32) -> OctKey {
        OctSystem::generate(KeyParameter::KeySize(bits), &mut OsRng).unwrap()
    }

    #[test]
    fn test_generate_key_length() {
        assert_eq!(setup_key(192).bytes().len(), 24);
    }

    #[test]
    fn test_key_size_mismatch_is_conflict() {
        let key = setup_key(128);
        let result = OctSystem::encrypt(&key, EncryptionAlgorithm::A256Gcm, b"data", None, &mut OsRng);
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = setup_key(256);
        let mut payload =
            OctSystem::encrypt(&key, EncryptionAlgorithm::A256Gcm, b"data", None, &mut OsRng).unwrap();
        payload.ciphertext[0] ^= 0xFF;
        assert!(matches!(
            OctSystem::decrypt(&key, &payload, None),
            Err(Error::CryptoFailure(_))
        ));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = setup_key(128);
        let payload =
            OctSystem::encrypt(&key, EncryptionAlgorithm::A128Gcm, b"data", Some(b"one"), &mut OsRng)
                .unwrap();
        assert!(OctSystem::decrypt(&key, &payload, Some(b"two")).is_err());
    }

    #[test]
    fn test_missing_iv_is_invalid_parameter() {
        let key = setup_key(128);
        let mut payload =
            OctSystem::encrypt(&key, EncryptionAlgorithm::A128Gcm, b"data", None, &mut OsRng).unwrap();
        payload.iv = None;
        assert!(matches!(
            OctSystem::decrypt(&key, &payload, None),
            Err(Error::InvalidParameter { .. })
        ));
    }
}

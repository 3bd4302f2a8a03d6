//! 密钥材料
//!
//! 私钥以 PKCS#8 DER 保存在 `ZeroizingVec` 中，公钥以 SPKI DER 保存。
//! 每份材料只属于创建它的那个实体版本。

use crate::common::errors::{Error, Result};
use crate::common::utils::ZeroizingVec;
use crate::crypto::ec::{self, EcSystem};
use crate::key_type::{KeyCurveName, KeyFamily, KeyParameter};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, PrivateKeyInfo};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use x509_cert::der::Decode;
use x509_cert::spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

pub(crate) const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
pub(crate) const EC_PUBLIC_KEY_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// RSA 密钥对
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsaKeyPair {
    bits: u32,
    private_der: ZeroizingVec,
    #[serde(with = "serde_bytes")]
    public_der: Vec<u8>,
}

impl RsaKeyPair {
    pub(crate) fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self> {
        let public_key = RsaPublicKey::from(private_key);
        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::crypto(format!("导出RSA私钥DER失败: {}", e)))?;
        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| Error::crypto(format!("导出RSA公钥DER失败: {}", e)))?;
        Ok(Self {
            bits: modulus_bits(&public_key)?,
            private_der: ZeroizingVec::new(private_der.as_bytes()),
            public_der: public_der.as_bytes().to_vec(),
        })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn private_der(&self) -> &[u8] {
        &self.private_der
    }

    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn private_key(&self) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_der(&self.private_der)
            .map_err(|e| Error::crypto(format!("解析RSA私钥失败: {}", e)))
    }

    pub fn public(&self) -> RsaPublicKeyInfo {
        RsaPublicKeyInfo {
            bits: self.bits,
            der: self.public_der.clone(),
        }
    }
}

/// RSA 公钥（SPKI DER）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaPublicKeyInfo {
    bits: u32,
    #[serde(with = "serde_bytes")]
    der: Vec<u8>,
}

impl RsaPublicKeyInfo {
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| Error::crypto(format!("解析RSA公钥失败: {}", e)))?;
        Ok(Self {
            bits: modulus_bits(&public_key)?,
            der: der.to_vec(),
        })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_der(&self.der)
            .map_err(|e| Error::crypto(format!("解析RSA公钥失败: {}", e)))
    }
}

fn modulus_bits(public_key: &RsaPublicKey) -> Result<u32> {
    u32::try_from(public_key.n().bits())
        .map_err(|_| Error::crypto("RSA modulus size out of range"))
}

/// EC 密钥对
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcKeyPair {
    curve: KeyCurveName,
    private_der: ZeroizingVec,
    #[serde(with = "serde_bytes")]
    public_der: Vec<u8>,
}

impl EcKeyPair {
    pub(crate) fn new(curve: KeyCurveName, private_der: ZeroizingVec, public_der: Vec<u8>) -> Self {
        Self {
            curve,
            private_der,
            public_der,
        }
    }

    pub fn curve(&self) -> KeyCurveName {
        self.curve
    }

    pub fn private_der(&self) -> &[u8] {
        &self.private_der
    }

    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn public(&self) -> EcPublicKey {
        EcPublicKey {
            curve: self.curve,
            der: self.public_der.clone(),
        }
    }
}

/// EC 公钥（SPKI DER）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPublicKey {
    curve: KeyCurveName,
    #[serde(with = "serde_bytes")]
    der: Vec<u8>,
}

impl EcPublicKey {
    pub(crate) fn new(curve: KeyCurveName, der: Vec<u8>) -> Self {
        Self { curve, der }
    }

    pub fn curve(&self) -> KeyCurveName {
        self.curve
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// 对称密钥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OctKey {
    key: ZeroizingVec,
}

impl OctKey {
    pub(crate) fn new(key: ZeroizingVec) -> Self {
        Self { key }
    }

    pub fn bits(&self) -> u32 {
        (self.key.len() * 8) as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyMaterial {
    Rsa(RsaKeyPair),
    Ec(EcKeyPair),
    Oct(OctKey),
}

impl KeyMaterial {
    pub fn family(&self) -> KeyFamily {
        match self {
            KeyMaterial::Rsa(_) => KeyFamily::Rsa,
            KeyMaterial::Ec(_) => KeyFamily::Ec,
            KeyMaterial::Oct(_) => KeyFamily::Oct,
        }
    }

    /// Key size or curve, re-derived from the material itself.
    pub fn parameter(&self) -> KeyParameter {
        match self {
            KeyMaterial::Rsa(key) => KeyParameter::KeySize(key.bits()),
            KeyMaterial::Ec(key) => KeyParameter::Curve(key.curve()),
            KeyMaterial::Oct(key) => KeyParameter::KeySize(key.bits()),
        }
    }

    pub fn public(&self) -> Option<PublicKeyMaterial> {
        match self {
            KeyMaterial::Rsa(key) => Some(PublicKeyMaterial::Rsa(key.public())),
            KeyMaterial::Ec(key) => Some(PublicKeyMaterial::Ec(key.public())),
            KeyMaterial::Oct(_) => None,
        }
    }

    /// PKCS#8 DER of an asymmetric private key.
    pub fn private_pkcs8_der(&self) -> Option<&[u8]> {
        match self {
            KeyMaterial::Rsa(key) => Some(key.private_der()),
            KeyMaterial::Ec(key) => Some(key.private_der()),
            KeyMaterial::Oct(_) => None,
        }
    }

    /// Parses an RSA or EC private key from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::try_from(der)
            .map_err(|e| Error::invalid_parameter("private key", e, ["PKCS#8 DER"]))?;
        let oid = info.algorithm.oid;
        if oid == RSA_ENCRYPTION_OID {
            let private_key = RsaPrivateKey::from_pkcs8_der(der)
                .map_err(|e| Error::invalid_parameter("private key", e, ["PKCS#8 RSA key"]))?;
            Ok(KeyMaterial::Rsa(RsaKeyPair::from_private_key(&private_key)?))
        } else if oid == EC_PUBLIC_KEY_OID {
            let curve_oid = info
                .algorithm
                .parameters_oid()
                .map_err(|e| Error::invalid_parameter("EC parameters", e, ["named curve"]))?;
            let curve = ec::curve_from_oid(&curve_oid)?;
            Ok(KeyMaterial::Ec(EcSystem::from_pkcs8_der(curve, der)?))
        } else {
            Err(Error::invalid_parameter(
                "private key algorithm",
                oid,
                [RSA_ENCRYPTION_OID, EC_PUBLIC_KEY_OID],
            ))
        }
    }
}

/// 公钥部分，用于验签与证书公钥比对
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKeyMaterial {
    Rsa(RsaPublicKeyInfo),
    Ec(EcPublicKey),
}

impl PublicKeyMaterial {
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let spki = SubjectPublicKeyInfoRef::from_der(der)
            .map_err(|e| Error::invalid_parameter("public key", e, ["SPKI DER"]))?;
        let oid = spki.algorithm.oid;
        if oid == RSA_ENCRYPTION_OID {
            Ok(PublicKeyMaterial::Rsa(RsaPublicKeyInfo::from_spki_der(der)?))
        } else if oid == EC_PUBLIC_KEY_OID {
            let curve_oid = spki
                .algorithm
                .parameters_oid()
                .map_err(|e| Error::invalid_parameter("EC parameters", e, ["named curve"]))?;
            let curve = ec::curve_from_oid(&curve_oid)?;
            Ok(PublicKeyMaterial::Ec(EcSystem::public_from_spki_der(curve, der)?))
        } else {
            Err(Error::invalid_parameter(
                "public key algorithm",
                oid,
                [RSA_ENCRYPTION_OID, EC_PUBLIC_KEY_OID],
            ))
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            PublicKeyMaterial::Rsa(_) => KeyFamily::Rsa,
            PublicKeyMaterial::Ec(_) => KeyFamily::Ec,
        }
    }

    pub fn parameter(&self) -> KeyParameter {
        match self {
            PublicKeyMaterial::Rsa(key) => KeyParameter::KeySize(key.bits()),
            PublicKeyMaterial::Ec(key) => KeyParameter::Curve(key.curve()),
        }
    }

    pub fn spki_der(&self) -> &[u8] {
        match self {
            PublicKeyMaterial::Rsa(key) => key.der(),
            PublicKeyMaterial::Ec(key) => key.der(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoEngine;
    use crate::key_type::KeyType;
    use rand_core::OsRng;

    #[test]
    fn test_pkcs8_round_trip_preserves_parameter() {
        for (key_type, parameter) in [
            (KeyType::Rsa, KeyParameter::KeySize(2048)),
            (KeyType::Ec, KeyParameter::Curve(KeyCurveName::P256K)),
            (KeyType::Ec, KeyParameter::Curve(KeyCurveName::P521)),
        ] {
            let material = CryptoEngine::generate(key_type, Some(parameter), &mut OsRng).unwrap();
            let der = material.private_pkcs8_der().unwrap();
            let parsed = KeyMaterial::from_pkcs8_der(der).unwrap();
            assert_eq!(parsed.parameter(), parameter);
            assert_eq!(parsed.public(), material.public());
        }
    }

    #[test]
    fn test_public_from_spki() {
        let material =
            CryptoEngine::generate(KeyType::Ec, Some(KeyCurveName::P384.into()), &mut OsRng).unwrap();
        let public = material.public().unwrap();
        let parsed = PublicKeyMaterial::from_spki_der(public.spki_der()).unwrap();
        assert_eq!(parsed, public);
        assert_eq!(parsed.parameter(), KeyParameter::Curve(KeyCurveName::P384));
    }

    #[test]
    fn test_oct_has_no_public_part() {
        let material = CryptoEngine::generate(KeyType::Oct, None, &mut OsRng).unwrap();
        assert!(material.public().is_none());
        assert!(material.private_pkcs8_der().is_none());
        assert_eq!(material.parameter(), KeyParameter::KeySize(128));
    }

    #[test]
    fn test_garbage_pkcs8_is_invalid_parameter() {
        let result = KeyMaterial::from_pkcs8_der(&[0x30, 0x03, 0x02, 0x01, 0x00]);
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }
}

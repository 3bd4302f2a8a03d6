//! JSON Web Key 投影与导入
//!
//! Keys are exposed as public JWKs (`kty`, `n`, `e`, `crv`, `x`, `y`) and can be
//! imported from private JWKs. Byte fields use unpadded base64url.

use crate::common::errors::{Error, Result};
use crate::common::utils::ZeroizingVec;
use crate::crypto::ec::EcSystem;
use crate::crypto::material::{KeyMaterial, OctKey, RsaKeyPair};
use crate::crypto::KeyOperation;
use crate::key_type::{KeyCurveName, KeyFamily, KeyParameter, KeyType};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};

mod base64url {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| URL_SAFE_NO_PAD.decode(s.trim_end_matches('=')))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<KeyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<KeyOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<KeyCurveName>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub n: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub e: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub d: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub p: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub q: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub dp: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub dq: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub qi: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub k: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub x: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64url")]
    pub y: Option<Vec<u8>>,
}

impl JsonWebKey {
    /// Public projection of a key. Octet keys expose no key bytes.
    pub fn public_from_material(
        kid: impl Into<String>,
        key_type: KeyType,
        material: &KeyMaterial,
        key_ops: impl IntoIterator<Item = KeyOperation>,
    ) -> Result<Self> {
        let mut jwk = JsonWebKey {
            kid: Some(kid.into()),
            kty: Some(key_type),
            key_ops: key_ops.into_iter().collect(),
            ..Default::default()
        };
        match material {
            KeyMaterial::Rsa(key) => {
                let public_key = key.public().public_key()?;
                jwk.n = Some(public_key.n().to_bytes_be());
                jwk.e = Some(public_key.e().to_bytes_be());
            }
            KeyMaterial::Ec(key) => {
                let (x, y) = EcSystem::coordinates(&key.public())?;
                jwk.crv = Some(key.curve());
                jwk.x = Some(x);
                jwk.y = Some(y);
            }
            KeyMaterial::Oct(_) => {}
        }
        Ok(jwk)
    }

    /// Builds key material from a private JWK and validates its derived
    /// parameter against `kty`.
    pub fn to_material(&self) -> Result<(KeyType, KeyMaterial)> {
        let key_type = self
            .kty
            .ok_or_else(|| Error::invalid_parameter("kty", "<missing>", KeyType::ALL))?;
        let material = match key_type.family() {
            KeyFamily::Rsa => self.rsa_material()?,
            KeyFamily::Ec => self.ec_material()?,
            KeyFamily::Oct => {
                let k = required(&self.k, "k")?;
                KeyMaterial::Oct(OctKey::new(ZeroizingVec::new(k)))
            }
        };
        key_type.validate(Some(material.parameter()))?;
        Ok((key_type, material))
    }

    fn rsa_material(&self) -> Result<KeyMaterial> {
        let n = BigUint::from_bytes_be(required(&self.n, "n")?);
        let e = BigUint::from_bytes_be(required(&self.e, "e")?);
        let d = BigUint::from_bytes_be(required(&self.d, "d")?);
        let p = BigUint::from_bytes_be(required(&self.p, "p")?);
        let q = BigUint::from_bytes_be(required(&self.q, "q")?);

        let private_key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| Error::invalid_parameter("RSA key components", e, ["n, e, d, p, q"]))?;
        private_key
            .validate()
            .map_err(|e| Error::invalid_parameter("RSA key components", e, ["consistent RSA key"]))?;
        Ok(KeyMaterial::Rsa(RsaKeyPair::from_private_key(&private_key)?))
    }

    fn ec_material(&self) -> Result<KeyMaterial> {
        let curve = self
            .crv
            .ok_or_else(|| Error::invalid_parameter("crv", "<missing>", KeyCurveName::ALL))?;
        let key = EcSystem::from_scalar(curve, required(&self.d, "d")?)?;

        // 如提供了公钥坐标，须与私钥一致
        if self.x.is_some() || self.y.is_some() {
            let (x, y) = EcSystem::coordinates(&key.public())?;
            if self.x.as_deref() != Some(x.as_slice()) || self.y.as_deref() != Some(y.as_slice()) {
                return Err(Error::invalid_parameter(
                    "EC public coordinates",
                    "x/y not matching d",
                    ["coordinates derived from d"],
                ));
            }
        }
        Ok(KeyMaterial::Ec(key))
    }

    pub fn parameter(&self) -> Option<KeyParameter> {
        if let Some(curve) = self.crv {
            return Some(KeyParameter::Curve(curve));
        }
        self.n
            .as_ref()
            .map(|n| KeyParameter::KeySize(BigUint::from_bytes_be(n).bits() as u32))
            .or_else(|| self.k.as_ref().map(|k| KeyParameter::KeySize((k.len() * 8) as u32)))
    }
}

fn required<'a>(field: &'a Option<Vec<u8>>, name: &str) -> Result<&'a [u8]> {
    field
        .as_deref()
        .ok_or_else(|| Error::invalid_parameter(name, "<missing>", [format!("base64url {name}")]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoEngine;
    use rand_core::OsRng;
    use rsa::traits::PrivateKeyParts;

    fn private_rsa_jwk(bits: usize) -> JsonWebKey {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
        let primes = private_key.primes();
        JsonWebKey {
            kty: Some(KeyType::Rsa),
            n: Some(private_key.n().to_bytes_be()),
            e: Some(private_key.e().to_bytes_be()),
            d: Some(private_key.d().to_bytes_be()),
            p: Some(primes[0].to_bytes_be()),
            q: Some(primes[1].to_bytes_be()),
            ..Default::default()
        }
    }

    #[test]
    fn test_import_rsa_jwk() {
        let jwk = private_rsa_jwk(2048);
        let (key_type, material) = jwk.to_material().unwrap();
        assert_eq!(key_type, KeyType::Rsa);
        assert_eq!(material.parameter(), KeyParameter::KeySize(2048));
        assert_eq!(jwk.parameter(), Some(KeyParameter::KeySize(2048)));
    }

    #[test]
    fn test_import_rsa_jwk_with_unsupported_size() {
        let jwk = private_rsa_jwk(1024);
        let result = jwk.to_material();
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_import_rsa_jwk_missing_prime() {
        let mut jwk = private_rsa_jwk(2048);
        jwk.q = None;
        assert!(matches!(jwk.to_material(), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_ec_public_projection_and_reimport() {
        let material =
            CryptoEngine::generate(KeyType::Ec, Some(KeyCurveName::P384.into()), &mut OsRng).unwrap();
        let public = JsonWebKey::public_from_material("kid-1", KeyType::Ec, &material, [
            KeyOperation::Sign,
            KeyOperation::Verify,
        ])
        .unwrap();
        assert_eq!(public.crv, Some(KeyCurveName::P384));
        assert_eq!(public.x.as_ref().map(Vec::len), Some(48));
        assert!(public.d.is_none());

        // 缺少 d 不能导入
        assert!(public.to_material().is_err());
    }

    #[test]
    fn test_ec_mismatched_coordinates_rejected() {
        let d = [0x11u8; 32];
        let jwk = JsonWebKey {
            kty: Some(KeyType::Ec),
            crv: Some(KeyCurveName::P256),
            d: Some(d.to_vec()),
            x: Some(vec![0u8; 32]),
            y: Some(vec![0u8; 32]),
            ..Default::default()
        };
        assert!(matches!(jwk.to_material(), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_oct_jwk_serde_base64url() {
        let json = r#"{"kty":"oct-HSM","k":"AAECAwQFBgcICQoLDA0ODw"}"#;
        let jwk: JsonWebKey = serde_json::from_str(json).unwrap();
        let (key_type, material) = jwk.to_material().unwrap();
        assert_eq!(key_type, KeyType::OctHsm);
        assert_eq!(material.parameter(), KeyParameter::KeySize(128));

        let projected = JsonWebKey::public_from_material("k", key_type, &material, []).unwrap();
        let rendered = serde_json::to_string(&projected).unwrap();
        assert!(!rendered.contains("\"k\":"));
    }

    #[test]
    fn test_oct_jwk_bad_length() {
        let jwk = JsonWebKey {
            kty: Some(KeyType::Oct),
            k: Some(vec![0u8; 20]),
            ..Default::default()
        };
        match jwk.to_material() {
            Err(Error::InvalidParameter { valid, .. }) => assert_eq!(valid, vec!["128", "192", "256"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

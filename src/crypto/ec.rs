//! `EcSystem` 提供 P-256、P-256K（secp256k1）、P-384 与 P-521 上的 ECDSA。
//!
//! Signatures are computed over caller supplied digests (prehash) and returned
//! as raw `r || s`. The DER form is only used inside X.509 structures.

use crate::common::errors::{Error, Result};
use crate::crypto::material::{EcKeyPair, EcPublicKey};
use crate::crypto::traits::KeyFamilySystem;
use crate::crypto::SignatureAlgorithm;
use crate::key_type::{KeyCurveName, KeyFamily, KeyParameter};
use rand_core::CryptoRngCore;
use x509_cert::spki::ObjectIdentifier;

pub(crate) const P256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
pub(crate) const SECP256K1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.10");
pub(crate) const P384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
pub(crate) const P521_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

pub(crate) fn curve_oid(curve: KeyCurveName) -> ObjectIdentifier {
    match curve {
        KeyCurveName::P256 => P256_OID,
        KeyCurveName::P256K => SECP256K1_OID,
        KeyCurveName::P384 => P384_OID,
        KeyCurveName::P521 => P521_OID,
    }
}

pub(crate) fn curve_from_oid(oid: &ObjectIdentifier) -> Result<KeyCurveName> {
    KeyCurveName::ALL
        .iter()
        .copied()
        .find(|curve| curve_oid(*curve) == *oid)
        .ok_or_else(|| Error::invalid_parameter("curve", oid, KeyCurveName::ALL))
}

/// Per-curve helpers. Every curve crate exposes the same method names, so one
/// body serves all four.
macro_rules! curve_operations {
    ($module:ident, $krate:ident) => {
        mod $module {
            use crate::common::errors::{Error, Result};
            use crate::common::utils::ZeroizingVec;
            use rand_core::CryptoRngCore;
            use $krate::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
            use $krate::ecdsa::{Signature, SigningKey, VerifyingKey};
            use $krate::elliptic_curve::sec1::ToEncodedPoint;
            use $krate::pkcs8::{
                DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
            };
            use $krate::{PublicKey, SecretKey};

            const CURVE: &str = stringify!($krate);

            fn encode(secret: &SecretKey) -> Result<(ZeroizingVec, Vec<u8>)> {
                let private_der = secret
                    .to_pkcs8_der()
                    .map_err(|e| Error::crypto(format!("导出{}私钥DER失败: {}", CURVE, e)))?;
                let public_der = secret
                    .public_key()
                    .to_public_key_der()
                    .map_err(|e| Error::crypto(format!("导出{}公钥DER失败: {}", CURVE, e)))?;
                Ok((
                    ZeroizingVec::new(private_der.as_bytes()),
                    public_der.as_bytes().to_vec(),
                ))
            }

            fn secret_key(private_der: &[u8]) -> Result<SecretKey> {
                SecretKey::from_pkcs8_der(private_der)
                    .map_err(|e| Error::crypto(format!("解析{}私钥失败: {}", CURVE, e)))
            }

            fn public_key(public_der: &[u8]) -> Result<PublicKey> {
                PublicKey::from_public_key_der(public_der)
                    .map_err(|e| Error::crypto(format!("解析{}公钥失败: {}", CURVE, e)))
            }

            fn signing_key(private_der: &[u8]) -> Result<SigningKey> {
                let secret = secret_key(private_der)?;
                SigningKey::from_bytes(&secret.to_bytes())
                    .map_err(|e| Error::crypto(format!("{} signing key: {}", CURVE, e)))
            }

            fn prehash_sign(private_der: &[u8], digest: &[u8]) -> Result<Signature> {
                signing_key(private_der)?
                    .sign_prehash(digest)
                    .map_err(|e| Error::crypto(format!("{} 签名失败: {}", CURVE, e)))
            }

            pub(super) fn generate<R: CryptoRngCore>(rng: &mut R) -> Result<(ZeroizingVec, Vec<u8>)> {
                encode(&SecretKey::random(rng))
            }

            pub(super) fn from_scalar(d: &[u8]) -> Result<(ZeroizingVec, Vec<u8>)> {
                let secret = SecretKey::from_slice(d).map_err(|_| {
                    Error::invalid_parameter("EC private scalar", format!("{} bytes", d.len()), [CURVE])
                })?;
                encode(&secret)
            }

            /// Re-encodes a PKCS#8 key, returning it together with its SPKI.
            pub(super) fn from_pkcs8(private_der: &[u8]) -> Result<(ZeroizingVec, Vec<u8>)> {
                encode(&secret_key(private_der)?)
            }

            pub(super) fn check_public(public_der: &[u8]) -> Result<()> {
                public_key(public_der).map(|_| ())
            }

            pub(super) fn coordinates(public_der: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
                let point = public_key(public_der)?.to_encoded_point(false);
                match (point.x(), point.y()) {
                    (Some(x), Some(y)) => Ok((x.to_vec(), y.to_vec())),
                    _ => Err(Error::crypto(format!("{} public key is the identity", CURVE))),
                }
            }

            pub(super) fn sign_raw(private_der: &[u8], digest: &[u8]) -> Result<Vec<u8>> {
                Ok(prehash_sign(private_der, digest)?.to_bytes().to_vec())
            }

            pub(super) fn sign_der(private_der: &[u8], digest: &[u8]) -> Result<Vec<u8>> {
                Ok(prehash_sign(private_der, digest)?.to_der().as_bytes().to_vec())
            }

            pub(super) fn verify_raw(
                public_der: &[u8],
                digest: &[u8],
                signature: &[u8],
                signature_len: usize,
            ) -> Result<bool> {
                if signature.len() != signature_len {
                    return Err(Error::crypto(format!(
                        "malformed {} signature: expected {} bytes, got {}",
                        CURVE,
                        signature_len,
                        signature.len()
                    )));
                }
                let point = public_key(public_der)?.to_encoded_point(false);
                let verifying_key = VerifyingKey::from_sec1_bytes(point.as_bytes())
                    .map_err(|e| Error::crypto(format!("{} verifying key: {}", CURVE, e)))?;
                // r 或 s 越界的签名视为不匹配
                let Ok(signature) = Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(verifying_key.verify_prehash(digest, &signature).is_ok())
            }
        }
    };
}

curve_operations!(nist_p256, p256);
curve_operations!(nist_p384, p384);
curve_operations!(nist_p521, p521);
curve_operations!(secp256k1, k256);

macro_rules! on_curve {
    ($curve:expr, $func:ident($($arg:expr),*)) => {
        match $curve {
            KeyCurveName::P256 => nist_p256::$func($($arg),*),
            KeyCurveName::P256K => secp256k1::$func($($arg),*),
            KeyCurveName::P384 => nist_p384::$func($($arg),*),
            KeyCurveName::P521 => nist_p521::$func($($arg),*),
        }
    };
}

/// 椭圆曲线签名系统实现
pub struct EcSystem;

impl EcSystem {
    pub fn from_pkcs8_der(curve: KeyCurveName, der: &[u8]) -> Result<EcKeyPair> {
        let (private_der, public_der) = on_curve!(curve, from_pkcs8(der))?;
        Ok(EcKeyPair::new(curve, private_der, public_der))
    }

    /// Builds a key pair from the raw private scalar `d`.
    pub fn from_scalar(curve: KeyCurveName, d: &[u8]) -> Result<EcKeyPair> {
        let (private_der, public_der) = on_curve!(curve, from_scalar(d))?;
        Ok(EcKeyPair::new(curve, private_der, public_der))
    }

    pub fn public_from_spki_der(curve: KeyCurveName, der: &[u8]) -> Result<EcPublicKey> {
        on_curve!(curve, check_public(der))?;
        Ok(EcPublicKey::new(curve, der.to_vec()))
    }

    /// Affine `(x, y)` coordinates, each left-padded to the curve size.
    pub fn coordinates(key: &EcPublicKey) -> Result<(Vec<u8>, Vec<u8>)> {
        on_curve!(key.curve(), coordinates(key.der()))
    }

    /// DER encoded ECDSA signature, as embedded in certificates and CSRs.
    pub fn sign_der(key: &EcKeyPair, digest: &[u8]) -> Result<Vec<u8>> {
        on_curve!(key.curve(), sign_der(key.private_der(), digest))
    }

    fn ensure_curve(curve: KeyCurveName, algorithm: SignatureAlgorithm) -> Result<()> {
        match algorithm.curve() {
            Some(expected) if expected == curve => Ok(()),
            Some(expected) => Err(Error::conflict(
                "EC key",
                curve,
                format!("{} requires curve {}", algorithm, expected),
            )),
            None => Err(Error::unsupported(algorithm, "EC key")),
        }
    }
}

impl KeyFamilySystem for EcSystem {
    const FAMILY: KeyFamily = KeyFamily::Ec;
    type KeyPair = EcKeyPair;
    type PublicKey = EcPublicKey;

    fn generate<R: CryptoRngCore>(parameter: KeyParameter, rng: &mut R) -> Result<Self::KeyPair> {
        let KeyParameter::Curve(curve) = parameter else {
            return Err(Error::invalid_parameter(
                "curve",
                parameter,
                KeyFamily::Ec.valid_parameters(),
            ));
        };
        let (private_der, public_der) = on_curve!(curve, generate(rng))?;
        Ok(EcKeyPair::new(curve, private_der, public_der))
    }

    fn sign<R: CryptoRngCore>(
        key: &Self::KeyPair,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        _rng: &mut R, // RFC 6979 确定性签名
    ) -> Result<Vec<u8>> {
        Self::ensure_curve(key.curve(), algorithm)?;
        on_curve!(key.curve(), sign_raw(key.private_der(), digest))
    }

    fn verify(
        key: &Self::PublicKey,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        Self::ensure_curve(key.curve(), algorithm)?;
        let signature_len = key.curve().coordinate_len() * 2;
        on_curve!(key.curve(), verify_raw(key.der(), digest, signature, signature_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::DecodePrivateKey;
    use rand_core::OsRng;

    #[test]
    fn test_raw_signature_lengths() {
        for curve in KeyCurveName::ALL {
            let key = EcSystem::generate(KeyParameter::Curve(curve), &mut OsRng).unwrap();
            let algorithm = SignatureAlgorithm::for_curve(curve);
            let digest = algorithm.digest(b"payload");
            let signature = EcSystem::sign(&key, algorithm, &digest, &mut OsRng).unwrap();
            assert_eq!(signature.len(), curve.coordinate_len() * 2, "{curve}");
        }
    }

    #[test]
    fn test_coordinates_are_fixed_width() {
        let key = EcSystem::generate(KeyParameter::Curve(KeyCurveName::P521), &mut OsRng).unwrap();
        let (x, y) = EcSystem::coordinates(&key.public()).unwrap();
        assert_eq!(x.len(), 66);
        assert_eq!(y.len(), 66);
    }

    #[test]
    fn test_from_scalar_matches_generated_key() {
        let key = EcSystem::generate(KeyParameter::Curve(KeyCurveName::P256), &mut OsRng).unwrap();
        let secret = p256::SecretKey::from_pkcs8_der(key.private_der()).unwrap();

        let rebuilt = EcSystem::from_scalar(KeyCurveName::P256, &secret.to_bytes()).unwrap();
        assert_eq!(rebuilt.public_der(), key.public_der());
    }

    #[test]
    fn test_curve_oid_lookup() {
        for curve in KeyCurveName::ALL {
            assert_eq!(curve_from_oid(&curve_oid(curve)).unwrap(), curve);
        }
        let rsa_oid = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
        assert!(curve_from_oid(&rsa_oid).is_err());
    }

    #[test]
    fn test_zero_signature_does_not_verify() {
        let key = EcSystem::generate(KeyParameter::Curve(KeyCurveName::P256K), &mut OsRng).unwrap();
        let digest = SignatureAlgorithm::ES256K.digest(b"payload");
        let verified =
            EcSystem::verify(&key.public(), SignatureAlgorithm::ES256K, &digest, &[0u8; 64]).unwrap();
        assert!(!verified);
    }
}

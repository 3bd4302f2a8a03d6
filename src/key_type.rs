//! # 密钥类型描述
//!
//! The closed set of key kinds a vault can hold, each tied to one family
//! (EC, RSA or oct) and to the single parameter table of that family. HSM
//! variants only differ by a reported flag and share the software table.

use crate::common::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named elliptic curves, declared in name order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyCurveName {
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-256K")]
    P256K,
    #[serde(rename = "P-384")]
    P384,
    #[serde(rename = "P-521")]
    P521,
}

impl KeyCurveName {
    pub const ALL: [KeyCurveName; 4] = [Self::P256, Self::P256K, Self::P384, Self::P521];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P256K => "P-256K",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// Byte length of one affine coordinate (and of the private scalar).
    pub fn coordinate_len(&self) -> usize {
        match self {
            Self::P256 | Self::P256K => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

impl fmt::Display for KeyCurveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyCurveName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|curve| curve.as_str() == s)
            .ok_or_else(|| Error::invalid_parameter("curve", s, Self::ALL))
    }
}

/// A key size in bits or a curve name, depending on the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyParameter {
    KeySize(u32),
    Curve(KeyCurveName),
}

impl fmt::Display for KeyParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyParameter::KeySize(bits) => write!(f, "{bits}"),
            KeyParameter::Curve(curve) => write!(f, "{curve}"),
        }
    }
}

impl From<KeyCurveName> for KeyParameter {
    fn from(curve: KeyCurveName) -> Self {
        KeyParameter::Curve(curve)
    }
}

const EC_PARAMETERS: &[KeyParameter] = &[
    KeyParameter::Curve(KeyCurveName::P256),
    KeyParameter::Curve(KeyCurveName::P256K),
    KeyParameter::Curve(KeyCurveName::P384),
    KeyParameter::Curve(KeyCurveName::P521),
];

const RSA_PARAMETERS: &[KeyParameter] = &[
    KeyParameter::KeySize(2048),
    KeyParameter::KeySize(3072),
    KeyParameter::KeySize(4096),
];

const OCT_PARAMETERS: &[KeyParameter] = &[
    KeyParameter::KeySize(128),
    KeyParameter::KeySize(192),
    KeyParameter::KeySize(256),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyFamily {
    Ec,
    Rsa,
    Oct,
}

impl KeyFamily {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            KeyFamily::Ec => "EC",
            KeyFamily::Rsa => "RSA",
            KeyFamily::Oct => "AES",
        }
    }

    /// Sorted, non-empty parameter table of the family.
    pub fn valid_parameters(&self) -> &'static [KeyParameter] {
        match self {
            KeyFamily::Ec => EC_PARAMETERS,
            KeyFamily::Rsa => RSA_PARAMETERS,
            KeyFamily::Oct => OCT_PARAMETERS,
        }
    }

    pub fn parameter_name(&self) -> &'static str {
        match self {
            KeyFamily::Ec => "curve",
            KeyFamily::Rsa | KeyFamily::Oct => "key size",
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_name())
    }
}

/// Key kinds with the names the target service uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "EC-HSM")]
    EcHsm,
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "RSA-HSM")]
    RsaHsm,
    #[serde(rename = "oct")]
    Oct,
    #[serde(rename = "oct-HSM")]
    OctHsm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTypeDescriptor {
    pub key_type: KeyType,
    pub name: &'static str,
    pub family: KeyFamily,
    pub hsm: bool,
}

static DESCRIPTORS: [KeyTypeDescriptor; 6] = [
    KeyTypeDescriptor { key_type: KeyType::Ec, name: "EC", family: KeyFamily::Ec, hsm: false },
    KeyTypeDescriptor { key_type: KeyType::EcHsm, name: "EC-HSM", family: KeyFamily::Ec, hsm: true },
    KeyTypeDescriptor { key_type: KeyType::Rsa, name: "RSA", family: KeyFamily::Rsa, hsm: false },
    KeyTypeDescriptor { key_type: KeyType::RsaHsm, name: "RSA-HSM", family: KeyFamily::Rsa, hsm: true },
    KeyTypeDescriptor { key_type: KeyType::Oct, name: "oct", family: KeyFamily::Oct, hsm: false },
    KeyTypeDescriptor { key_type: KeyType::OctHsm, name: "oct-HSM", family: KeyFamily::Oct, hsm: true },
];

impl KeyType {
    pub const ALL: [KeyType; 6] = [
        Self::Ec,
        Self::EcHsm,
        Self::Rsa,
        Self::RsaHsm,
        Self::Oct,
        Self::OctHsm,
    ];

    pub fn descriptor(&self) -> &'static KeyTypeDescriptor {
        &DESCRIPTORS[*self as usize]
    }

    /// The key type of a family with the given HSM flag.
    pub fn from_family(family: KeyFamily, hsm: bool) -> KeyType {
        match (family, hsm) {
            (KeyFamily::Ec, false) => KeyType::Ec,
            (KeyFamily::Ec, true) => KeyType::EcHsm,
            (KeyFamily::Rsa, false) => KeyType::Rsa,
            (KeyFamily::Rsa, true) => KeyType::RsaHsm,
            (KeyFamily::Oct, false) => KeyType::Oct,
            (KeyFamily::Oct, true) => KeyType::OctHsm,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.descriptor().name
    }

    pub fn family(&self) -> KeyFamily {
        self.descriptor().family
    }

    pub fn is_ec(&self) -> bool {
        self.family() == KeyFamily::Ec
    }

    pub fn is_rsa(&self) -> bool {
        self.family() == KeyFamily::Rsa
    }

    pub fn is_oct(&self) -> bool {
        self.family() == KeyFamily::Oct
    }

    pub fn is_hsm(&self) -> bool {
        self.descriptor().hsm
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.family().algorithm_name()
    }

    pub fn valid_parameters(&self) -> &'static [KeyParameter] {
        self.family().valid_parameters()
    }

    /// The smallest legal parameter: `P-256`, `2048` or `128`.
    pub fn default_parameter(&self) -> KeyParameter {
        // 参数表在编译期即非空
        self.valid_parameters()[0]
    }

    /// Accepts an absent value or a member of the parameter table.
    pub fn validate(&self, value: Option<KeyParameter>) -> Result<()> {
        match value {
            None => Ok(()),
            Some(v) if self.valid_parameters().contains(&v) => Ok(()),
            Some(v) => Err(Error::invalid_parameter(
                self.family().parameter_name(),
                v,
                self.valid_parameters(),
            )),
        }
    }

    pub fn validate_or_default(&self, value: Option<KeyParameter>) -> Result<KeyParameter> {
        self.validate(value)?;
        Ok(value.unwrap_or_else(|| self.default_parameter()))
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DESCRIPTORS
            .iter()
            .find(|d| d.name == s)
            .map(|d| d.key_type)
            .ok_or_else(|| {
                Error::invalid_parameter("key type", s, DESCRIPTORS.iter().map(|d| d.name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_is_aligned() {
        for key_type in KeyType::ALL {
            assert_eq!(key_type.descriptor().key_type, key_type);
        }
    }

    #[test]
    fn test_exactly_one_family_flag() {
        for key_type in KeyType::ALL {
            let flags = [key_type.is_ec(), key_type.is_rsa(), key_type.is_oct()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{key_type}");
        }
    }

    #[test]
    fn test_valid_parameters_sorted_and_non_empty() {
        for key_type in KeyType::ALL {
            let params = key_type.valid_parameters();
            assert!(!params.is_empty());
            assert!(params.windows(2).all(|w| w[0] < w[1]), "{key_type} not sorted");
            // 稳定：多次调用返回同一张表
            assert_eq!(params, key_type.valid_parameters());
        }
    }

    #[test]
    fn test_hsm_siblings_share_parameters() {
        for family in [KeyFamily::Ec, KeyFamily::Rsa, KeyFamily::Oct] {
            let soft = KeyType::from_family(family, false);
            let hsm = KeyType::from_family(family, true);
            assert!(!soft.is_hsm());
            assert!(hsm.is_hsm());
            assert_eq!(soft.valid_parameters(), hsm.valid_parameters());
        }
    }

    #[test]
    fn test_default_is_minimum_element() {
        for key_type in KeyType::ALL {
            let default = key_type.validate_or_default(None).unwrap();
            let min = key_type.valid_parameters().iter().min().copied().unwrap();
            assert_eq!(default, min);
            assert_eq!(default, key_type.validate_or_default(None).unwrap());
        }
        assert_eq!(KeyType::Ec.default_parameter(), KeyParameter::Curve(KeyCurveName::P256));
        assert_eq!(KeyType::RsaHsm.default_parameter(), KeyParameter::KeySize(2048));
        assert_eq!(KeyType::Oct.default_parameter(), KeyParameter::KeySize(128));
    }

    #[test]
    fn test_rsa_size_5000_is_rejected() {
        let err = KeyType::Rsa
            .validate(Some(KeyParameter::KeySize(5000)))
            .unwrap_err();
        match err {
            Error::InvalidParameter { value, valid, .. } => {
                assert_eq!(value, "5000");
                assert_eq!(valid, vec!["2048", "3072", "4096"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_curve_is_invalid_for_rsa() {
        let result = KeyType::Rsa.validate(Some(KeyParameter::Curve(KeyCurveName::P384)));
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(KeyType::EcHsm.algorithm_name(), "EC");
        assert_eq!(KeyType::Rsa.algorithm_name(), "RSA");
        assert_eq!(KeyType::OctHsm.algorithm_name(), "AES");
    }

    #[test]
    fn test_wire_names_round_trip() {
        for key_type in KeyType::ALL {
            assert_eq!(key_type.as_str().parse::<KeyType>().unwrap(), key_type);
            let json = serde_json::to_string(&key_type).unwrap();
            assert_eq!(json, format!("\"{}\"", key_type.as_str()));
        }
        assert!("ec".parse::<KeyType>().is_err());
    }

    #[test]
    fn test_key_parameter_serde_is_untagged() {
        let curve: KeyParameter = serde_json::from_str("\"P-256K\"").unwrap();
        assert_eq!(curve, KeyParameter::Curve(KeyCurveName::P256K));
        let size: KeyParameter = serde_json::from_str("3072").unwrap();
        assert_eq!(size, KeyParameter::KeySize(3072));
    }
}

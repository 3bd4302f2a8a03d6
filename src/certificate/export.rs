//! 证书内容编码：PEM 与 PKCS#12
//!
//! The exported value is what the managed secret of a certificate holds: a
//! PEM document (private key block first) or base64 of a password-less
//! PKCS#12 keystore.
//!
//! PKCS#12 keystores use the legacy PKCS#12 PBE schemes: certificate bags are
//! encrypted with `pbeWithSHAAnd40BitRC2-CBC`, the key bag is shrouded with
//! `pbeWithSHAAnd3-KeyTripleDES-CBC` and the MAC is HMAC-SHA1. OpenSSL 3 only
//! reads these with `-legacy` (RC2 lives in its legacy provider). Consumers
//! that need PBES2 should export PEM instead.

use crate::certificate::policy::CertificateContentType;
use crate::common::errors::{Error, Result};
use crate::crypto::KeyMaterial;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p12::{PFX, PKCS12Attribute, SafeBagKind};
use x509_cert::der::pem::{self, LineEnding};

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Decoded certificate content.
#[derive(Debug, Clone)]
pub struct CertificateContent {
    /// Leaf certificate first, followed by any chain certificates.
    pub certificates: Vec<Vec<u8>>,
    pub key: Option<KeyMaterial>,
    /// PKCS#12 friendly names; empty for PEM.
    pub aliases: Vec<String>,
}

impl CertificateContent {
    pub fn leaf(&self) -> Result<&[u8]> {
        self.certificates
            .first()
            .map(Vec::as_slice)
            .ok_or_else(|| Error::invalid_parameter("certificate content", "<no certificate>", ["one or more certificates"]))
    }
}

/// Encodes a certificate and its private key as the secret value for `content_type`.
pub fn export_secret_value(
    content_type: CertificateContentType,
    certificate_der: &[u8],
    key: &KeyMaterial,
    alias: &str,
) -> Result<String> {
    let key_der = key
        .private_pkcs8_der()
        .ok_or_else(|| Error::unsupported("certificate export", "oct key"))?;
    match content_type {
        CertificateContentType::Pem => encode_pem(certificate_der, key_der),
        CertificateContentType::Pkcs12 => encode_pkcs12(certificate_der, key_der, alias),
    }
}

fn encode_pem(certificate_der: &[u8], key_der: &[u8]) -> Result<String> {
    let key_block = pem::encode_string(PRIVATE_KEY_LABEL, LineEnding::LF, key_der)
        .map_err(|e| Error::crypto(format!("PEM编码私钥失败: {}", e)))?;
    let certificate_block = pem::encode_string(CERTIFICATE_LABEL, LineEnding::LF, certificate_der)
        .map_err(|e| Error::crypto(format!("PEM编码证书失败: {}", e)))?;
    Ok(format!("{key_block}{certificate_block}"))
}

/// 旧式 PBE 加密，见模块文档
fn encode_pkcs12(certificate_der: &[u8], key_der: &[u8], alias: &str) -> Result<String> {
    let pfx = PFX::new(certificate_der, key_der, None, "", alias)
        .ok_or_else(|| Error::crypto("生成PKCS#12密钥库失败"))?;
    Ok(STANDARD.encode(pfx.to_der()))
}

/// Decodes exported or imported certificate content.
///
/// PKCS#12 values are base64 (standard alphabet); `password` defaults to empty.
pub fn decode_certificate_content(
    content_type: CertificateContentType,
    value: &str,
    password: Option<&str>,
) -> Result<CertificateContent> {
    match content_type {
        CertificateContentType::Pem => decode_pem(value),
        CertificateContentType::Pkcs12 => {
            let der = STANDARD.decode(value.trim())?;
            decode_pkcs12(&der, password.unwrap_or(""))
        }
    }
}

/// Splits a PEM document into `(label, der)` pairs in order of appearance.
pub fn pem_blocks(document: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            current = Some(format!("{trimmed}\n"));
        } else if let Some(block) = current.as_mut() {
            block.push_str(trimmed);
            block.push('\n');
            if trimmed.starts_with("-----END ") {
                let (label, der) = pem::decode_vec(block.as_bytes())
                    .map_err(|e| Error::invalid_parameter("PEM block", e, ["RFC 7468 encoding"]))?;
                blocks.push((label.to_string(), der));
                current = None;
            }
        }
    }
    if current.is_some() {
        return Err(Error::invalid_parameter("PEM document", "unterminated block", ["-----END ...-----"]));
    }
    Ok(blocks)
}

fn decode_pem(document: &str) -> Result<CertificateContent> {
    let mut certificates = Vec::new();
    let mut key = None;
    for (label, der) in pem_blocks(document)? {
        match label.as_str() {
            CERTIFICATE_LABEL => certificates.push(der),
            PRIVATE_KEY_LABEL if key.is_none() => key = Some(KeyMaterial::from_pkcs8_der(&der)?),
            PRIVATE_KEY_LABEL => {
                return Err(Error::invalid_parameter("PEM document", "multiple private keys", ["one PRIVATE KEY block"]));
            }
            other => tracing::debug!(label = other, "skipping PEM block"),
        }
    }
    Ok(CertificateContent {
        certificates,
        key,
        aliases: Vec::new(),
    })
}

fn decode_pkcs12(der: &[u8], password: &str) -> Result<CertificateContent> {
    let pfx = PFX::parse(der)
        .map_err(|e| Error::invalid_parameter("PKCS#12 keystore", format!("{:?}", e), ["DER PFX"]))?;
    if !pfx.verify_mac(password) {
        return Err(Error::invalid_parameter("PKCS#12 password", "<redacted>", ["keystore password"]));
    }

    let bags = pfx
        .bags(password)
        .map_err(|e| Error::crypto(format!("解密PKCS#12内容失败: {:?}", e)))?;
    let mut aliases: Vec<String> = Vec::new();
    for bag in &bags {
        for attribute in &bag.attributes {
            if let PKCS12Attribute::FriendlyName(name) = attribute {
                if !aliases.contains(name) {
                    aliases.push(name.clone());
                }
            }
        }
    }
    let has_key_bag = bags
        .iter()
        .any(|bag| matches!(bag.bag, SafeBagKind::Pkcs8ShroudedKeyBag(_)));

    let certificates = pfx
        .cert_x509_bags(password)
        .map_err(|e| Error::crypto(format!("读取PKCS#12证书失败: {:?}", e)))?;
    let key = if has_key_bag {
        let keys = pfx
            .key_bags(password)
            .map_err(|e| Error::crypto(format!("读取PKCS#12私钥失败: {:?}", e)))?;
        match keys.first() {
            Some(der) => Some(KeyMaterial::from_pkcs8_der(der)?),
            None => None,
        }
    } else {
        None
    };

    Ok(CertificateContent {
        certificates,
        key,
        aliases,
    })
}

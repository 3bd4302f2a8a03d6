use crate::common::errors::{Error, Result};
use crate::key_type::{KeyFamily, KeyParameter, KeyType};
use crate::rotation::{self, LifetimeAction, LifetimeActionType, LifetimeTrigger};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x509_cert::name::Name;

pub const MAX_VALIDITY_MONTHS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CertificateContentType {
    #[serde(rename = "application/x-pem-file")]
    Pem,
    #[serde(rename = "application/x-pkcs12")]
    Pkcs12,
}

impl CertificateContentType {
    pub const ALL: [CertificateContentType; 2] = [Self::Pem, Self::Pkcs12];

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pem => "application/x-pem-file",
            Self::Pkcs12 => "application/x-pkcs12",
        }
    }
}

impl fmt::Display for CertificateContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl FromStr for CertificateContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ct| ct.mime_type() == s)
            .ok_or_else(|| Error::invalid_parameter("content type", s, Self::ALL))
    }
}

/// 签发者：`Self` 表示自签名，`Unknown` 表示由外部 CA 签发后再合并
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuerKind {
    #[serde(rename = "Self")]
    SelfSigned,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateKeySpec {
    pub key_type: KeyType,
    #[serde(default)]
    pub parameter: Option<KeyParameter>,
    /// Renewals keep the previous version's key pair.
    #[serde(default)]
    pub reuse_key: bool,
}

impl Default for CertificateKeySpec {
    fn default() -> Self {
        Self {
            key_type: KeyType::Rsa,
            parameter: None,
            reuse_key: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAlternativeNames {
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl SubjectAlternativeNames {
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty() && self.emails.is_empty()
    }
}

/// 证书策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePolicy {
    /// RFC 4514 distinguished name, e.g. `CN=example.com`.
    pub subject: String,
    pub content_type: CertificateContentType,
    pub validity_months: u32,
    #[serde(default)]
    pub key_spec: CertificateKeySpec,
    pub issuer: IssuerKind,
    #[serde(default)]
    pub subject_alternative_names: SubjectAlternativeNames,
    #[serde(default)]
    pub lifetime_actions: Vec<LifetimeAction>,
}

impl CertificatePolicy {
    /// Self-signed RSA 2048 PKCS#12 certificate valid for 12 months, auto-renewed at 80%.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content_type: CertificateContentType::Pkcs12,
            validity_months: 12,
            key_spec: CertificateKeySpec::default(),
            issuer: IssuerKind::SelfSigned,
            subject_alternative_names: SubjectAlternativeNames::default(),
            lifetime_actions: vec![LifetimeAction::new(
                LifetimeTrigger::LifetimePercentage(80),
                LifetimeActionType::Rotate,
            )],
        }
    }

    pub fn with_content_type(mut self, content_type: CertificateContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_validity_months(mut self, months: u32) -> Self {
        self.validity_months = months;
        self
    }

    pub fn with_key(mut self, key_type: KeyType, parameter: Option<KeyParameter>) -> Self {
        self.key_spec.key_type = key_type;
        self.key_spec.parameter = parameter;
        self
    }

    pub fn with_issuer(mut self, issuer: IssuerKind) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_dns_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_alternative_names.dns_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn parsed_subject(&self) -> Result<Name> {
        Name::from_str(&self.subject)
            .map_err(|e| Error::invalid_parameter("subject", &self.subject, [format!("RFC 4514 name ({e})")]))
    }

    /// Key parameter to use, defaulted from the key type's table.
    pub fn key_parameter(&self) -> Result<KeyParameter> {
        self.key_spec.key_type.validate_or_default(self.key_spec.parameter)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(Error::invalid_parameter("subject", "<empty>", ["RFC 4514 name"]));
        }
        self.parsed_subject()?;

        if !(1..=MAX_VALIDITY_MONTHS).contains(&self.validity_months) {
            return Err(Error::invalid_parameter(
                "validity months",
                self.validity_months,
                [format!("1..={MAX_VALIDITY_MONTHS}")],
            ));
        }

        let key_type = self.key_spec.key_type;
        if key_type.family() == KeyFamily::Oct {
            return Err(Error::invalid_parameter(
                "certificate key type",
                key_type,
                [KeyType::Rsa, KeyType::RsaHsm, KeyType::Ec, KeyType::EcHsm],
            ));
        }
        key_type.validate(self.key_spec.parameter)?;

        for name in self
            .subject_alternative_names
            .dns_names
            .iter()
            .chain(&self.subject_alternative_names.emails)
        {
            if name.is_empty() || !name.is_ascii() {
                return Err(Error::invalid_parameter(
                    "subject alternative name",
                    name,
                    ["non-empty ASCII name"],
                ));
            }
        }

        rotation::validate_certificate_actions(&self.lifetime_actions, self.validity_months)
    }
}

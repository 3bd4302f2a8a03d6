//! 证书签发与编码
//!
//! Self-signed X.509 v3 issuance from a [`CertificatePolicy`], CSR generation for
//! externally issued certificates, and PEM / PKCS#12 encoding of the
//! certificate together with its private key.

pub mod export;
pub mod issuer;
pub mod policy;

pub use self::export::{CertificateContent, decode_certificate_content, export_secret_value};
pub use self::issuer::{CertificateIssuer, IssuedCertificate, ParsedCertificate};
pub use self::policy::{
    CertificateContentType, CertificateKeySpec, CertificatePolicy, IssuerKind,
    SubjectAlternativeNames,
};

//! X.509 证书签发
//!
//! Certificates are assembled field by field from the policy and signed with
//! the key material produced by [`CryptoEngine`], so RSA and all four curves
//! share one code path.

use crate::certificate::policy::CertificatePolicy;
use crate::common::errors::{Error, Result};
use crate::crypto::ec::EcSystem;
use crate::crypto::{CryptoEngine, KeyMaterial, PublicKeyMaterial, SignatureAlgorithm};
use chrono::{DateTime, Months, Utc};
use rand_core::CryptoRngCore;
use std::time::Duration as StdDuration;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::der::asn1::{BitString, GeneralizedTime, Ia5String, OctetString, UtcTime};
use x509_cert::der::oid::AssociatedOid;
use x509_cert::der::{Any, Decode, Encode, Tag};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::ext::Extension;
use x509_cert::request::{CertReq, CertReqInfo};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

const SHA256_WITH_RSA_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const ECDSA_WITH_SHA256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ECDSA_WITH_SHA512_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// RFC 5280: UTCTime up to 2049, GeneralizedTime afterwards.
const UTC_TIME_LIMIT_YEAR: i32 = 2050;
const SERIAL_LEN: usize = 16;

/// 新签发的证书及其私钥
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_der: Vec<u8>,
    pub key: KeyMaterial,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub thumbprint: Vec<u8>,
}

/// Fields read back from a DER certificate.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial_number: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: PublicKeyMaterial,
    pub dns_names: Vec<String>,
    pub thumbprint: Vec<u8>,
}

impl ParsedCertificate {
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Months between not-before and not-after, rounded down, at least one.
    pub fn validity_months(&self) -> u32 {
        let mut months = 1;
        while let Some(end) = self.not_before.checked_add_months(Months::new(months + 1)) {
            if end > self.not_after {
                break;
            }
            months += 1;
        }
        months
    }
}

pub struct CertificateIssuer;

impl CertificateIssuer {
    /// Generates a key pair per the policy's key spec and issues a self-signed
    /// certificate valid from `now` for the policy's number of months.
    pub fn issue<R: CryptoRngCore>(
        policy: &CertificatePolicy,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<IssuedCertificate> {
        policy.validate()?;
        let parameter = policy.key_parameter()?;
        let key = CryptoEngine::generate(policy.key_spec.key_type, Some(parameter), rng)?;
        Self::issue_with_key(policy, key, now, rng)
    }

    /// Issues a self-signed certificate for an existing key pair.
    pub fn issue_with_key<R: CryptoRngCore>(
        policy: &CertificatePolicy,
        key: KeyMaterial,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<IssuedCertificate> {
        let subject = policy.parsed_subject()?;
        let public = key
            .public()
            .ok_or_else(|| Error::unsupported("certificate issuance", "oct key"))?;

        let not_before = truncate_to_seconds(now)?;
        let not_after = not_before
            .checked_add_months(Months::new(policy.validity_months))
            .ok_or_else(|| {
                Error::invalid_parameter("validity months", policy.validity_months, ["1..=120"])
            })?;

        let signature_algorithm = signature_algorithm_identifier(&key)?;
        let tbs_certificate = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&random_serial(rng))?,
            signature: signature_algorithm.clone(),
            issuer: subject.clone(),
            validity: Validity {
                not_before: x509_time(not_before)?,
                not_after: x509_time(not_after)?,
            },
            subject,
            subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(public.spki_der())?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(certificate_extensions(policy)?),
        };

        let signature = sign_der_structure(&key, &tbs_certificate.to_der()?, rng)?;
        let certificate = Certificate {
            tbs_certificate,
            signature_algorithm,
            signature: BitString::from_bytes(&signature)?,
        };
        let certificate_der = certificate.to_der()?;
        let thumbprint = CryptoEngine::thumbprint(&certificate_der);

        tracing::debug!(
            subject = %policy.subject,
            key_type = %policy.key_spec.key_type,
            not_after = %not_after,
            "issued self-signed certificate"
        );
        Ok(IssuedCertificate {
            certificate_der,
            key,
            not_before,
            not_after,
            thumbprint,
        })
    }

    /// PKCS#10 request for the policy subject, signed with `key`.
    pub fn create_csr<R: CryptoRngCore>(
        policy: &CertificatePolicy,
        key: &KeyMaterial,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let public = key
            .public()
            .ok_or_else(|| Error::unsupported("certificate request", "oct key"))?;
        let info = CertReqInfo {
            version: x509_cert::request::Version::V1,
            subject: policy.parsed_subject()?,
            public_key: SubjectPublicKeyInfoOwned::from_der(public.spki_der())?,
            attributes: Default::default(),
        };
        let signature = sign_der_structure(key, &info.to_der()?, rng)?;
        let request = CertReq {
            info,
            algorithm: signature_algorithm_identifier(key)?,
            signature: BitString::from_bytes(&signature)?,
        };
        Ok(request.to_der()?)
    }

    pub fn parse_certificate(der: &[u8]) -> Result<ParsedCertificate> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| Error::invalid_parameter("certificate", e, ["DER X.509 certificate"]))?;
        let tbs = &certificate.tbs_certificate;

        let spki_der = tbs.subject_public_key_info.to_der()?;
        let public_key = PublicKeyMaterial::from_spki_der(&spki_der)?;

        let mut dns_names = Vec::new();
        for extension in tbs.extensions.iter().flatten() {
            if extension.extn_id == SubjectAltName::OID {
                let names = SubjectAltName::from_der(extension.extn_value.as_bytes())?;
                dns_names.extend(names.0.into_iter().filter_map(|name| match name {
                    GeneralName::DnsName(dns) => Some(dns.to_string()),
                    _ => None,
                }));
            }
        }

        Ok(ParsedCertificate {
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial_number: tbs.serial_number.as_bytes().to_vec(),
            not_before: from_x509_time(tbs.validity.not_before)?,
            not_after: from_x509_time(tbs.validity.not_after)?,
            public_key,
            dns_names,
            thumbprint: CryptoEngine::thumbprint(der),
        })
    }

    /// Signs the SHA-256 digest of the certificate thumbprint with `key` and
    /// verifies the signature with the certificate's public key.
    pub fn verify_key_pair<R: CryptoRngCore>(
        certificate_der: &[u8],
        key: &KeyMaterial,
        rng: &mut R,
    ) -> Result<bool> {
        let parsed = Self::parse_certificate(certificate_der)?;
        let Some(own_public) = key.public() else {
            return Ok(false);
        };
        if own_public.family() != parsed.public_key.family()
            || own_public.parameter() != parsed.public_key.parameter()
        {
            return Ok(false);
        }

        let algorithm = match key {
            KeyMaterial::Ec(pair) => SignatureAlgorithm::for_curve(pair.curve()),
            _ => SignatureAlgorithm::RS256,
        };
        let digest = algorithm.digest(&parsed.thumbprint);
        let signature = CryptoEngine::sign(key, algorithm, &digest, rng)?;
        CryptoEngine::verify(&parsed.public_key, algorithm, &digest, &signature)
    }

    /// `true` when the certificate carries exactly the public half of `key`.
    pub fn matches_key(certificate_der: &[u8], key: &KeyMaterial) -> Result<bool> {
        let parsed = Self::parse_certificate(certificate_der)?;
        Ok(key
            .public()
            .is_some_and(|public| public.spki_der() == parsed.public_key.spki_der()))
    }
}

fn signature_algorithm_identifier(key: &KeyMaterial) -> Result<AlgorithmIdentifierOwned> {
    match key {
        KeyMaterial::Rsa(_) => Ok(AlgorithmIdentifierOwned {
            oid: SHA256_WITH_RSA_OID,
            parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
        }),
        KeyMaterial::Ec(pair) => {
            let oid = match SignatureAlgorithm::for_curve(pair.curve()) {
                SignatureAlgorithm::ES384 => ECDSA_WITH_SHA384_OID,
                SignatureAlgorithm::ES512 => ECDSA_WITH_SHA512_OID,
                _ => ECDSA_WITH_SHA256_OID,
            };
            Ok(AlgorithmIdentifierOwned {
                oid,
                parameters: None,
            })
        }
        KeyMaterial::Oct(_) => Err(Error::unsupported("certificate signing", "oct key")),
    }
}

/// Signature over a DER encoded TBS structure, in the form X.509 embeds it.
fn sign_der_structure<R: CryptoRngCore>(
    key: &KeyMaterial,
    tbs_der: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    match key {
        KeyMaterial::Rsa(_) => {
            let algorithm = SignatureAlgorithm::RS256;
            CryptoEngine::sign(key, algorithm, &algorithm.digest(tbs_der), rng)
        }
        KeyMaterial::Ec(pair) => {
            let algorithm = SignatureAlgorithm::for_curve(pair.curve());
            EcSystem::sign_der(pair, &algorithm.digest(tbs_der))
        }
        KeyMaterial::Oct(_) => Err(Error::unsupported("certificate signing", "oct key")),
    }
}

fn certificate_extensions(policy: &CertificatePolicy) -> Result<Vec<Extension>> {
    let basic_constraints = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    let mut extensions = vec![Extension {
        extn_id: BasicConstraints::OID,
        critical: true,
        extn_value: OctetString::new(basic_constraints.to_der()?)?,
    }];

    let sans = &policy.subject_alternative_names;
    if !sans.is_empty() {
        let mut names = Vec::with_capacity(sans.dns_names.len() + sans.emails.len());
        for dns in &sans.dns_names {
            names.push(GeneralName::DnsName(ia5(dns)?));
        }
        for email in &sans.emails {
            names.push(GeneralName::Rfc822Name(ia5(email)?));
        }
        extensions.push(Extension {
            extn_id: SubjectAltName::OID,
            critical: false,
            extn_value: OctetString::new(SubjectAltName(names).to_der()?)?,
        });
    }
    Ok(extensions)
}

fn ia5(value: &str) -> Result<Ia5String> {
    Ia5String::new(value)
        .map_err(|e| Error::invalid_parameter("subject alternative name", value, [format!("IA5 string ({e})")]))
}

/// Positive 16-byte serial with a non-zero leading byte.
fn random_serial<R: CryptoRngCore>(rng: &mut R) -> [u8; SERIAL_LEN] {
    let mut serial = [0u8; SERIAL_LEN];
    rng.fill_bytes(&mut serial);
    serial[0] = (serial[0] & 0x7f) | 0x01;
    serial
}

fn truncate_to_seconds(instant: DateTime<Utc>) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(instant.timestamp(), 0)
        .ok_or_else(|| Error::crypto(format!("时间超出范围: {}", instant)))
}

fn x509_time(instant: DateTime<Utc>) -> Result<Time> {
    let seconds = u64::try_from(instant.timestamp())
        .map_err(|_| Error::crypto(format!("证书时间早于1970年: {}", instant)))?;
    let date_time = x509_cert::der::DateTime::from_unix_duration(StdDuration::from_secs(seconds))?;
    if i32::from(date_time.year()) < UTC_TIME_LIMIT_YEAR {
        Ok(Time::UtcTime(UtcTime::from_date_time(date_time)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

fn from_x509_time(time: Time) -> Result<DateTime<Utc>> {
    let seconds = time.to_unix_duration().as_secs();
    i64::try_from(seconds)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| Error::crypto(format!("证书时间超出范围: {:?}", time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_type::{KeyCurveName, KeyParameter, KeyType};
    use chrono::TimeZone;
    use rand_core::OsRng;

    fn setup_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 10, 30, 15).unwrap()
    }

    #[test]
    fn test_issue_rsa_certificate() {
        let policy = CertificatePolicy::new("CN=rsa.example.com").with_dns_names(["rsa.example.com"]);
        let issued = CertificateIssuer::issue(&policy, setup_now(), &mut OsRng).unwrap();

        let parsed = CertificateIssuer::parse_certificate(&issued.certificate_der).unwrap();
        assert_eq!(parsed.subject, "CN=rsa.example.com");
        assert!(parsed.is_self_issued());
        assert_eq!(parsed.not_before, setup_now());
        // 1月31日加12个月落在次年1月31日
        assert_eq!(parsed.not_after, Utc.with_ymd_and_hms(2025, 1, 31, 10, 30, 15).unwrap());
        assert_eq!(parsed.dns_names, vec!["rsa.example.com".to_string()]);
        assert_eq!(parsed.serial_number.len(), SERIAL_LEN);
        assert_eq!(parsed.thumbprint, issued.thumbprint);
        assert_eq!(parsed.public_key.parameter(), KeyParameter::KeySize(2048));
        assert!(CertificateIssuer::verify_key_pair(&issued.certificate_der, &issued.key, &mut OsRng).unwrap());
    }

    #[test]
    fn test_issue_ec_certificates_on_every_curve() {
        for curve in KeyCurveName::ALL {
            let policy = CertificatePolicy::new("CN=ec")
                .with_key(KeyType::Ec, Some(KeyParameter::Curve(curve)));
            let issued = CertificateIssuer::issue(&policy, setup_now(), &mut OsRng).unwrap();
            assert!(
                CertificateIssuer::verify_key_pair(&issued.certificate_der, &issued.key, &mut OsRng).unwrap(),
                "{curve}"
            );
        }
    }

    #[test]
    fn test_month_arithmetic_clamps_to_month_end() {
        let policy = CertificatePolicy::new("CN=clamp")
            .with_key(KeyType::Ec, None)
            .with_validity_months(1);
        let issued = CertificateIssuer::issue(&policy, setup_now(), &mut OsRng).unwrap();
        assert_eq!(issued.not_after, Utc.with_ymd_and_hms(2024, 2, 29, 10, 30, 15).unwrap());
    }

    #[test]
    fn test_generalized_time_after_2049() {
        let now = Utc.with_ymd_and_hms(2049, 6, 1, 0, 0, 0).unwrap();
        let policy = CertificatePolicy::new("CN=far").with_key(KeyType::Ec, None);
        let issued = CertificateIssuer::issue(&policy, now, &mut OsRng).unwrap();
        let parsed = CertificateIssuer::parse_certificate(&issued.certificate_der).unwrap();
        assert_eq!(parsed.not_after, Utc.with_ymd_and_hms(2050, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(parsed.validity_months(), 12);
    }

    #[test]
    fn test_mismatched_key_fails_pair_check() {
        let policy = CertificatePolicy::new("CN=pair").with_key(KeyType::Ec, None);
        let first = CertificateIssuer::issue(&policy, setup_now(), &mut OsRng).unwrap();
        let second = CertificateIssuer::issue(&policy, setup_now(), &mut OsRng).unwrap();

        assert!(!CertificateIssuer::verify_key_pair(&first.certificate_der, &second.key, &mut OsRng).unwrap());
        assert!(!CertificateIssuer::matches_key(&first.certificate_der, &second.key).unwrap());
        assert!(CertificateIssuer::matches_key(&first.certificate_der, &first.key).unwrap());
    }

    #[test]
    fn test_csr_is_der_encoded_request() {
        let policy = CertificatePolicy::new("CN=pending").with_key(KeyType::Ec, None);
        let key = CryptoEngine::generate(KeyType::Ec, None, &mut OsRng).unwrap();
        let csr = CertificateIssuer::create_csr(&policy, &key, &mut OsRng).unwrap();

        let request = CertReq::from_der(&csr).unwrap();
        assert_eq!(request.info.subject.to_string(), "CN=pending");
        assert_eq!(request.algorithm.oid, ECDSA_WITH_SHA256_OID);
    }

    #[test]
    fn test_oct_key_cannot_issue() {
        let policy = CertificatePolicy::new("CN=oct");
        let key = CryptoEngine::generate(KeyType::Oct, None, &mut OsRng).unwrap();
        let result = CertificateIssuer::issue_with_key(&policy, key, setup_now(), &mut OsRng);
        assert!(matches!(result, Err(Error::UnsupportedOperation { .. })));
    }
}

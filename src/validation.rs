//! 请求校验：实体名称、启用的类型、密钥操作权限与有效期窗口。

use crate::certificate::CertificateContentType;
use crate::common::config::VaultConfig;
use crate::common::errors::{Error, Result};
use crate::crypto::KeyOperation;
use crate::key_type::{KeyFamily, KeyType};
use crate::store::EntityVersion;
use crate::vault::KeyVersion;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub const MAX_NAME_LEN: usize = 127;
const NAME_PATTERN: &str = "^[0-9a-zA-Z-]{1,127}$";

/// Entity names are 1 to 127 ASCII letters, digits or dashes.
pub fn ensure_entity_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_parameter("name", name, [NAME_PATTERN]))
    }
}

pub fn ensure_key_type_enabled(config: &VaultConfig, key_type: KeyType) -> Result<()> {
    if config.is_key_type_enabled(key_type) {
        Ok(())
    } else {
        Err(Error::unsupported(format!("key type {key_type}"), "this vault"))
    }
}

pub fn ensure_content_type_enabled(
    config: &VaultConfig,
    content_type: CertificateContentType,
) -> Result<()> {
    if config.is_content_type_enabled(content_type) {
        Ok(())
    } else {
        Err(Error::unsupported(format!("content type {content_type}"), "this vault"))
    }
}

/// Checks requested operations against what the family supports, defaulting
/// to the full supported set when none are requested.
pub fn ensure_key_operations(
    family: KeyFamily,
    requested: Option<&BTreeSet<KeyOperation>>,
) -> Result<BTreeSet<KeyOperation>> {
    let supported = KeyOperation::supported_by(family);
    match requested {
        None => Ok(supported.iter().copied().collect()),
        Some(ops) => {
            if let Some(op) = ops.iter().find(|op| !supported.contains(op)) {
                return Err(Error::invalid_parameter("key operation", op, supported));
            }
            Ok(ops.clone())
        }
    }
}

/// The version must be enabled, inside its validity window and allow `operation`.
pub fn ensure_operation_permitted(
    name: &str,
    version: &EntityVersion<KeyVersion>,
    operation: KeyOperation,
    now: DateTime<Utc>,
) -> Result<()> {
    let target = format!("key '{}' version '{}'", name, version.id());
    let attributes = version.attributes();

    if !attributes.enabled {
        return Err(Error::conflict(target, "disabled", format!("cannot {operation} with a disabled key")));
    }
    if let Some(not_before) = attributes.not_before {
        if now < not_before {
            return Err(Error::conflict(
                target,
                "not yet valid",
                format!("key is not valid before {not_before}"),
            ));
        }
    }
    if let Some(expires) = attributes.expires {
        if now >= expires {
            return Err(Error::conflict(target, "expired", format!("key expired at {expires}")));
        }
    }
    if !version.payload().key_ops.contains(&operation) {
        return Err(Error::conflict(
            target,
            "enabled",
            format!("operation {operation} is not permitted for this key"),
        ));
    }
    Ok(())
}

pub fn ensure_validity_window(
    not_before: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
) -> Result<()> {
    match (not_before, expires) {
        (Some(nb), Some(exp)) if nb >= exp => Err(Error::invalid_parameter(
            "validity window",
            format!("{nb} .. {exp}"),
            ["not_before < expires"],
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::ManualClock;
    use crate::crypto::CryptoEngine;
    use crate::store::{VersionAttributes, VersionedEntityStore};
    use chrono::{Duration, TimeZone};
    use rand_core::OsRng;
    use std::sync::Arc;

    #[test]
    fn test_entity_names() {
        assert!(ensure_entity_name("my-key-01").is_ok());
        assert!(ensure_entity_name(&"a".repeat(127)).is_ok());

        for bad in ["", "has space", "under_score", "ünï", &"a".repeat(128)] {
            assert!(
                matches!(ensure_entity_name(bad), Err(Error::InvalidParameter { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_disabled_key_type() {
        let config = VaultConfig::from_json_str(r#"{ "enabled_key_types": ["RSA"] }"#).unwrap();
        assert!(ensure_key_type_enabled(&config, KeyType::Rsa).is_ok());
        assert!(matches!(
            ensure_key_type_enabled(&config, KeyType::RsaHsm),
            Err(Error::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_key_operations_per_family() {
        let defaults = ensure_key_operations(KeyFamily::Ec, None).unwrap();
        assert_eq!(defaults, BTreeSet::from([KeyOperation::Sign, KeyOperation::Verify]));

        let requested = BTreeSet::from([KeyOperation::Sign, KeyOperation::Encrypt]);
        assert!(matches!(
            ensure_key_operations(KeyFamily::Ec, Some(&requested)),
            Err(Error::InvalidParameter { .. })
        ));
        assert_eq!(
            ensure_key_operations(KeyFamily::Rsa, Some(&requested)).unwrap(),
            requested
        );
    }

    #[test]
    fn test_operation_permitted_window() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store: VersionedEntityStore<KeyVersion> =
            VersionedEntityStore::new("v", Arc::new(VaultConfig::default()), clock);
        let material = CryptoEngine::generate(KeyType::Oct, None, &mut OsRng).unwrap();
        let payload = KeyVersion::new(
            KeyType::Oct,
            material,
            BTreeSet::from([KeyOperation::Encrypt]),
        );
        let attributes = VersionAttributes::default()
            .with_not_before(start + Duration::days(1))
            .with_expires(start + Duration::days(10));
        let version = store.create("k", attributes, payload).unwrap();

        let check = |op, now| ensure_operation_permitted("k", &version, op, now);
        assert!(matches!(check(KeyOperation::Encrypt, start), Err(Error::Conflict { .. })));
        assert!(check(KeyOperation::Encrypt, start + Duration::days(2)).is_ok());
        assert!(matches!(
            check(KeyOperation::Decrypt, start + Duration::days(2)),
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            check(KeyOperation::Encrypt, start + Duration::days(10)),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        assert!(ensure_validity_window(Some(now), Some(now + Duration::days(1))).is_ok());
        assert!(ensure_validity_window(Some(now), Some(now)).is_err());
        assert!(ensure_validity_window(None, Some(now)).is_ok());
    }
}

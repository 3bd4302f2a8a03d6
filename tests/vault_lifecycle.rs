//!
//! 生命周期测试：软删除、恢复、清除与计划清除
//!

mod common;

use chrono::Duration;
use common::{setup_default_vault, setup_vault};
use vault_engine::prelude::*;

#[test]
fn test_delete_recover_restores_versions() {
    let (vault, clock) = setup_default_vault();
    vault.set_secret("db-password", SetSecretRequest::new("one")).unwrap();
    vault.set_secret("db-password", SetSecretRequest::new("two")).unwrap();

    let info = vault.delete_secret("db-password").unwrap();
    assert_eq!(info.recovery_id, "test-vault/deletedsecrets/db-password");
    assert_eq!(info.scheduled_purge_on, clock.now() + Duration::days(90));
    assert!(matches!(vault.get_secret("db-password", None), Err(Error::NotFound { .. })));
    assert_eq!(vault.list_deleted_secrets(), vec!["db-password".to_string()]);

    let (deleted, _) = vault.get_deleted_secret("db-password").unwrap();
    assert_eq!(deleted.payload().value(), "two");

    vault.recover_secret("db-password").unwrap();
    let versions = vault.list_secret_versions("db-password").unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].payload().value(), "one");
    assert_eq!(vault.get_secret("db-password", None).unwrap().payload().value(), "two");
}

#[test]
fn test_purge_then_get_is_not_found() {
    let (vault, _) = setup_default_vault();
    vault.create_key("doomed", CreateKeyRequest::new(KeyType::Ec)).unwrap();

    assert!(matches!(vault.purge_key("doomed"), Err(Error::Conflict { .. })));
    assert!(matches!(vault.recover_key("doomed"), Err(Error::Conflict { .. })));

    vault.delete_key("doomed").unwrap();
    vault.purge_key("doomed").unwrap();
    assert!(matches!(vault.get_key("doomed", None), Err(Error::NotFound { .. })));
    assert!(vault.list_deleted_keys().is_empty());
    assert!(matches!(vault.purge_key("doomed"), Err(Error::Conflict { .. })));
}

#[test]
fn test_deleted_name_blocks_create() {
    let (vault, _) = setup_default_vault();
    vault.set_secret("s", SetSecretRequest::new("v")).unwrap();
    vault.delete_secret("s").unwrap();

    assert!(matches!(
        vault.set_secret("s", SetSecretRequest::new("again")),
        Err(Error::Conflict { .. })
    ));
}

#[test]
fn test_overwrite_disabled() {
    let config = VaultConfig {
        allow_overwrite: false,
        ..VaultConfig::default()
    };
    let (vault, _) = setup_vault(config);
    vault.set_secret("s", SetSecretRequest::new("v")).unwrap();
    assert!(matches!(
        vault.set_secret("s", SetSecretRequest::new("v2")),
        Err(Error::AlreadyExists { .. })
    ));

    // 轮换不受覆盖策略限制
    vault.create_key("k", CreateKeyRequest::new(KeyType::Oct)).unwrap();
    vault.rotate_key("k").unwrap();
    assert_eq!(vault.list_key_versions("k").unwrap().len(), 2);
}

#[test]
fn test_versions_are_ordered() {
    let (vault, _) = setup_default_vault();
    let mut ids = Vec::new();
    for i in 0..8 {
        let version = vault.set_secret("seq", SetSecretRequest::new(format!("value-{i}"))).unwrap();
        ids.push(version.id().to_string());
    }

    let versions = vault.list_secret_versions("seq").unwrap();
    assert_eq!(versions.iter().map(|v| v.id().to_string()).collect::<Vec<_>>(), ids);
    assert_eq!(vault.get_secret("seq", None).unwrap().payload().value(), "value-7");
    assert_eq!(
        vault.get_secret("seq", Some(ids[3].as_str())).unwrap().payload().value(),
        "value-3"
    );
}

#[test]
fn test_scheduled_purge() {
    let config = VaultConfig {
        recoverable_days: 7,
        purge_protection: true,
        ..VaultConfig::default()
    };
    let (vault, clock) = setup_vault(config);
    vault.set_secret("old", SetSecretRequest::new("v")).unwrap();
    vault.create_key("old", CreateKeyRequest::new(KeyType::Oct)).unwrap();
    vault.delete_secret("old").unwrap();
    vault.delete_key("old").unwrap();
    assert!(matches!(vault.purge_secret("old"), Err(Error::Conflict { .. })));

    clock.advance(Duration::days(6));
    assert!(vault.purge_expired(clock.now()).is_empty());

    clock.advance(Duration::days(1));
    let report = vault.purge_expired(clock.now());
    assert_eq!(report.keys, vec!["old".to_string()]);
    assert_eq!(report.secrets, vec!["old".to_string()]);
    assert!(vault.list_deleted_secrets().is_empty());
}

#[test]
fn test_names_are_case_sensitive_and_scoped_per_kind() {
    let (vault, _) = setup_default_vault();
    vault.set_secret("Shared", SetSecretRequest::new("secret")).unwrap();
    vault.create_key("Shared", CreateKeyRequest::new(KeyType::Oct)).unwrap();

    assert!(matches!(vault.get_secret("shared", None), Err(Error::NotFound { .. })));
    vault.delete_secret("Shared").unwrap();
    assert!(vault.get_key("Shared", None).is_ok());
}

#[test]
fn test_invalid_names_rejected() {
    let (vault, _) = setup_default_vault();
    let long = "x".repeat(128);
    for name in ["", "with space", "dot.name", long.as_str()] {
        assert!(matches!(
            vault.set_secret(name, SetSecretRequest::new("v")),
            Err(Error::InvalidParameter { .. })
        ));
    }
}

#[test]
fn test_disabled_secret_version_still_listed() {
    let (vault, _) = setup_default_vault();
    let first = vault.set_secret("s", SetSecretRequest::new("v1")).unwrap();
    vault.set_secret("s", SetSecretRequest::new("v2")).unwrap();

    vault.set_secret_enabled("s", first.id(), false).unwrap();
    let versions = vault.list_secret_versions("s").unwrap();
    assert!(!versions[0].is_enabled());
    assert!(versions[1].is_enabled());
    assert!(first.is_enabled());
}

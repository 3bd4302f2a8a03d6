//!
//! 并发测试：同一名称上的并发写入与跨名称的并行操作
//!

mod common;

use common::setup_default_vault;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use vault_engine::prelude::*;

const WRITERS: usize = 16;

#[test]
fn test_concurrent_add_version_keeps_every_version() {
    let (vault, _) = setup_default_vault();
    let vault = Arc::new(vault);
    vault.set_secret("contended", SetSecretRequest::new("initial")).unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || {
                vault
                    .set_secret("contended", SetSecretRequest::new(format!("writer-{i}")))
                    .unwrap()
                    .id()
                    .to_string()
            })
        })
        .collect();
    let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let versions = vault.list_secret_versions("contended").unwrap();
    assert_eq!(versions.len(), WRITERS + 1);
    assert_eq!(ids.len(), WRITERS);
    assert!(versions[1..].iter().all(|v| ids.contains(v.id())));
}

#[test]
fn test_concurrent_store_add_version() {
    let (vault, _) = setup_default_vault();
    let vault = Arc::new(vault);
    vault.create_key("rotating", CreateKeyRequest::new(KeyType::Oct)).unwrap();

    thread::scope(|scope| {
        for _ in 0..WRITERS {
            scope.spawn(|| vault.rotate_key("rotating").unwrap());
        }
    });
    assert_eq!(vault.list_key_versions("rotating").unwrap().len(), WRITERS + 1);
}

#[test]
fn test_readers_see_consistent_snapshots_during_delete() {
    let (vault, _) = setup_default_vault();
    vault.set_secret("flapping", SetSecretRequest::new("v")).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                vault.delete_secret("flapping").unwrap();
                vault.recover_secret("flapping").unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..200 {
                match vault.get_secret("flapping", None) {
                    Ok(version) => assert_eq!(version.payload().value(), "v"),
                    Err(err) => assert!(matches!(err, Error::NotFound { .. })),
                }
            }
        });
    });
    assert_eq!(vault.list_secret_versions("flapping").unwrap().len(), 1);
}

#[test]
fn test_independent_names_in_parallel() {
    let (vault, _) = setup_default_vault();

    thread::scope(|scope| {
        for i in 0..WRITERS {
            let vault = &vault;
            scope.spawn(move || {
                let name = format!("key-{i}");
                vault.create_key(&name, CreateKeyRequest::new(KeyType::Ec)).unwrap();
                let digest = SignatureAlgorithm::ES256.digest(name.as_bytes());
                let signature = vault.sign(&name, None, SignatureAlgorithm::ES256, &digest).unwrap();
                assert!(vault.verify(&name, None, SignatureAlgorithm::ES256, &digest, &signature).unwrap());
            });
        }
    });
    assert_eq!(vault.list_keys().len(), WRITERS);
}

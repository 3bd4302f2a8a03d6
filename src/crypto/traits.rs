//! 定义了密钥族加密系统的核心 Trait。
use crate::common::errors::{Error, Result};
use crate::crypto::{EncryptedPayload, EncryptionAlgorithm, SignatureAlgorithm};
use crate::key_type::{KeyFamily, KeyParameter};
use rand_core::CryptoRngCore;
use std::fmt::Debug;

/// `KeyFamilySystem` 定义了一个密钥族（RSA、EC 或 oct）必须实现的功能。
///
/// 默认实现返回 `UnsupportedOperation`，每个族只覆盖自己能执行的操作。
pub trait KeyFamilySystem {
    const FAMILY: KeyFamily;

    /// 完整密钥（含私钥部分）
    type KeyPair: Clone + Debug;

    /// 公钥部分
    type PublicKey: Clone + Debug;

    /// 按给定参数生成密钥
    fn generate<R: CryptoRngCore>(parameter: KeyParameter, rng: &mut R) -> Result<Self::KeyPair>;

    fn sign<R: CryptoRngCore>(
        _key: &Self::KeyPair,
        algorithm: SignatureAlgorithm,
        _digest: &[u8],
        _rng: &mut R,
    ) -> Result<Vec<u8>> {
        Err(unsupported::<Self>(algorithm.as_str()))
    }

    fn verify(
        _key: &Self::PublicKey,
        algorithm: SignatureAlgorithm,
        _digest: &[u8],
        _signature: &[u8],
    ) -> Result<bool> {
        Err(unsupported::<Self>(algorithm.as_str()))
    }

    fn encrypt<R: CryptoRngCore>(
        _key: &Self::KeyPair,
        algorithm: EncryptionAlgorithm,
        _plaintext: &[u8],
        _aad: Option<&[u8]>,
        _rng: &mut R,
    ) -> Result<EncryptedPayload> {
        Err(unsupported::<Self>(algorithm.as_str()))
    }

    fn decrypt(
        _key: &Self::KeyPair,
        payload: &EncryptedPayload,
        _aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        Err(unsupported::<Self>(payload.algorithm.as_str()))
    }
}

fn unsupported<S: KeyFamilySystem + ?Sized>(operation: &str) -> Error {
    Error::unsupported(operation, format!("{} key", S::FAMILY.algorithm_name()))
}

//!
//! # 通用配置模块
//!
//! 保管库的运行时配置：启用的密钥类型与证书内容类型、覆盖策略以及软删除保留期。
//! 构造后只读，以 `Arc<VaultConfig>` 共享。
//!
use crate::certificate::CertificateContentType;
use crate::common::errors::{Error, Result};
use crate::key_type::KeyType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// 软删除保留天数的合法范围
pub const RECOVERABLE_DAYS_RANGE: std::ops::RangeInclusive<u32> = 7..=90;

/// 保管库配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VaultConfig {
    /// 允许创建的密钥类型
    #[serde(default = "default_key_types")]
    pub enabled_key_types: BTreeSet<KeyType>,
    /// 允许签发或导入的证书内容类型
    #[serde(default = "default_content_types")]
    pub enabled_content_types: BTreeSet<CertificateContentType>,
    /// 对已存在的活动名称执行 create 时是否追加新版本
    #[serde(default = "default_allow_overwrite")]
    pub allow_overwrite: bool,
    /// 软删除后到计划清除之间的天数
    #[serde(default = "default_recoverable_days")]
    pub recoverable_days: u32,
    /// 启用后禁止手动清除
    #[serde(default)]
    pub purge_protection: bool,
}

fn default_key_types() -> BTreeSet<KeyType> {
    KeyType::ALL.iter().copied().collect()
}

fn default_content_types() -> BTreeSet<CertificateContentType> {
    CertificateContentType::ALL.iter().copied().collect()
}

fn default_allow_overwrite() -> bool {
    true
}

fn default_recoverable_days() -> u32 {
    90
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled_key_types: default_key_types(),
            enabled_content_types: default_content_types(),
            allow_overwrite: default_allow_overwrite(),
            recoverable_days: default_recoverable_days(),
            purge_protection: false,
        }
    }
}

impl VaultConfig {
    /// 从 JSON 字符串加载并校验配置
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: VaultConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载并校验配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if !RECOVERABLE_DAYS_RANGE.contains(&self.recoverable_days) {
            return Err(Error::Config(format!(
                "recoverable_days must be within {}..={}, got {}",
                RECOVERABLE_DAYS_RANGE.start(),
                RECOVERABLE_DAYS_RANGE.end(),
                self.recoverable_days
            )));
        }
        if self.enabled_key_types.is_empty() {
            return Err(Error::Config(
                "at least one key type must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_key_type_enabled(&self, key_type: KeyType) -> bool {
        self.enabled_key_types.contains(&key_type)
    }

    pub fn is_content_type_enabled(&self, content_type: CertificateContentType) -> bool {
        self.enabled_content_types.contains(&content_type)
    }
}

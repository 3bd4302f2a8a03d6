//!
//! 集成测试的通用辅助函数
//!
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Once};
use vault_engine::prelude::*;

static TRACING: Once = Once::new();

/// 安装测试用的日志订阅者，级别由 `RUST_LOG` 控制
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

/// 创建一个使用手动时钟的保管库
pub fn setup_vault(config: VaultConfig) -> (Vault, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new(start_time()));
    let vault = Vault::new("test-vault", Arc::new(config), clock.clone()).unwrap();
    (vault, clock)
}

pub fn setup_default_vault() -> (Vault, Arc<ManualClock>) {
    setup_vault(VaultConfig::default())
}

//! 时间来源。保管库内所有时间戳（版本创建、软删除、证书有效期）都经由 `Clock` 获取。

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟，精确到秒
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// 手动推进的时钟，用于测试生命周期与清除调度
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start.trunc_subsecs(0)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant.trunc_subsecs(0);
    }

    /// 超出可表示范围时停在边界
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = match now.checked_add_signed(by) {
            Some(next) => next,
            None if by < Duration::zero() => DateTime::<Utc>::MIN_UTC,
            None => DateTime::<Utc>::MAX_UTC.trunc_subsecs(0),
        };
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

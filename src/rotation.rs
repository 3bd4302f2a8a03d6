//! 生命周期动作策略
//!
//! Rotation and notification triggers attached to key rotation policies and
//! certificate policies. Evaluation is pure: given a version's creation and
//! expiry instants and the current time it reports which actions are due.

use crate::common::errors::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 密钥轮换策略中 `expiry_days` 的下限
pub const MIN_KEY_EXPIRY_DAYS: u32 = 28;

/// 天数类触发器与 `expiry_days` 的上限（约 100 年）
pub const MAX_TRIGGER_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifetimeActionType {
    /// 轮换密钥或续订证书（证书称为 AutoRenew）
    Rotate,
    /// 通知（证书称为 EmailContacts）
    Notify,
}

impl fmt::Display for LifetimeActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeActionType::Rotate => f.write_str("Rotate"),
            LifetimeActionType::Notify => f.write_str("Notify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifetimeTrigger {
    /// Percentage (1..=99) of the lifetime between creation and expiry.
    LifetimePercentage(u8),
    DaysBeforeExpiry(u32),
    DaysAfterCreate(u32),
}

impl fmt::Display for LifetimeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeTrigger::LifetimePercentage(pct) => write!(f, "{pct}% of lifetime"),
            LifetimeTrigger::DaysBeforeExpiry(days) => write!(f, "{days} days before expiry"),
            LifetimeTrigger::DaysAfterCreate(days) => write!(f, "{days} days after create"),
        }
    }
}

impl LifetimeTrigger {
    /// The instant the trigger fires, or `None` when it depends on an expiry
    /// the version does not have or falls outside the representable range.
    pub fn trigger_instant(
        &self,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match *self {
            LifetimeTrigger::LifetimePercentage(pct) => {
                let expires = expires?;
                let lifetime = (expires - created).num_seconds();
                created.checked_add_signed(Duration::seconds(lifetime * i64::from(pct) / 100))
            }
            LifetimeTrigger::DaysBeforeExpiry(days) => {
                expires?.checked_sub_signed(Duration::days(i64::from(days)))
            }
            LifetimeTrigger::DaysAfterCreate(days) => {
                created.checked_add_signed(Duration::days(i64::from(days)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifetimeAction {
    pub trigger: LifetimeTrigger,
    pub action: LifetimeActionType,
}

impl LifetimeAction {
    pub fn new(trigger: LifetimeTrigger, action: LifetimeActionType) -> Self {
        Self { trigger, action }
    }
}

/// Actions whose trigger instant is at or before `now`, closest to expiry
/// first, ties broken by action type.
pub fn due_actions(
    created: DateTime<Utc>,
    expires: Option<DateTime<Utc>>,
    actions: &[LifetimeAction],
    now: DateTime<Utc>,
) -> Vec<LifetimeAction> {
    let mut due: Vec<(Option<Duration>, DateTime<Utc>, LifetimeAction)> = actions
        .iter()
        .filter_map(|action| {
            let at = action.trigger.trigger_instant(created, expires)?;
            (at <= now).then(|| (expires.map(|e| e - at), at, *action))
        })
        .collect();

    // 没有到期时间的触发器排在最后
    due.sort_by(|a, b| {
        let distance = match (a.0, b.0) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.1.cmp(&a.1),
        };
        distance.then(a.2.action.cmp(&b.2.action))
    });
    due.into_iter().map(|(_, _, action)| action).collect()
}

fn ensure_unique_action_types(actions: &[LifetimeAction]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for action in actions {
        if !seen.insert(action.action) {
            return Err(Error::invalid_parameter(
                "lifetime actions",
                format!("duplicate {} action", action.action),
                ["at most one action per action type"],
            ));
        }
    }
    Ok(())
}

/// Validates lifetime actions of a certificate policy with the given validity.
pub fn validate_certificate_actions(actions: &[LifetimeAction], validity_months: u32) -> Result<()> {
    ensure_unique_action_types(actions)?;
    for action in actions {
        match action.trigger {
            LifetimeTrigger::LifetimePercentage(pct) if (1..=99).contains(&pct) => {}
            LifetimeTrigger::LifetimePercentage(pct) => {
                return Err(Error::invalid_parameter("lifetime percentage", pct, ["1..=99"]));
            }
            LifetimeTrigger::DaysBeforeExpiry(days) => {
                // 以每月最少 28 天估算有效期
                let max_days = validity_months.saturating_mul(28).saturating_sub(1);
                if days == 0 || days > max_days {
                    return Err(Error::invalid_parameter(
                        "days before expiry",
                        days,
                        [format!("1..={max_days}")],
                    ));
                }
            }
            LifetimeTrigger::DaysAfterCreate(_) => {
                return Err(Error::invalid_parameter(
                    "certificate lifetime trigger",
                    action.trigger,
                    ["LifetimePercentage", "DaysBeforeExpiry"],
                ));
            }
        }
    }
    Ok(())
}

/// 密钥轮换策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotationPolicy {
    /// Lifetime of versions created by rotation.
    #[serde(default)]
    pub expiry_days: Option<u32>,
    #[serde(default)]
    pub lifetime_actions: Vec<LifetimeAction>,
}

impl Default for KeyRotationPolicy {
    fn default() -> Self {
        Self {
            expiry_days: None,
            lifetime_actions: vec![LifetimeAction::new(
                LifetimeTrigger::DaysBeforeExpiry(30),
                LifetimeActionType::Notify,
            )],
        }
    }
}

fn ensure_trigger_days(param: &str, days: u32) -> Result<()> {
    if days > MAX_TRIGGER_DAYS {
        return Err(Error::invalid_parameter(
            param,
            days,
            [format!("<= {MAX_TRIGGER_DAYS}")],
        ));
    }
    Ok(())
}

impl KeyRotationPolicy {
    pub fn validate(&self) -> Result<()> {
        if let Some(days) = self.expiry_days {
            if !(MIN_KEY_EXPIRY_DAYS..=MAX_TRIGGER_DAYS).contains(&days) {
                return Err(Error::invalid_parameter(
                    "expiry days",
                    days,
                    [format!("{MIN_KEY_EXPIRY_DAYS}..={MAX_TRIGGER_DAYS}")],
                ));
            }
        }
        ensure_unique_action_types(&self.lifetime_actions)?;
        for action in &self.lifetime_actions {
            match action.trigger {
                LifetimeTrigger::DaysAfterCreate(days) => {
                    ensure_trigger_days("days after create", days)?;
                }
                LifetimeTrigger::DaysBeforeExpiry(days) => match self.expiry_days {
                    Some(expiry) if days < expiry => {}
                    Some(expiry) => {
                        return Err(Error::invalid_parameter(
                            "days before expiry",
                            days,
                            [format!("< {expiry}")],
                        ));
                    }
                    // 默认策略的通知动作在没有到期时间时不会触发，允许存在
                    None if action.action == LifetimeActionType::Notify => {
                        ensure_trigger_days("days before expiry", days)?;
                    }
                    None => {
                        return Err(Error::invalid_parameter(
                            "days before expiry",
                            days,
                            ["requires expiry_days"],
                        ));
                    }
                },
                LifetimeTrigger::LifetimePercentage(_) => {
                    return Err(Error::invalid_parameter(
                        "key lifetime trigger",
                        action.trigger,
                        ["DaysAfterCreate", "DaysBeforeExpiry"],
                    ));
                }
            }
        }
        Ok(())
    }

    /// Expiry instant for a version created by rotation at `now`.
    pub fn expiry_for(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiry_days
            .and_then(|days| now.checked_add_signed(Duration::days(i64::from(days))))
    }
}

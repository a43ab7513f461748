use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A subscription tier with a fixed price and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Trial,
    Month,
    Halfyear,
    Year,
    Expired,
}

impl Plan {
    pub fn duration_days(self) -> i64 {
        match self {
            Plan::Trial => 7,
            Plan::Month => 30,
            Plan::Halfyear => 180,
            Plan::Year => 365,
            Plan::Expired => 0,
        }
    }

    /// Price in whole rubles.
    pub fn price(self) -> i64 {
        match self {
            Plan::Trial => 0,
            Plan::Month => 199,
            Plan::Halfyear => 999,
            Plan::Year => 1999,
            Plan::Expired => 0,
        }
    }

    pub fn name_ru(self) -> &'static str {
        match self {
            Plan::Trial => "Пробный период",
            Plan::Month => "1 месяц",
            Plan::Halfyear => "6 месяцев",
            Plan::Year => "1 год",
            Plan::Expired => "Истекла",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Trial => "trial",
            Plan::Month => "month",
            Plan::Halfyear => "halfyear",
            Plan::Year => "year",
            Plan::Expired => "expired",
        }
    }

    /// Plans a user can pay for. Trial and expired are never purchasable.
    pub fn is_purchasable(self) -> bool {
        matches!(self, Plan::Month | Plan::Halfyear | Plan::Year)
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Plan::Trial),
            "month" => Ok(Plan::Month),
            "halfyear" => Ok(Plan::Halfyear),
            "year" => Ok(Plan::Year),
            "expired" => Ok(Plan::Expired),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownPlan(pub String);

impl fmt::Display for UnknownPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown plan: {}", self.0)
    }
}

impl std::error::Error for UnknownPlan {}

/// Extends a subscription by a raw number of days.
///
/// An expired or absent subscription starts counting from `now`; an active one
/// is extended from its current end, so paid periods never overlap. `now` is
/// injected so the function stays deterministic. Promo codes carry day counts
/// directly and use this; plan purchases go through
/// [`calculate_subscription_end`].
pub fn extend_from(
    current_end: Option<DateTime<Utc>>,
    days: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = match current_end {
        Some(end) if end > now => end,
        _ => now,
    };
    base + Duration::days(days)
}

/// Computes the new subscription end date for a plan purchase.
pub fn calculate_subscription_end(
    current_end: Option<DateTime<Utc>>,
    plan: Plan,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    extend_from(current_end, plan.duration_days(), now)
}

/// Effective subscription state, computed from the expiry timestamp rather
/// than the stored plan label.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub plan: Plan,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_trial: bool,
    pub is_expired: bool,
    pub days_remaining: i64,
}

pub fn subscription_status(
    plan: Plan,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SubscriptionStatus {
    let is_active = expires_at.map(|e| e > now).unwrap_or(false);
    let days_remaining = match expires_at {
        Some(e) if is_active => {
            let secs = (e - now).num_seconds();
            // ceil to whole days, matching the user-visible countdown
            (secs + 86_399) / 86_400
        }
        _ => 0,
    };

    SubscriptionStatus {
        plan,
        expires_at,
        is_active,
        is_trial: plan == Plan::Trial,
        is_expired: plan == Plan::Expired || !is_active,
        days_remaining,
    }
}

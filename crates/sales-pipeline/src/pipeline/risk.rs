use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::Opportunity;

/// Staleness bucket, ordered `Normal < AtRisk < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Normal,
    AtRisk,
    Critical,
}

impl RiskLevel {
    pub const fn ordered() -> [Self; 3] {
        [Self::Normal, Self::AtRisk, Self::Critical]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::AtRisk => "AT_RISK",
            Self::Critical => "CRITICAL",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::AtRisk => "At risk",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown risk level '{0}'")]
pub struct UnknownRiskLevel(pub String);

impl FromStr for RiskLevel {
    type Err = UnknownRiskLevel;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('-', "_").to_ascii_uppercase();
        RiskLevel::ordered()
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| UnknownRiskLevel(raw.to_string()))
    }
}

/// Day thresholds separating the risk buckets.
///
/// An opportunity is `AtRisk` once more than `at_risk_after_days` whole days
/// passed since its last update and `Critical` past `critical_after_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub at_risk_after_days: i64,
    pub critical_after_days: i64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            at_risk_after_days: 7,
            critical_after_days: 15,
        }
    }
}

/// Pure mapping from staleness to a [`RiskLevel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
}

impl RiskClassifier {
    pub fn new(thresholds: RiskThresholds) -> Self {
        assert!(
            thresholds.at_risk_after_days < thresholds.critical_after_days,
            "at-risk threshold must be below the critical threshold"
        );
        Self { thresholds }
    }

    pub fn thresholds(&self) -> RiskThresholds {
        self.thresholds
    }

    /// Whole days elapsed since `last_updated_at`; never negative.
    pub fn days_stale(now: DateTime<Utc>, last_updated_at: DateTime<Utc>) -> i64 {
        (now - last_updated_at).num_days().max(0)
    }

    pub fn classify(&self, now: DateTime<Utc>, last_updated_at: DateTime<Utc>) -> RiskLevel {
        self.classify_days(Self::days_stale(now, last_updated_at))
    }

    pub fn classify_days(&self, days: i64) -> RiskLevel {
        if days > self.thresholds.critical_after_days {
            RiskLevel::Critical
        } else if days > self.thresholds.at_risk_after_days {
            RiskLevel::AtRisk
        } else {
            RiskLevel::Normal
        }
    }

    /// Closed opportunities are never stale.
    pub fn classify_opportunity(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> RiskLevel {
        if opportunity.is_terminal() {
            RiskLevel::Normal
        } else {
            self.classify(now, opportunity.last_updated_at())
        }
    }
}

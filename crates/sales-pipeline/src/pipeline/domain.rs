use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency amounts are kept at cent precision.
pub const MONEY_SCALE: u32 = 2;

/// Largest amount, in whole currency units, accepted for any single value.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000;

pub(crate) fn money(value: Decimal) -> Decimal {
    value.round_dp(MONEY_SCALE)
}

/// Round to money scale and keep the amount within `[0, MAX_AMOUNT_UNITS]`.
pub(crate) fn checked_amount(field: &str, value: Decimal) -> Result<Decimal, InvalidInput> {
    let value = money(value);
    if value < Decimal::ZERO {
        return Err(InvalidInput::field(
            field,
            format!("{field} must not be negative (got {value})"),
        ));
    }
    if value > Decimal::from(MAX_AMOUNT_UNITS) {
        return Err(InvalidInput::field(
            field,
            format!("{field} must not exceed {MAX_AMOUNT_UNITS} (got {value})"),
        ));
    }
    Ok(value)
}

/// Process-unique, monotonically allocated opportunity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpportunityId(pub u64);

impl fmt::Display for OpportunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human readable `P-YYYY-NNN` code, minted once by the code allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpportunityCode(String);

impl OpportunityCode {
    pub(crate) fn format(year: i32, sequence: u32) -> Self {
        Self(format!("P-{year:04}-{sequence:03}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the `P-\d{4}-\d{3}` shape.
    pub fn is_well_formed(raw: &str) -> bool {
        let bytes = raw.as_bytes();
        bytes.len() == 10
            && raw.starts_with("P-")
            && bytes[6] == b'-'
            && bytes[2..6].iter().all(u8::is_ascii_digit)
            && bytes[7..].iter().all(u8::is_ascii_digit)
    }
}

impl Borrow<str> for OpportunityCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpportunityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an opportunity in the sales lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Opportunity,
    Presales,
    Delivery,
    Collection,
    Postsale,
    ClosedLost,
    ClosedWon,
}

impl Phase {
    pub const fn ordered() -> [Self; 7] {
        [
            Self::Opportunity,
            Self::Presales,
            Self::Delivery,
            Self::Collection,
            Self::Postsale,
            Self::ClosedLost,
            Self::ClosedWon,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opportunity => "OPPORTUNITY",
            Self::Presales => "PRESALES",
            Self::Delivery => "DELIVERY",
            Self::Collection => "COLLECTION",
            Self::Postsale => "POSTSALE",
            Self::ClosedLost => "CLOSED_LOST",
            Self::ClosedWon => "CLOSED_WON",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Opportunity => "Opportunity",
            Self::Presales => "Presales",
            Self::Delivery => "Delivery",
            Self::Collection => "Collection",
            Self::Postsale => "Post-sale",
            Self::ClosedLost => "Closed (lost)",
            Self::ClosedWon => "Closed (won)",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ClosedLost | Self::ClosedWon)
    }

    /// Close probability assigned when an opportunity enters the phase.
    pub const fn default_probability(self) -> u8 {
        match self {
            Self::Opportunity => 20,
            Self::Presales => 70,
            Self::Delivery => 85,
            Self::Collection => 95,
            Self::Postsale => 98,
            Self::ClosedWon => 100,
            Self::ClosedLost => 0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('-', "_").to_ascii_uppercase();
        Phase::ordered()
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| UnknownPhase(raw.to_string()))
    }
}

/// Clamp a requested probability into the `[0, 100]` range.
pub fn clamp_probability(requested: i64) -> u8 {
    requested.clamp(0, 100) as u8
}

/// Single append-only audit record on an opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub message: String,
}

/// Tracked prospective sale.
///
/// Fields are crate-private: every mutation goes through the lifecycle engine
/// or the review queue so history and timestamps stay consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub(crate) id: OpportunityId,
    pub(crate) code: OpportunityCode,
    pub(crate) name: String,
    pub(crate) client: String,
    pub(crate) description: String,
    pub(crate) assigned_to: String,
    pub(crate) estimated_value: Decimal,
    pub(crate) contracted_value: Decimal,
    pub(crate) phase: Phase,
    pub(crate) close_probability: u8,
    pub(crate) campaign_code: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_updated_at: DateTime<Utc>,
    pub(crate) next_contact_at: DateTime<Utc>,
    pub(crate) history: Vec<HistoryEntry>,
}

impl Opportunity {
    pub(crate) fn open(
        id: OpportunityId,
        code: OpportunityCode,
        draft: ValidatedDraft,
        actor: &str,
        at: DateTime<Utc>,
        next_contact_at: DateTime<Utc>,
    ) -> Self {
        let phase = Phase::Opportunity;
        let mut opportunity = Self {
            id,
            code,
            name: draft.name,
            client: draft.client,
            description: draft.description,
            assigned_to: draft.assigned_to,
            estimated_value: draft.estimated_value,
            contracted_value: Decimal::ZERO,
            phase,
            close_probability: phase.default_probability(),
            campaign_code: draft.campaign_code,
            created_at: at,
            last_updated_at: at,
            next_contact_at,
            history: Vec::new(),
        };
        opportunity.record(at, actor, format!("opportunity created by {actor}"));
        opportunity
    }

    /// Append a history entry and bump `last_updated_at`.
    pub(crate) fn record(&mut self, at: DateTime<Utc>, actor: &str, message: String) {
        let at = at.max(self.last_updated_at);
        self.last_updated_at = at;
        self.history.push(HistoryEntry {
            at,
            actor: actor.to_string(),
            message,
        });
    }

    pub fn id(&self) -> OpportunityId {
        self.id
    }

    pub fn code(&self) -> &OpportunityCode {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn assigned_to(&self) -> &str {
        &self.assigned_to
    }

    pub fn estimated_value(&self) -> Decimal {
        self.estimated_value
    }

    pub fn contracted_value(&self) -> Decimal {
        self.contracted_value
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn close_probability(&self) -> u8 {
        self.close_probability
    }

    pub fn campaign_code(&self) -> Option<&str> {
        self.campaign_code.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_year(&self) -> i32 {
        self.created_at.year()
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    pub fn next_contact_at(&self) -> DateTime<Utc> {
        self.next_contact_at
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Payload accepted by `create_opportunity`.
///
/// Every field defaults so that missing keys surface as a field list instead
/// of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_value: Option<Decimal>,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub campaign_code: Option<String>,
}

/// Draft that passed field validation; values are trimmed and money is scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedDraft {
    pub name: String,
    pub client: String,
    pub description: String,
    pub estimated_value: Decimal,
    pub assigned_to: String,
    pub campaign_code: Option<String>,
}

/// Missing, empty, negative or unknown input values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid input ({}): {reason}", .fields.join(", "))]
pub struct InvalidInput {
    pub fields: Vec<String>,
    pub reason: String,
}

impl InvalidInput {
    pub fn field(field: &str, reason: impl Into<String>) -> Self {
        Self {
            fields: vec![field.to_string()],
            reason: reason.into(),
        }
    }
}

impl OpportunityDraft {
    pub fn validate(&self) -> Result<ValidatedDraft, InvalidInput> {
        let mut missing = Vec::new();
        for (field, value) in [
            ("name", &self.name),
            ("client", &self.client),
            ("description", &self.description),
            ("assigned_to", &self.assigned_to),
        ] {
            if value.trim().is_empty() {
                missing.push(field.to_string());
            }
        }
        if self.estimated_value.is_none() {
            missing.push("estimated_value".to_string());
        }
        if !missing.is_empty() {
            return Err(InvalidInput {
                fields: missing,
                reason: "required fields are missing or empty".to_string(),
            });
        }

        let estimated_value =
            checked_amount("estimated_value", self.estimated_value.unwrap_or_default())?;

        let campaign_code = self
            .campaign_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);

        Ok(ValidatedDraft {
            name: self.name.trim().to_string(),
            client: self.client.trim().to_string(),
            description: self.description.trim().to_string(),
            estimated_value,
            assigned_to: self.assigned_to.trim().to_string(),
            campaign_code,
        })
    }
}

pub(crate) fn require_actor(actor: &str) -> Result<&str, InvalidInput> {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        Err(InvalidInput::field("actor", "actor must not be empty"))
    } else {
        Ok(trimmed)
    }
}

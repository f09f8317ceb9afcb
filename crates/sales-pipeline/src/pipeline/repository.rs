use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Opportunity, OpportunityCode, OpportunityId, Phase};
use super::risk::{RiskClassifier, RiskLevel};

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("opportunity code {0} already exists")]
    Duplicate(OpportunityCode),
    #[error("opportunity id {0} already exists")]
    IdConflict(OpportunityId),
    #[error("opportunity {0} not found")]
    NotFound(String),
}

/// Structured selection used by `list`; absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub risk: Option<RiskLevel>,
    #[serde(default)]
    pub phase: Option<Phase>,
}

impl OpportunityFilter {
    pub fn assigned_to(executive: impl Into<String>) -> Self {
        Self {
            assigned_to: Some(executive.into()),
            ..Self::default()
        }
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn matches(
        &self,
        opportunity: &Opportunity,
        classifier: &RiskClassifier,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(executive) = &self.assigned_to {
            if opportunity.assigned_to() != executive {
                return false;
            }
        }
        if let Some(phase) = self.phase {
            if opportunity.phase() != phase {
                return false;
            }
        }
        if let Some(risk) = self.risk {
            if classifier.classify_opportunity(opportunity, now) != risk {
                return false;
            }
        }
        true
    }
}

/// In-memory opportunity store keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpportunityRepository {
    records: BTreeMap<OpportunityId, Opportunity>,
    codes: HashMap<OpportunityCode, OpportunityId>,
    last_id: u64,
}

impl OpportunityRepository {
    /// Id the next successful `insert` will assign.
    pub fn peek_next_id(&self) -> OpportunityId {
        OpportunityId(self.last_id + 1)
    }

    /// Store a new opportunity, assigning the next id.
    pub fn insert(&mut self, mut opportunity: Opportunity) -> Result<OpportunityId, RepositoryError> {
        if self.codes.contains_key(&opportunity.code) {
            return Err(RepositoryError::Duplicate(opportunity.code.clone()));
        }
        let id = self.peek_next_id();
        if self.records.contains_key(&id) {
            return Err(RepositoryError::IdConflict(id));
        }

        opportunity.id = id;
        self.codes.insert(opportunity.code.clone(), id);
        self.records.insert(id, opportunity);
        self.last_id = id.0;
        Ok(id)
    }

    pub fn get(&self, id: OpportunityId) -> Option<&Opportunity> {
        self.records.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: OpportunityId) -> Option<&mut Opportunity> {
        self.records.get_mut(&id)
    }

    pub fn fetch(&self, id: OpportunityId) -> Result<&Opportunity, RepositoryError> {
        self.get(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    pub fn get_by_code(&self, code: &str) -> Option<&Opportunity> {
        self.codes.get(code).and_then(|id| self.records.get(id))
    }

    pub fn list<'a>(
        &'a self,
        filter: &'a OpportunityFilter,
        classifier: &'a RiskClassifier,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a Opportunity> + 'a {
        self.records
            .values()
            .filter(move |opportunity| filter.matches(opportunity, classifier, now))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Opportunity> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_created_in(&self, year: i32) -> usize {
        self.records
            .values()
            .filter(|opportunity| opportunity.created_year() == year)
            .count()
    }
}

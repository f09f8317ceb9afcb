//! Optional collaborator that vets actor and executive identifiers.
//!
//! Without a provider the pipeline treats identities as opaque strings.

use std::collections::BTreeSet;

use super::reviews::{ReviewId, ReviewRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("unknown actor '{0}'")]
    UnknownActor(String),
    #[error("unknown executive '{0}'")]
    UnknownExecutive(String),
    #[error("{decider} may not decide review {review}: {reason}")]
    DecisionForbidden {
        review: ReviewId,
        decider: String,
        reason: String,
    },
}

pub trait IdentityProvider: Send + Sync {
    /// Accept or refuse the identity performing a mutation.
    fn validate_actor(&self, actor: &str) -> Result<(), IdentityError>;

    /// Accept or refuse the `assigned_to` executive of a new opportunity.
    fn validate_executive(&self, executive: &str) -> Result<(), IdentityError> {
        self.validate_actor(executive)
            .map_err(|_| IdentityError::UnknownExecutive(executive.to_string()))
    }

    /// Policy hook for review decisions; allows everything by default.
    fn authorize_decision(
        &self,
        _request: &ReviewRequest,
        _decider: &str,
    ) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Fixed roster of executives and managers.
///
/// Executives may own opportunities and act on them; managers may only act.
/// Self-approval is refused unless explicitly allowed.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    executives: BTreeSet<String>,
    managers: BTreeSet<String>,
    allow_self_approval: bool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executive(mut self, name: impl Into<String>) -> Self {
        self.executives.insert(name.into());
        self
    }

    pub fn with_manager(mut self, name: impl Into<String>) -> Self {
        self.managers.insert(name.into());
        self
    }

    pub fn allow_self_approval(mut self, allow: bool) -> Self {
        self.allow_self_approval = allow;
        self
    }

    fn knows(&self, name: &str) -> bool {
        self.executives.contains(name) || self.managers.contains(name)
    }
}

impl IdentityProvider for StaticDirectory {
    fn validate_actor(&self, actor: &str) -> Result<(), IdentityError> {
        if self.knows(actor) {
            Ok(())
        } else {
            Err(IdentityError::UnknownActor(actor.to_string()))
        }
    }

    fn validate_executive(&self, executive: &str) -> Result<(), IdentityError> {
        if self.executives.contains(executive) {
            Ok(())
        } else {
            Err(IdentityError::UnknownExecutive(executive.to_string()))
        }
    }

    fn authorize_decision(
        &self,
        request: &ReviewRequest,
        decider: &str,
    ) -> Result<(), IdentityError> {
        if !self.managers.contains(decider) {
            return Err(IdentityError::DecisionForbidden {
                review: request.id,
                decider: decider.to_string(),
                reason: "only managers decide reviews".to_string(),
            });
        }
        if !self.allow_self_approval && request.requester == decider {
            return Err(IdentityError::DecisionForbidden {
                review: request.id,
                decider: decider.to_string(),
                reason: "requester cannot decide their own review".to_string(),
            });
        }
        Ok(())
    }
}

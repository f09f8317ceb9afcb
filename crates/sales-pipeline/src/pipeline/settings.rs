use serde::{Deserialize, Serialize};

use super::risk::RiskThresholds;

/// Tunables of the pipeline core, loaded from `PIPELINE_*` variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub risk: RiskThresholds,
    /// Offset applied when a caller omits `next_contact_at`.
    pub follow_up_days: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            risk: RiskThresholds::default(),
            follow_up_days: 3,
        }
    }
}

use chrono::{DateTime, Datelike, Utc};

use super::domain::OpportunityCode;
use super::repository::OpportunityRepository;

/// Largest per-year sequence that still fits the three digit `NNN` slot.
pub const MAX_SEQUENCE_PER_YEAR: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeAllocationError {
    #[error("code sequence for {year} is exhausted ({MAX_SEQUENCE_PER_YEAR} opportunities)")]
    Exhausted { year: i32 },
}

/// Mints `P-YYYY-NNN` codes from the year of `now` and the current repository.
///
/// Callers hold the pipeline lock while allocating, which keeps the sequence
/// dense and unique.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeAllocator;

impl CodeAllocator {
    pub fn new() -> Self {
        Self
    }

    pub fn next_code(
        &self,
        now: DateTime<Utc>,
        repository: &OpportunityRepository,
    ) -> Result<OpportunityCode, CodeAllocationError> {
        let year = now.year();
        let issued = repository.count_created_in(year);
        let sequence = u32::try_from(issued + 1).unwrap_or(u32::MAX);
        if sequence > MAX_SEQUENCE_PER_YEAR {
            return Err(CodeAllocationError::Exhausted { year });
        }
        Ok(OpportunityCode::format(year, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_code_of_the_year_starts_at_one() {
        let repository = OpportunityRepository::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap();
        let code = CodeAllocator::new()
            .next_code(now, &repository)
            .expect("allocates");
        assert_eq!(code.as_str(), "P-2025-001");
        assert!(OpportunityCode::is_well_formed(code.as_str()));
    }

    #[test]
    fn well_formed_rejects_other_shapes() {
        assert!(OpportunityCode::is_well_formed("P-2024-017"));
        assert!(!OpportunityCode::is_well_formed("P-24-017"));
        assert!(!OpportunityCode::is_well_formed("X-2024-017"));
        assert!(!OpportunityCode::is_well_formed("P-2024-1000"));
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use super::domain::{money, Opportunity, Phase};
use super::risk::{RiskClassifier, RiskLevel};

/// Aggregate KPIs over a copy of the repository.
///
/// Pipeline figures only count open opportunities; `won_*` and `lost_count`
/// report the closed ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsView {
    pub generated_at: DateTime<Utc>,
    pub pipeline_total: Decimal,
    pub pipeline_weighted: Decimal,
    pub average_value: Decimal,
    pub open_count: usize,
    pub count_by_risk: BTreeMap<RiskLevel, usize>,
    pub count_by_phase: BTreeMap<Phase, usize>,
    pub won_count: usize,
    pub won_value: Decimal,
    pub lost_count: usize,
    pub pending_reviews: usize,
}

/// Pure reducers from opportunities to a [`MetricsView`].
#[derive(Debug, Clone, Copy)]
pub struct MetricsProjector<'a> {
    classifier: &'a RiskClassifier,
}

impl<'a> MetricsProjector<'a> {
    pub fn new(classifier: &'a RiskClassifier) -> Self {
        Self { classifier }
    }

    pub fn project<'o, I>(
        &self,
        opportunities: I,
        pending_reviews: usize,
        now: DateTime<Utc>,
    ) -> MetricsView
    where
        I: IntoIterator<Item = &'o Opportunity>,
    {
        let mut count_by_risk: BTreeMap<RiskLevel, usize> =
            RiskLevel::ordered().into_iter().map(|level| (level, 0)).collect();
        let mut count_by_phase: BTreeMap<Phase, usize> =
            Phase::ordered().into_iter().map(|phase| (phase, 0)).collect();

        let mut pipeline_total = Decimal::ZERO;
        let mut weighted_sum = Decimal::ZERO;
        let mut open_count = 0usize;
        let mut won_count = 0usize;
        let mut won_value = Decimal::ZERO;
        let mut lost_count = 0usize;

        for opportunity in opportunities {
            *count_by_phase.entry(opportunity.phase()).or_default() += 1;
            match opportunity.phase() {
                Phase::ClosedWon => {
                    won_count += 1;
                    won_value = saturating_add(won_value, Self::realised_value(opportunity));
                }
                Phase::ClosedLost => lost_count += 1,
                _ => {
                    open_count += 1;
                    pipeline_total = saturating_add(pipeline_total, opportunity.estimated_value());
                    let weighted = opportunity
                        .estimated_value()
                        .checked_mul(Decimal::from(opportunity.close_probability()))
                        .unwrap_or(Decimal::MAX);
                    weighted_sum = saturating_add(weighted_sum, weighted);
                    let risk = self.classifier.classify_opportunity(opportunity, now);
                    *count_by_risk.entry(risk).or_default() += 1;
                }
            }
        }

        let average_value = if open_count == 0 {
            Decimal::ZERO
        } else {
            pipeline_total / Decimal::from(open_count)
        };

        MetricsView {
            generated_at: now,
            pipeline_total: money(pipeline_total),
            pipeline_weighted: money(weighted_sum / Decimal::ONE_HUNDRED),
            average_value: money(average_value),
            open_count,
            count_by_risk,
            count_by_phase,
            won_count,
            won_value: money(won_value),
            lost_count,
            pending_reviews,
        }
    }

    fn realised_value(opportunity: &Opportunity) -> Decimal {
        if opportunity.contracted_value() > Decimal::ZERO {
            opportunity.contracted_value()
        } else {
            opportunity.estimated_value()
        }
    }
}

/// Sums stop at `Decimal::MAX` instead of panicking on overflow.
fn saturating_add(total: Decimal, value: Decimal) -> Decimal {
    total.checked_add(value).unwrap_or_else(|| {
        warn!(%total, %value, "pipeline metric overflowed; reporting the maximum");
        Decimal::MAX
    })
}

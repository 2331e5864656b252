//! Collects results as datasets finish and orders them into a report.

use chrono::{DateTime, Utc};
use overlay_report_report_models::{AoiSummary, FailedInterest, Interest, Report};

/// `reportDate` format.
pub const REPORT_DATE_FORMAT: &str = "%B %d %Y - %H:%M:%S UTC";

/// Append-only store of run results.
#[derive(Debug, Default, Clone)]
pub struct ReportAccumulator {
    interests: Vec<Interest>,
    failed: Vec<FailedInterest>,
}

impl ReportAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_interest(&mut self, interest: Interest) {
        self.interests.push(interest);
    }

    /// Records a failure. A repeat of an identical failure for the same
    /// dataset (one per AOI feature) is recorded once.
    pub fn push_failure(&mut self, failure: FailedInterest) {
        if !self.failed.contains(&failure) {
            self.failed.push(failure);
        }
    }

    #[must_use]
    pub fn interests(&self) -> &[Interest] {
        &self.interests
    }

    #[must_use]
    pub fn failures(&self) -> &[FailedInterest] {
        &self.failed
    }

    /// Interests with a value, descending, followed by those without in
    /// the order they were added.
    #[must_use]
    pub fn ordered_interests(&self) -> Vec<Interest> {
        let (mut valued, unvalued): (Vec<_>, Vec<_>) = self
            .interests
            .iter()
            .cloned()
            .partition(Interest::has_value);

        valued.sort_by(|a, b| {
            b.value
                .unwrap_or_default()
                .total_cmp(&a.value.unwrap_or_default())
        });
        valued.extend(unvalued);
        valued
    }

    /// Builds the report, stamped with the current time.
    #[must_use]
    pub fn finalize(&self, aoi: AoiSummary, cancelled: bool) -> Report {
        self.finalize_at(aoi, cancelled, Utc::now())
    }

    #[must_use]
    pub fn finalize_at(&self, aoi: AoiSummary, cancelled: bool, now: DateTime<Utc>) -> Report {
        Report {
            report_id: uuid::Uuid::new_v4().to_string(),
            aoi,
            interests: self.ordered_interests(),
            failed_lyrs: self.failed.clone(),
            report_date: now.format(REPORT_DATE_FORMAT).to_string(),
            cancelled,
        }
    }
}

//! Aggregate progress accounting for the four-stage pipeline.
//!
//! Totals for the later stages start as floor estimates so the percentage
//! does not jump to 100% before anything real is known. Estimates only
//! grow while a stage is still discovering work; once a stage finishes,
//! its total is pinned to the exact parsed count.

use crate::events::ProgressSnapshot;

/// Floor estimate for the universities total.
pub const UNIVERSITY_FLOOR: usize = 100;
/// Floor estimate for the offers total.
pub const OFFER_FLOOR: usize = 500;
/// Floor estimate for the applications total.
pub const APPLICATION_FLOOR: usize = 1000;

/// Counter state behind [`ProgressSnapshot`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_cities: usize,
    parsed_cities: usize,
    total_universities: usize,
    parsed_universities: usize,
    total_offers: usize,
    parsed_offers: usize,
    total_applications: usize,
    parsed_applications: usize,
}

impl ProgressTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds parsed counts from the store and applies the floor estimates.
    ///
    /// `parsed_applications` counts offers that already hold application
    /// rows, since the applications stage tracks completion per offer.
    pub fn seed(
        &mut self,
        parsed_cities: usize,
        parsed_universities: usize,
        parsed_offers: usize,
        parsed_applications: usize,
    ) {
        self.parsed_cities = parsed_cities;
        self.parsed_universities = parsed_universities;
        self.parsed_offers = parsed_offers;
        self.parsed_applications = parsed_applications;

        self.total_universities = parsed_universities.max(UNIVERSITY_FLOOR);
        self.total_offers = parsed_offers.max(OFFER_FLOOR);
        self.total_applications = parsed_applications.max(APPLICATION_FLOOR);
    }

    /// Sets the exact city total discovered from the index page.
    pub fn set_total_cities(&mut self, total: usize) {
        self.total_cities = total;
    }

    /// Raises the universities estimate; never shrinks it.
    pub fn raise_university_total(&mut self, candidate: usize) {
        self.total_universities = self.total_universities.max(candidate);
    }

    /// Raises the offers estimate; never shrinks it.
    pub fn raise_offer_total(&mut self, candidate: usize) {
        self.total_offers = self.total_offers.max(candidate);
    }

    /// Raises the applications estimate; never shrinks it.
    pub fn raise_application_total(&mut self, candidate: usize) {
        self.total_applications = self.total_applications.max(candidate);
    }

    pub fn inc_cities(&mut self) {
        self.parsed_cities += 1;
    }

    pub fn inc_universities(&mut self) {
        self.parsed_universities += 1;
    }

    pub fn inc_offers(&mut self) {
        self.parsed_offers += 1;
    }

    /// Sets the number of offers whose applications are done this run.
    pub fn set_parsed_applications(&mut self, parsed: usize) {
        self.parsed_applications = parsed;
    }

    pub fn parsed_cities(&self) -> usize {
        self.parsed_cities
    }

    pub fn parsed_universities(&self) -> usize {
        self.parsed_universities
    }

    pub fn parsed_offers(&self) -> usize {
        self.parsed_offers
    }

    pub fn parsed_applications(&self) -> usize {
        self.parsed_applications
    }

    /// Pins a finished stage's total to the exact parsed count.
    ///
    /// Floor estimates exist only while the real total is unknown; a stage
    /// that ran to completion knows it exactly.
    pub fn finish_cities(&mut self) {
        self.total_cities = self.parsed_cities;
    }

    /// See [`Self::finish_cities`].
    pub fn finish_universities(&mut self) {
        self.total_universities = self.parsed_universities;
    }

    /// See [`Self::finish_cities`].
    pub fn finish_offers(&mut self) {
        self.total_offers = self.parsed_offers;
    }

    /// See [`Self::finish_cities`].
    pub fn finish_applications(&mut self) {
        self.total_applications = self.parsed_applications;
    }

    /// Label of the first stage, in pipeline order, that is still short of
    /// its total; "Completed" when all four are done.
    pub fn current_stage(&self) -> &'static str {
        if self.parsed_cities < self.total_cities {
            "Parsing Cities"
        } else if self.parsed_universities < self.total_universities {
            "Parsing Universities"
        } else if self.parsed_offers < self.total_offers {
            "Parsing Offers"
        } else if self.parsed_applications < self.total_applications {
            "Parsing Applications"
        } else {
            "Completed"
        }
    }

    /// Builds the externally visible snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.total_cities
            + self.total_universities
            + self.total_offers
            + self.total_applications;
        let parsed = self.parsed_cities
            + self.parsed_universities
            + self.parsed_offers
            + self.parsed_applications;

        let overall_percentage = if total > 0 {
            parsed as f64 * 100.0 / total as f64
        } else {
            0.0
        };

        ProgressSnapshot {
            total_cities: self.total_cities,
            parsed_cities: self.parsed_cities,
            total_universities: self.total_universities,
            parsed_universities: self.parsed_universities,
            total_offers: self.total_offers,
            parsed_offers: self.parsed_offers,
            total_applications: self.total_applications,
            parsed_applications: self.parsed_applications,
            overall_percentage,
            current_stage: self.current_stage().to_string(),
        }
    }
}

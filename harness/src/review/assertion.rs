use crate::api::types::ReportCollection;
use crate::error::{HarnessError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Lower bound on the number of reports a review produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalBound {
    AtLeast(u64),
    GreaterThan(u64),
}

impl TotalBound {
    pub fn holds(&self, total: u64) -> bool {
        match *self {
            TotalBound::AtLeast(n) => total >= n,
            TotalBound::GreaterThan(n) => total > n,
        }
    }
}

impl fmt::Display for TotalBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TotalBound::AtLeast(n) => write!(f, ">= {}", n),
            TotalBound::GreaterThan(n) => write!(f, "> {}", n),
        }
    }
}

/// How the flagged checkers are compared with the expected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Flagged set equals the expected set.
    Exact,
    /// Every expected checker is flagged; others may be too.
    Superset,
    /// Nothing outside the expected set is flagged.
    Subset,
}

/// Comparison of a report collection against expectations. Pure, no I/O.
pub struct ReportAssertion<'a> {
    reports: &'a ReportCollection,
    flagged: BTreeSet<String>,
}

impl<'a> ReportAssertion<'a> {
    pub fn new(reports: &'a ReportCollection) -> Self {
        Self {
            reports,
            flagged: reports.flagged_checkers(),
        }
    }

    pub fn expect_total(&self, bound: TotalBound) -> Result<&Self> {
        if bound.holds(self.reports.total) {
            Ok(self)
        } else {
            Err(HarnessError::AssertionMismatch {
                what: format!("report total (expected {})", bound),
                expected: BTreeSet::from([bound.to_string()]),
                actual: BTreeSet::from([self.reports.total.to_string()]),
            })
        }
    }

    pub fn expect_flagged<I, S>(&self, expected: I, mode: MatchMode) -> Result<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expected: BTreeSet<String> = expected.into_iter().map(Into::into).collect();
        let ok = match mode {
            MatchMode::Exact => self.flagged == expected,
            MatchMode::Superset => self.flagged.is_superset(&expected),
            MatchMode::Subset => self.flagged.is_subset(&expected),
        };
        if ok {
            Ok(self)
        } else {
            Err(self.mismatch(format!("flagged checkers ({:?})", mode), expected))
        }
    }

    pub fn expect_flagged_count(&self, count: usize) -> Result<&Self> {
        if self.flagged.len() == count {
            Ok(self)
        } else {
            Err(HarnessError::AssertionMismatch {
                what: format!(
                    "flagged checker count (expected {}, got {}) for flagged set",
                    count,
                    self.flagged.len()
                ),
                expected: BTreeSet::new(),
                actual: self.flagged.clone(),
            })
        }
    }

    pub fn expect_excluded<I, S>(&self, excluded: I) -> Result<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded: BTreeSet<String> = excluded.into_iter().map(Into::into).collect();
        let present: BTreeSet<String> = self.flagged.intersection(&excluded).cloned().collect();
        if present.is_empty() {
            Ok(self)
        } else {
            Err(HarnessError::AssertionMismatch {
                what: "unexpectedly flagged checkers".to_string(),
                expected: BTreeSet::new(),
                actual: present,
            })
        }
    }

    fn mismatch(&self, what: String, expected: BTreeSet<String>) -> HarnessError {
        HarnessError::AssertionMismatch {
            what,
            expected,
            actual: self.flagged.clone(),
        }
    }
}

/// Declarative expectation for one daemon, as the scenarios state them.
#[derive(Debug, Clone)]
pub struct ReviewExpectation {
    pub total: TotalBound,
    pub flagged_count: Option<usize>,
    pub includes: Vec<&'static str>,
    pub excludes: Vec<&'static str>,
}

impl ReviewExpectation {
    pub fn verify(&self, reports: &ReportCollection) -> Result<()> {
        let assertion = ReportAssertion::new(reports);
        assertion.expect_total(self.total)?;
        if let Some(count) = self.flagged_count {
            assertion.expect_flagged_count(count)?;
        }
        assertion
            .expect_flagged(self.includes.iter().copied(), MatchMode::Superset)?
            .expect_excluded(self.excludes.iter().copied())?;
        Ok(())
    }
}

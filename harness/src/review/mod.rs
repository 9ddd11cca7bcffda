pub mod assertion;
pub mod waiter;

pub use assertion::{MatchMode, ReportAssertion, ReviewExpectation, TotalBound};
pub use waiter::{FlaggedSetUnchanged, MinimumTotal, ReportSource, ReportWaiter, StabilityPredicate};

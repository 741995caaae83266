//! Aggregate progress derivation.
//!
//! Progress is always recomputed from the current lesson count of a course and
//! the completed lesson records of an enrollment. Nothing captured at
//! enrollment time participates, so adding lessons to a course lowers the
//! progress of students already enrolled in it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("progress must be between 0 and 100, got {0}")]
pub struct ProgressOutOfRange(pub i64);

/// Whole-number completion percentage in `0..=100`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Progress(u8);

impl Progress {
    pub const ZERO: Progress = Progress(0);
    pub const FULL: Progress = Progress(100);

    /// Build a progress value from a persisted integer.
    ///
    /// # Errors
    ///
    /// Returns `ProgressOutOfRange` when `value` is outside `0..=100`.
    pub fn new(value: i64) -> Result<Self, ProgressOutOfRange> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(Self)
            .ok_or(ProgressOutOfRange(value))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_full(self) -> bool {
        self.0 >= 100
    }
}

impl TryFrom<i64> for Progress {
    type Error = ProgressOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Progress> for i64 {
    fn from(p: Progress) -> Self {
        i64::from(p.0)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Lesson counts an aggregate is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounts {
    /// Lessons currently in the course.
    pub total_lessons: u64,
    /// Completed records of the enrollment for lessons still in the course.
    pub completed_lessons: u64,
}

impl ProgressCounts {
    #[must_use]
    pub fn new(total_lessons: u64, completed_lessons: u64) -> Self {
        Self {
            total_lessons,
            completed_lessons,
        }
    }

    #[must_use]
    pub fn aggregate(self) -> AggregateProgress {
        calculate(self.total_lessons, self.completed_lessons)
    }
}

/// Derived state written onto an enrollment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateProgress {
    pub progress: Progress,
    pub completed: bool,
}

impl AggregateProgress {
    #[must_use]
    pub fn from_progress(progress: Progress) -> Self {
        Self {
            progress,
            completed: progress.is_full(),
        }
    }
}

/// Truncated completion percentage: `floor(100 * done / total)`.
///
/// A course without lessons is at 0 and never completed. `done` is clamped to
/// `total`, so the result only reaches 100 when every lesson is done.
#[must_use]
pub fn calculate(total_lessons: u64, completed_lessons: u64) -> AggregateProgress {
    if total_lessons == 0 {
        return AggregateProgress::default();
    }
    let done = u128::from(completed_lessons.min(total_lessons));
    let pct = done * 100 / u128::from(total_lessons);
    // pct <= 100 because done <= total.
    let pct = u8::try_from(pct).unwrap_or(100);
    AggregateProgress::from_progress(Progress(pct))
}

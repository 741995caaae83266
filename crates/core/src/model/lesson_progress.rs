use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::course::Lesson;
use crate::model::ids::{EnrollmentId, LessonId, LessonProgressId};
use crate::progress::{AggregateProgress, calculate};

/// Completion state of one lesson within one enrollment.
///
/// Records are either seeded (pending) when the student enrolls, or created
/// directly in the completed state the first time a lesson added after
/// enrollment is completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    id: LessonProgressId,
    enrollment_id: EnrollmentId,
    lesson_id: LessonId,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    time_spent_secs: u64,
}

impl LessonProgress {
    /// A record seeded at enrollment time.
    #[must_use]
    pub fn pending(id: LessonProgressId, enrollment_id: EnrollmentId, lesson_id: LessonId) -> Self {
        Self {
            id,
            enrollment_id,
            lesson_id,
            completed: false,
            completed_at: None,
            time_spent_secs: 0,
        }
    }

    /// A record backfilled by its first completion event.
    #[must_use]
    pub fn backfilled(
        id: LessonProgressId,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            completed: true,
            completed_at: Some(at),
            ..Self::pending(id, enrollment_id, lesson_id)
        }
    }

    #[must_use]
    pub fn from_persisted(
        id: LessonProgressId,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
        time_spent_secs: u64,
    ) -> Self {
        Self {
            id,
            enrollment_id,
            lesson_id,
            completed,
            completed_at,
            time_spent_secs,
        }
    }

    #[must_use]
    pub fn id(&self) -> LessonProgressId {
        self.id
    }

    #[must_use]
    pub fn enrollment_id(&self) -> EnrollmentId {
        self.enrollment_id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    /// Mark the lesson completed at `at`.
    ///
    /// Returns `false` if it already was; the original timestamp is kept.
    pub fn mark_complete(&mut self, at: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(at);
        true
    }

    pub fn add_time_spent(&mut self, secs: u64) {
        self.time_spent_secs = self.time_spent_secs.saturating_add(secs);
    }
}

/// Per-lesson line of a course progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonStatus {
    pub lesson_id: LessonId,
    pub order: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Course progress for one enrollment: every current lesson plus the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub enrollment_id: EnrollmentId,
    pub per_lesson: Vec<LessonStatus>,
    pub aggregate: AggregateProgress,
}

impl CourseProgress {
    /// Join the course's ordered lessons with the enrollment's records.
    ///
    /// Lessons without a record count as not completed. Records for lessons no
    /// longer in the course are ignored.
    #[must_use]
    pub fn assemble(
        enrollment_id: EnrollmentId,
        ordered_lessons: &[Lesson],
        records: &[LessonProgress],
    ) -> Self {
        let by_lesson: HashMap<LessonId, &LessonProgress> =
            records.iter().map(|r| (r.lesson_id(), r)).collect();

        let per_lesson: Vec<LessonStatus> = ordered_lessons
            .iter()
            .map(|lesson| {
                let record = by_lesson.get(&lesson.id());
                LessonStatus {
                    lesson_id: lesson.id(),
                    order: lesson.order(),
                    completed: record.is_some_and(|r| r.is_completed()),
                    completed_at: record.and_then(|r| r.completion_time()),
                }
            })
            .collect();

        let done = per_lesson.iter().filter(|s| s.completed).count();
        let aggregate = calculate(per_lesson.len() as u64, done as u64);

        Self {
            enrollment_id,
            per_lesson,
            aggregate,
        }
    }
}

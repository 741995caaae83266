use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, EnrollmentId, UserId};
use crate::progress::{AggregateProgress, Progress};

/// A student's participation in a course, carrying derived aggregate progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    id: EnrollmentId,
    student_id: UserId,
    course_id: CourseId,
    enrolled_at: DateTime<Utc>,
    progress: Progress,
    completed: bool,
}

impl Enrollment {
    /// A freshly created enrollment: no progress, not completed.
    #[must_use]
    pub fn new(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            enrolled_at,
            progress: Progress::ZERO,
            completed: false,
        }
    }

    /// Rehydrate an enrollment from storage.
    #[must_use]
    pub fn from_persisted(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        enrolled_at: DateTime<Utc>,
        progress: Progress,
        completed: bool,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            enrolled_at,
            progress,
            completed,
        }
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> UserId {
        self.student_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn aggregate(&self) -> AggregateProgress {
        AggregateProgress {
            progress: self.progress,
            completed: self.completed,
        }
    }

    /// Overwrite the derived fields with a freshly calculated aggregate.
    pub fn apply_aggregate(&mut self, aggregate: AggregateProgress) {
        self.progress = aggregate.progress;
        self.completed = aggregate.completed;
    }
}

/// Whether `enroll` created a row or found an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Created,
    AlreadyEnrolled,
}

/// Outcome of an enrollment request. Enrolling twice is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResult {
    pub status: EnrollmentStatus,
    pub enrollment: Enrollment,
}

impl EnrollmentResult {
    #[must_use]
    pub fn created(enrollment: Enrollment) -> Self {
        Self {
            status: EnrollmentStatus::Created,
            enrollment,
        }
    }

    #[must_use]
    pub fn already_enrolled(enrollment: Enrollment) -> Self {
        Self {
            status: EnrollmentStatus::AlreadyEnrolled,
            enrollment,
        }
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.status == EnrollmentStatus::Created
    }
}

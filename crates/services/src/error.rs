//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{CourseError, CourseId, EnrollmentId, LessonId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `EnrollmentService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("course {0} does not exist")]
    CourseNotFound(CourseId),
    #[error("not enrolled in course {0}")]
    NotEnrolled(CourseId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("enrollment {0} does not exist")]
    EnrollmentNotFound(EnrollmentId),
    #[error("not enrolled in course {0}")]
    NotEnrolled(CourseId),
    #[error("lesson {0} does not exist")]
    LessonNotFound(LessonId),
    #[error("lesson {lesson} does not belong to course {course}")]
    LessonNotInCourse { lesson: LessonId, course: CourseId },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("course {0} does not exist")]
    CourseNotFound(CourseId),
    #[error("lesson {0} does not exist")]
    LessonNotFound(LessonId),
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

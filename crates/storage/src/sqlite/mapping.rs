use chrono::{DateTime, Utc};
use course_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Identity, Lesson, LessonId, LessonProgress,
    LessonProgressId, Role, UserId,
};
use course_core::progress::Progress;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, turning constraint violations into `Conflict`.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StorageError::Conflict
        }
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_column(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    let v: i64 = row.try_get(field).map_err(ser)?;
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn bool_column(row: &SqliteRow, field: &'static str) -> Result<bool, StorageError> {
    Ok(row.try_get::<i64, _>(field).map_err(ser)? != 0)
}

pub(crate) fn user_id(row: &SqliteRow, field: &'static str) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64(field, row.try_get(field).map_err(ser)?)?))
}

pub(crate) fn course_id(row: &SqliteRow, field: &'static str) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64(field, row.try_get(field).map_err(ser)?)?))
}

pub(crate) fn lesson_id(row: &SqliteRow, field: &'static str) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64(field, row.try_get(field).map_err(ser)?)?))
}

pub(crate) fn enrollment_id(
    row: &SqliteRow,
    field: &'static str,
) -> Result<EnrollmentId, StorageError> {
    Ok(EnrollmentId::new(i64_to_u64(
        field,
        row.try_get(field).map_err(ser)?,
    )?))
}

pub(crate) fn rowid<T>(v: i64, make: fn(u64) -> T) -> Result<T, StorageError> {
    Ok(make(i64_to_u64("rowid", v)?))
}

pub(crate) fn count(row: &SqliteRow, field: &'static str) -> Result<u64, StorageError> {
    i64_to_u64(field, row.try_get(field).map_err(ser)?)
}

pub(crate) fn map_identity_row(row: &SqliteRow) -> Result<Identity, StorageError> {
    let role: String = row.try_get("role").map_err(ser)?;
    let role: Role = role.parse().map_err(ser)?;
    Ok(Identity::new(user_id(row, "id")?, role))
}

pub(crate) fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    Course::new(
        course_id(row, "id")?,
        user_id(row, "instructor_id")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<Option<String>, _>("description").map_err(ser)?,
        bool_column(row, "is_published")?,
        row.try_get::<DateTime<Utc>, _>("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let duration = row
        .try_get::<Option<i64>, _>("duration_minutes")
        .map_err(ser)?
        .map(|d| {
            u32::try_from(d)
                .map_err(|_| StorageError::Serialization(format!("invalid duration_minutes: {d}")))
        })
        .transpose()?;

    Lesson::new(
        lesson_id(row, "id")?,
        course_id(row, "course_id")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        u32_column(row, "lesson_order")?,
        duration,
    )
    .map_err(ser)
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let progress = Progress::new(row.try_get::<i64, _>("progress").map_err(ser)?).map_err(ser)?;
    Ok(Enrollment::from_persisted(
        enrollment_id(row, "id")?,
        user_id(row, "student_id")?,
        course_id(row, "course_id")?,
        row.try_get("enrolled_at").map_err(ser)?,
        progress,
        bool_column(row, "completed")?,
    ))
}

pub(crate) fn map_lesson_progress_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    Ok(LessonProgress::from_persisted(
        LessonProgressId::new(i64_to_u64("id", row.try_get("id").map_err(ser)?)?),
        enrollment_id(row, "enrollment_id")?,
        lesson_id(row, "lesson_id")?,
        bool_column(row, "completed")?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at")
            .map_err(ser)?,
        i64_to_u64("time_spent", row.try_get("time_spent").map_err(ser)?)?,
    ))
}

use chrono::{DateTime, Utc};
use course_core::model::{EnrollmentId, LessonId, LessonProgress};
use course_core::progress::{AggregateProgress, ProgressCounts};
use sqlx::{Sqlite, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{count, db_err, id_i64, map_lesson_progress_row};
use crate::repository::{CompletionRecord, LessonProgressRepository, StorageError};

const PROGRESS_COLUMNS: &str =
    "id, enrollment_id, lesson_id, completed, completed_at, time_spent";

/// Lesson total of the enrollment's course and completed records for lessons
/// still in that course. `None` when the enrollment does not exist.
async fn counts_for<'e, E>(exec: E, enrollment: i64) -> Result<Option<ProgressCounts>, StorageError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r"
        SELECT
            (SELECT COUNT(*) FROM lessons l WHERE l.course_id = e.course_id) AS total_lessons,
            (SELECT COUNT(*)
               FROM lesson_progress lp
               JOIN lessons l ON l.id = lp.lesson_id
              WHERE lp.enrollment_id = e.id
                AND lp.completed = 1
                AND l.course_id = e.course_id) AS completed_lessons
        FROM enrollments e
        WHERE e.id = ?1
        ",
    )
    .bind(enrollment)
    .fetch_optional(exec)
    .await
    .map_err(db_err)?;

    row.map(|row| {
        Ok(ProgressCounts::new(
            count(&row, "total_lessons")?,
            count(&row, "completed_lessons")?,
        ))
    })
    .transpose()
}

async fn fetch_progress(
    conn: &mut SqliteConnection,
    enrollment: i64,
    lesson: i64,
) -> Result<LessonProgress, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE enrollment_id = ?1 AND lesson_id = ?2"
    ))
    .bind(enrollment)
    .bind(lesson)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)?;

    map_lesson_progress_row(&row)
}

async fn write_aggregate(
    conn: &mut SqliteConnection,
    enrollment: i64,
    aggregate: AggregateProgress,
) -> Result<u64, StorageError> {
    let res = sqlx::query("UPDATE enrollments SET progress = ?2, completed = ?3 WHERE id = ?1")
        .bind(enrollment)
        .bind(i64::from(aggregate.progress))
        .bind(i64::from(aggregate.completed))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(res.rows_affected())
}

/// Foreign-key failures on lesson progress writes mean the enrollment or
/// lesson disappeared.
fn missing_parent(e: sqlx::Error) -> StorageError {
    match db_err(e) {
        StorageError::Conflict => StorageError::NotFound,
        other => other,
    }
}

#[async_trait::async_trait]
impl LessonProgressRepository for SqliteRepository {
    async fn progress_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE enrollment_id = ?1 ORDER BY id ASC"
        ))
        .bind(id_i64("enrollment_id", enrollment.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_lesson_progress_row).collect()
    }

    async fn progress_counts(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<ProgressCounts, StorageError> {
        counts_for(&self.pool, id_i64("enrollment_id", enrollment.value())?)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn record_completion(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionRecord, StorageError> {
        let enrollment_id = id_i64("enrollment_id", enrollment.value())?;
        let lesson_id = id_i64("lesson_id", lesson.value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Write first so the transaction holds the write lock before it reads.
        // A completed record is left untouched, keeping its first timestamp.
        let updated = sqlx::query(
            r"
            UPDATE lesson_progress
               SET completed = 1, completed_at = ?3
             WHERE enrollment_id = ?1 AND lesson_id = ?2 AND completed = 0
            ",
        )
        .bind(enrollment_id)
        .bind(lesson_id)
        .bind(completed_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        let (newly_completed, backfilled) = if updated > 0 {
            (true, false)
        } else {
            // No pending record: either none exists yet (lesson added after
            // enrollment) or it is already completed.
            let inserted = sqlx::query(
                r"
                INSERT INTO lesson_progress (enrollment_id, lesson_id, completed, completed_at, time_spent)
                VALUES (?1, ?2, 1, ?3, 0)
                ON CONFLICT(enrollment_id, lesson_id) DO NOTHING
                ",
            )
            .bind(enrollment_id)
            .bind(lesson_id)
            .bind(completed_at)
            .execute(&mut *tx)
            .await
            .map_err(missing_parent)?
            .rows_affected();
            (inserted > 0, inserted > 0)
        };

        let record = fetch_progress(&mut tx, enrollment_id, lesson_id).await?;

        let aggregate = counts_for(&mut *tx, enrollment_id)
            .await?
            .ok_or(StorageError::NotFound)?
            .aggregate();
        write_aggregate(&mut tx, enrollment_id, aggregate).await?;

        tx.commit().await.map_err(db_err)?;

        if backfilled {
            tracing::debug!(%enrollment, %lesson, "backfilled lesson progress on completion");
        }

        Ok(CompletionRecord {
            lesson_progress: record,
            newly_completed,
            backfilled,
            aggregate,
        })
    }

    async fn add_time_spent(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        secs: u64,
    ) -> Result<LessonProgress, StorageError> {
        let enrollment_id = id_i64("enrollment_id", enrollment.value())?;
        let lesson_id = id_i64("lesson_id", lesson.value())?;
        // Stored as INTEGER, so the total saturates at i64::MAX.
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO lesson_progress (enrollment_id, lesson_id, completed, completed_at, time_spent)
            VALUES (?1, ?2, 0, NULL, ?3)
            ON CONFLICT(enrollment_id, lesson_id) DO UPDATE SET
                time_spent = CASE
                    WHEN lesson_progress.time_spent > 9223372036854775807 - excluded.time_spent
                        THEN 9223372036854775807
                    ELSE lesson_progress.time_spent + excluded.time_spent
                END
            ",
        )
        .bind(enrollment_id)
        .bind(lesson_id)
        .bind(secs)
        .execute(&mut *tx)
        .await
        .map_err(missing_parent)?;

        let record = fetch_progress(&mut tx, enrollment_id, lesson_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn store_aggregate(
        &self,
        enrollment: EnrollmentId,
        aggregate: AggregateProgress,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let affected = write_aggregate(
            &mut conn,
            id_i64("enrollment_id", enrollment.value())?,
            aggregate,
        )
        .await?;
        if affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

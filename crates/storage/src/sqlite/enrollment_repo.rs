use course_core::model::{CourseId, Enrollment, EnrollmentId, UserId};

use super::SqliteRepository;
use super::mapping::{count, db_err, id_i64, map_enrollment_row};
use crate::repository::{
    EnrollmentInsert, EnrollmentRepository, NewEnrollmentRecord, StorageError,
};

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, enrolled_at, progress, completed";

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn create_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<EnrollmentInsert, StorageError> {
        let student = id_i64("student_id", enrollment.student_id.value())?;
        let course = id_i64("course_id", enrollment.course_id.value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The unique (student_id, course_id) constraint decides races: the loser
        // inserts nothing and reads the winner's row below.
        let res = sqlx::query(
            r"
            INSERT INTO enrollments (student_id, course_id, enrolled_at, progress, completed)
            VALUES (?1, ?2, ?3, 0, 0)
            ON CONFLICT(student_id, course_id) DO NOTHING
            ",
        )
        .bind(student)
        .bind(course)
        .bind(enrollment.enrolled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match db_err(e) {
            // only the student/course foreign keys can fail here
            StorageError::Conflict => StorageError::NotFound,
            other => other,
        })?;

        if res.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            let existing = self
                .find_enrollment(enrollment.student_id, enrollment.course_id)
                .await?
                .ok_or(StorageError::NotFound)?;
            tracing::debug!(
                enrollment = %existing.id(),
                student = %enrollment.student_id,
                course = %enrollment.course_id,
                "enrollment already exists"
            );
            return Ok(EnrollmentInsert::Existing(existing));
        }

        let enrollment_id = res.last_insert_rowid();

        let seeded = sqlx::query(
            r"
            INSERT INTO lesson_progress (enrollment_id, lesson_id, completed, completed_at, time_spent)
            SELECT ?1, id, 0, NULL, 0
            FROM lessons
            WHERE course_id = ?2
            ON CONFLICT(enrollment_id, lesson_id) DO NOTHING
            ",
        )
        .bind(enrollment_id)
        .bind(course)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?1"
        ))
        .bind(enrollment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let created = map_enrollment_row(&row)?;

        tx.commit().await.map_err(db_err)?;

        Ok(EnrollmentInsert::Created {
            enrollment: created,
            seeded_lessons: seeded.rows_affected(),
        })
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?1"
        ))
        .bind(id_i64("enrollment_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn find_enrollment(
        &self,
        student: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ?1 AND course_id = ?2"
        ))
        .bind(id_i64("student_id", student.value())?)
        .bind(id_i64("course_id", course.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn enrollments_for_student(
        &self,
        student: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ?1 ORDER BY enrolled_at ASC, id ASC"
        ))
        .bind(id_i64("student_id", student.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_enrollment_row).collect()
    }

    async fn count_for_course(&self, course: CourseId) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM enrollments WHERE course_id = ?1")
            .bind(id_i64("course_id", course.value())?)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        count(&row, "n")
    }

    async fn delete_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM enrollments WHERE id = ?1")
            .bind(id_i64("enrollment_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}


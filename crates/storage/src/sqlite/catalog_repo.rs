use course_core::model::{Course, CourseId, Lesson, LessonId};

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_course_row, map_lesson_row, rowid};
use crate::repository::{CatalogRepository, NewCourseRecord, NewLessonRecord, StorageError};

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO courses (instructor_id, title, description, is_published, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("instructor_id", course.instructor_id.value())?)
        .bind(course.title)
        .bind(course.description)
        .bind(i64::from(course.is_published))
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        rowid(res.last_insert_rowid(), CourseId::new)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, instructor_id, title, description, is_published, created_at
            FROM courses WHERE id = ?1
            ",
        )
        .bind(id_i64("course_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_course_row).transpose()
    }

    async fn set_published(&self, id: CourseId, published: bool) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE courses SET is_published = ?2 WHERE id = ?1")
            .bind(id_i64("course_id", id.value())?)
            .bind(i64::from(published))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<Lesson, StorageError> {
        let course_id = id_i64("course_id", lesson.course_id.value())?;

        // The order is computed inside the INSERT so two appends cannot read the
        // same "last order".
        let res = sqlx::query(
            r"
            INSERT INTO lessons (course_id, title, lesson_order, duration_minutes, created_at)
            SELECT ?1, ?2,
                   COALESCE(?3, (SELECT COALESCE(MAX(lesson_order), 0) + 1
                                 FROM lessons WHERE course_id = ?1)),
                   ?4, ?5
            WHERE EXISTS (SELECT 1 FROM courses WHERE id = ?1)
            ",
        )
        .bind(course_id)
        .bind(lesson.title)
        .bind(lesson.order.map(i64::from))
        .bind(lesson.duration_minutes.map(i64::from))
        .bind(lesson.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let id = rowid(res.last_insert_rowid(), LessonId::new)?;
        self.get_lesson(id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, course_id, title, lesson_order, duration_minutes
            FROM lessons WHERE id = ?1
            ",
        )
        .bind(id_i64("lesson_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn lessons_for_course(&self, course: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, course_id, title, lesson_order, duration_minutes
            FROM lessons
            WHERE course_id = ?1
            ORDER BY lesson_order ASC, id ASC
            ",
        )
        .bind(id_i64("course_id", course.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_lesson_row).collect()
    }

    async fn delete_lesson(&self, id: LessonId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(id_i64("lesson_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM courses WHERE id = ?1")
            .bind(id_i64("course_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        tracing::debug!(course = %id, "deleted course with lessons and enrollments");
        Ok(())
    }
}

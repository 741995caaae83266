use course_core::model::{Identity, UserId};

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_identity_row, rowid};
use crate::repository::{IdentityRepository, NewUserRecord, StorageError};

#[async_trait::async_trait]
impl IdentityRepository for SqliteRepository {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO users (username, email, role, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        rowid(res.last_insert_rowid(), UserId::new)
    }

    async fn get_identity(&self, id: UserId) -> Result<Option<Identity>, StorageError> {
        let row = sqlx::query("SELECT id, role FROM users WHERE id = ?1")
            .bind(id_i64("user_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_identity_row).transpose()
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StorageError> {
        // Enrollments and their lesson progress go with the student; a user who
        // still teaches a course trips the courses foreign key.
        let res = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id_i64("user_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        tracing::debug!(user = %id, "deleted user with enrollments");
        Ok(())
    }
}

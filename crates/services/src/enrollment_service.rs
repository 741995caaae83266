use std::sync::Arc;

use course_core::model::{CourseId, Enrollment, EnrollmentResult, UserId};
use storage::repository::{
    CatalogRepository, EnrollmentInsert, EnrollmentRepository, NewEnrollmentRecord,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::EnrollmentError;

/// Maintains the student-course ledger.
///
/// Role and publication rules are not checked here; callers run
/// `course_core::access::authorize` first.
#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn CatalogRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            clock,
            catalog,
            enrollments,
        }
    }

    /// Enroll `student` in `course`, seeding a pending progress record for
    /// every lesson the course has right now.
    ///
    /// Enrolling twice is not an error: the second call returns the existing
    /// enrollment with status `AlreadyEnrolled`, also when it lost a race
    /// against a concurrent call.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::CourseNotFound` if the course does not exist.
    /// Returns `EnrollmentError::Storage` if persistence fails.
    pub async fn enroll(
        &self,
        student: UserId,
        course: CourseId,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        if self.catalog.get_course(course).await?.is_none() {
            return Err(EnrollmentError::CourseNotFound(course));
        }

        let insert = self
            .enrollments
            .create_enrollment(NewEnrollmentRecord {
                student_id: student,
                course_id: course,
                enrolled_at: self.clock.now(),
            })
            .await?;

        Ok(match insert {
            EnrollmentInsert::Created {
                enrollment,
                seeded_lessons,
            } => {
                info!(
                    enrollment = %enrollment.id(),
                    %student,
                    %course,
                    seeded_lessons,
                    "enrollment created"
                );
                EnrollmentResult::created(enrollment)
            }
            EnrollmentInsert::Existing(enrollment) => {
                debug!(enrollment = %enrollment.id(), %student, %course, "already enrolled");
                EnrollmentResult::already_enrolled(enrollment)
            }
        })
    }

    /// Fetch the enrollment of `student` in `course`, if any.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Storage` if repository access fails.
    pub async fn find(
        &self,
        student: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, EnrollmentError> {
        Ok(self.enrollments.find_enrollment(student, course).await?)
    }

    /// All enrollments of a student, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Storage` if repository access fails.
    pub async fn enrollments_for_student(
        &self,
        student: UserId,
    ) -> Result<Vec<Enrollment>, EnrollmentError> {
        Ok(self.enrollments.enrollments_for_student(student).await?)
    }

    /// Number of students enrolled in `course`.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Storage` if repository access fails.
    pub async fn student_count(&self, course: CourseId) -> Result<u64, EnrollmentError> {
        Ok(self.enrollments.count_for_course(course).await?)
    }

    /// Remove the enrollment of `student` in `course` together with its
    /// lesson progress.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::NotEnrolled` if there is nothing to remove.
    /// Returns `EnrollmentError::Storage` if persistence fails.
    pub async fn unenroll(&self, student: UserId, course: CourseId) -> Result<(), EnrollmentError> {
        let enrollment = self
            .enrollments
            .find_enrollment(student, course)
            .await?
            .ok_or(EnrollmentError::NotEnrolled(course))?;
        self.enrollments.delete_enrollment(enrollment.id()).await?;
        info!(enrollment = %enrollment.id(), %student, %course, "enrollment removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{EnrollmentStatus, Role};
    use course_core::time::fixed_now;
    use storage::repository::{
        IdentityRepository, InMemoryRepository, LessonProgressRepository, NewCourseRecord,
        NewLessonRecord, NewUserRecord,
    };

    async fn setup(lessons: u32) -> (InMemoryRepository, EnrollmentService, UserId, CourseId) {
        let repo = InMemoryRepository::new();
        let instructor = repo
            .insert_user(NewUserRecord {
                username: "ada".into(),
                email: "ada@example.com".into(),
                role: Role::Instructor,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        let student = repo
            .insert_user(NewUserRecord {
                username: "alan".into(),
                email: "alan@example.com".into(),
                role: Role::Student,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        let course = repo
            .insert_course(NewCourseRecord {
                instructor_id: instructor,
                title: "Compilers".into(),
                description: None,
                is_published: true,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        for i in 0..lessons {
            repo.insert_lesson(NewLessonRecord {
                course_id: course,
                title: format!("Lesson {i}"),
                order: None,
                duration_minutes: None,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        }

        let service = EnrollmentService::new(
            Clock::fixed(fixed_now()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        (repo, service, student, course)
    }

    #[tokio::test]
    async fn enroll_twice_reports_already_enrolled() {
        let (repo, service, student, course) = setup(3).await;

        let first = service.enroll(student, course).await.unwrap();
        assert_eq!(first.status, EnrollmentStatus::Created);
        assert_eq!(first.enrollment.progress().value(), 0);
        assert_eq!(first.enrollment.enrolled_at(), fixed_now());

        let second = service.enroll(student, course).await.unwrap();
        assert_eq!(second.status, EnrollmentStatus::AlreadyEnrolled);
        assert_eq!(second.enrollment, first.enrollment);

        assert_eq!(service.student_count(course).await.unwrap(), 1);
        let seeded = repo
            .progress_for_enrollment(first.enrollment.id())
            .await
            .unwrap();
        assert_eq!(seeded.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_enrollments_create_one_row() {
        let (_repo, service, student, course) = setup(2).await;

        let (a, b) = tokio::join!(service.enroll(student, course), service.enroll(student, course));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.enrollment.id(), b.enrollment.id());
        assert_eq!(u8::from(a.is_created()) + u8::from(b.is_created()), 1);
        assert_eq!(service.student_count(course).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enroll_in_missing_course_fails() {
        let (_repo, service, student, _course) = setup(0).await;
        let err = service.enroll(student, CourseId::new(99)).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::CourseNotFound(c) if c == CourseId::new(99)));
    }

    #[tokio::test]
    async fn unenroll_removes_enrollment() {
        let (_repo, service, student, course) = setup(1).await;
        service.enroll(student, course).await.unwrap();

        service.unenroll(student, course).await.unwrap();
        assert!(service.find(student, course).await.unwrap().is_none());
        assert!(service.enrollments_for_student(student).await.unwrap().is_empty());

        let err = service.unenroll(student, course).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::NotEnrolled(_)));
    }
}

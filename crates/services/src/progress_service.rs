use std::sync::Arc;

use chrono::{DateTime, Utc};
use course_core::model::{
    CourseProgress, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress, UserId,
};
use course_core::progress::AggregateProgress;
use serde::{Deserialize, Serialize};
use storage::repository::{
    CatalogRepository, EnrollmentRepository, LessonProgressRepository, StorageError,
};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::ProgressError;

/// Outcome of a lesson completion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonCompletion {
    pub enrollment_id: EnrollmentId,
    pub lesson_id: LessonId,
    /// `false` when the lesson had already been completed.
    pub newly_completed: bool,
    /// First completion time; later events never move it.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub aggregate: AggregateProgress,
}

/// Records lesson completion and keeps enrollment progress in step with it.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    lesson_progress: Arc<dyn LessonProgressRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn CatalogRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        lesson_progress: Arc<dyn LessonProgressRepository>,
    ) -> Self {
        Self {
            clock,
            catalog,
            enrollments,
            lesson_progress,
        }
    }

    /// Mark `lesson` complete for `enrollment` and recompute the enrollment's
    /// aggregate progress in the same transaction.
    ///
    /// A lesson added to the course after enrollment gets its progress record
    /// on this first completion. Completing a lesson again is a no-op that
    /// keeps the original timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EnrollmentNotFound` or
    /// `ProgressError::LessonNotFound` for unknown ids.
    /// Returns `ProgressError::LessonNotInCourse` if the lesson belongs to a
    /// different course than the enrollment.
    /// Returns `ProgressError::Storage` if persistence fails.
    pub async fn mark_lesson_complete(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
    ) -> Result<LessonCompletion, ProgressError> {
        let enrollment = self.enrollment(enrollment).await?;
        let lesson = self.lesson(lesson).await?;
        ensure_same_course(&enrollment, &lesson)?;
        self.complete(&enrollment, &lesson).await
    }

    /// Complete `lesson` for `student`, resolving the enrollment through the
    /// lesson's course.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotEnrolled` if the student holds no enrollment
    /// in the lesson's course.
    /// Returns `ProgressError::LessonNotFound` if the lesson does not exist.
    /// Returns `ProgressError::Storage` if persistence fails.
    pub async fn complete_lesson_for_student(
        &self,
        student: UserId,
        lesson: LessonId,
    ) -> Result<LessonCompletion, ProgressError> {
        let (enrollment, lesson) = self.enrollment_for_lesson(student, lesson).await?;
        self.complete(&enrollment, &lesson).await
    }

    /// Look up the lesson and the student's enrollment in its course.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::LessonNotFound` if the lesson does not exist.
    /// Returns `ProgressError::NotEnrolled` if the student is not enrolled.
    /// Returns `ProgressError::Storage` if repository access fails.
    pub async fn enrollment_for_lesson(
        &self,
        student: UserId,
        lesson: LessonId,
    ) -> Result<(Enrollment, Lesson), ProgressError> {
        let lesson = self.lesson(lesson).await?;
        let enrollment = self
            .enrollments
            .find_enrollment(student, lesson.course_id())
            .await?
            .ok_or(ProgressError::NotEnrolled(lesson.course_id()))?;
        Ok((enrollment, lesson))
    }

    /// Add `secs` to the time spent on `lesson`. Completion state is untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Self::mark_lesson_complete`].
    pub async fn record_time_spent(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        secs: u64,
    ) -> Result<LessonProgress, ProgressError> {
        let enrollment = self.enrollment(enrollment).await?;
        let lesson = self.lesson(lesson).await?;
        ensure_same_course(&enrollment, &lesson)?;

        let record = self
            .lesson_progress
            .add_time_spent(enrollment.id(), lesson.id(), secs)
            .await?;
        debug!(
            enrollment = %enrollment.id(),
            lesson = %lesson.id(),
            secs,
            total_secs = record.time_spent_secs(),
            "time spent recorded"
        );
        Ok(record)
    }

    /// Aggregate progress against the course's current lesson count. Reads
    /// only; the stored figures are left as they are.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EnrollmentNotFound` for an unknown enrollment.
    /// Returns `ProgressError::Storage` if repository access fails.
    pub async fn calculate(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<AggregateProgress, ProgressError> {
        match self.lesson_progress.progress_counts(enrollment).await {
            Ok(counts) => Ok(counts.aggregate()),
            Err(StorageError::NotFound) => Err(ProgressError::EnrollmentNotFound(enrollment)),
            Err(e) => Err(e.into()),
        }
    }

    /// Recalculate and persist the aggregate, e.g. after lessons were added to
    /// or removed from the course.
    ///
    /// # Errors
    ///
    /// Same as [`Self::calculate`].
    pub async fn refresh(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<AggregateProgress, ProgressError> {
        let aggregate = self.calculate(enrollment).await?;
        match self.lesson_progress.store_aggregate(enrollment, aggregate).await {
            Ok(()) => {}
            Err(StorageError::NotFound) => {
                return Err(ProgressError::EnrollmentNotFound(enrollment));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(%enrollment, progress = %aggregate.progress, "progress refreshed");
        Ok(aggregate)
    }

    /// Per-lesson completion in course order plus a freshly calculated
    /// aggregate.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EnrollmentNotFound` for an unknown enrollment.
    /// Returns `ProgressError::Storage` if repository access fails.
    pub async fn course_progress(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<CourseProgress, ProgressError> {
        let enrollment = self.enrollment(enrollment).await?;
        let lessons = self
            .catalog
            .lessons_for_course(enrollment.course_id())
            .await?;
        let records = self
            .lesson_progress
            .progress_for_enrollment(enrollment.id())
            .await?;
        Ok(CourseProgress::assemble(enrollment.id(), &lessons, &records))
    }

    async fn complete(
        &self,
        enrollment: &Enrollment,
        lesson: &Lesson,
    ) -> Result<LessonCompletion, ProgressError> {
        let record = self
            .lesson_progress
            .record_completion(enrollment.id(), lesson.id(), self.clock.now())
            .await?;

        if record.newly_completed {
            info!(
                enrollment = %enrollment.id(),
                lesson = %lesson.id(),
                backfilled = record.backfilled,
                progress = %record.aggregate.progress,
                "lesson completed"
            );
            if record.aggregate.completed {
                info!(
                    enrollment = %enrollment.id(),
                    course = %enrollment.course_id(),
                    "course completed"
                );
            }
        }

        Ok(LessonCompletion {
            enrollment_id: enrollment.id(),
            lesson_id: lesson.id(),
            newly_completed: record.newly_completed,
            completed_at: record.lesson_progress.completion_time(),
            aggregate: record.aggregate,
        })
    }

    async fn enrollment(&self, id: EnrollmentId) -> Result<Enrollment, ProgressError> {
        self.enrollments
            .get_enrollment(id)
            .await?
            .ok_or(ProgressError::EnrollmentNotFound(id))
    }

    async fn lesson(&self, id: LessonId) -> Result<Lesson, ProgressError> {
        self.catalog
            .get_lesson(id)
            .await?
            .ok_or(ProgressError::LessonNotFound(id))
    }
}

fn ensure_same_course(enrollment: &Enrollment, lesson: &Lesson) -> Result<(), ProgressError> {
    if lesson.course_id() == enrollment.course_id() {
        return Ok(());
    }
    warn!(
        enrollment = %enrollment.id(),
        lesson = %lesson.id(),
        lesson_course = %lesson.course_id(),
        enrollment_course = %enrollment.course_id(),
        "lesson does not belong to the enrollment's course"
    );
    Err(ProgressError::LessonNotInCourse {
        lesson: lesson.id(),
        course: enrollment.course_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use course_core::model::{CourseId, Role};
    use course_core::time::fixed_now;
    use storage::repository::{
        IdentityRepository, InMemoryRepository, NewCourseRecord, NewEnrollmentRecord,
        NewLessonRecord, NewUserRecord,
    };

    struct Fixture {
        repo: InMemoryRepository,
        student: UserId,
        instructor: UserId,
        course: CourseId,
        lessons: Vec<LessonId>,
        enrollment: EnrollmentId,
    }

    impl Fixture {
        async fn new(lessons: u32) -> Self {
            let repo = InMemoryRepository::new();
            let instructor = user(&repo, "barbara", Role::Instructor).await;
            let student = user(&repo, "dennis", Role::Student).await;
            let course = course(&repo, instructor).await;
            let mut ids = Vec::new();
            for _ in 0..lessons {
                ids.push(add_lesson(&repo, course).await);
            }
            let enrollment = repo
                .create_enrollment(NewEnrollmentRecord {
                    student_id: student,
                    course_id: course,
                    enrolled_at: fixed_now(),
                })
                .await
                .unwrap()
                .enrollment()
                .id();
            Self {
                repo,
                student,
                instructor,
                course,
                lessons: ids,
                enrollment,
            }
        }

        fn service(&self, clock: Clock) -> ProgressService {
            ProgressService::new(
                clock,
                Arc::new(self.repo.clone()),
                Arc::new(self.repo.clone()),
                Arc::new(self.repo.clone()),
            )
        }
    }

    async fn user(repo: &InMemoryRepository, name: &str, role: Role) -> UserId {
        repo.insert_user(NewUserRecord {
            username: name.into(),
            email: format!("{name}@example.com"),
            role,
            created_at: fixed_now(),
        })
        .await
        .unwrap()
    }

    async fn course(repo: &InMemoryRepository, instructor: UserId) -> CourseId {
        repo.insert_course(NewCourseRecord {
            instructor_id: instructor,
            title: "Operating Systems".into(),
            description: None,
            is_published: true,
            created_at: fixed_now(),
        })
        .await
        .unwrap()
    }

    async fn add_lesson(repo: &InMemoryRepository, course: CourseId) -> LessonId {
        repo.insert_lesson(NewLessonRecord {
            course_id: course,
            title: "Lesson".into(),
            order: None,
            duration_minutes: Some(10),
            created_at: fixed_now(),
        })
        .await
        .unwrap()
        .id()
    }

    #[tokio::test]
    async fn three_lesson_course_walks_through_truncated_percentages() {
        let fx = Fixture::new(3).await;
        let service = fx.service(Clock::fixed(fixed_now()));

        let mut seen = Vec::new();
        for lesson in &fx.lessons {
            let done = service
                .mark_lesson_complete(fx.enrollment, *lesson)
                .await
                .unwrap();
            assert!(done.newly_completed);
            seen.push((done.aggregate.progress.value(), done.aggregate.completed));
        }
        assert_eq!(seen, vec![(33, false), (66, false), (100, true)]);

        let stored = fx.repo.get_enrollment(fx.enrollment).await.unwrap().unwrap();
        assert_eq!(stored.progress().value(), 100);
        assert!(stored.is_completed());
    }

    #[tokio::test]
    async fn repeated_completion_keeps_first_timestamp() {
        let fx = Fixture::new(2).await;
        let mut clock = Clock::fixed(fixed_now());

        let first = fx
            .service(clock)
            .mark_lesson_complete(fx.enrollment, fx.lessons[0])
            .await
            .unwrap();
        clock.advance(Duration::minutes(30));
        let second = fx
            .service(clock)
            .mark_lesson_complete(fx.enrollment, fx.lessons[0])
            .await
            .unwrap();

        assert!(!second.newly_completed);
        assert_eq!(second.completed_at, Some(fixed_now()));
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.aggregate, first.aggregate);
    }

    #[tokio::test]
    async fn lesson_added_after_enrollment_is_backfilled() {
        let fx = Fixture::new(1).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        let late = add_lesson(&fx.repo, fx.course).await;

        let before = fx.repo.progress_for_enrollment(fx.enrollment).await.unwrap();
        assert_eq!(before.len(), 1);

        let done = service.mark_lesson_complete(fx.enrollment, late).await.unwrap();
        assert!(done.newly_completed);
        assert_eq!(done.aggregate.progress.value(), 50);

        let after = fx.repo.progress_for_enrollment(fx.enrollment).await.unwrap();
        assert_eq!(after.iter().filter(|r| r.lesson_id() == late).count(), 1);
    }

    #[tokio::test]
    async fn adding_a_lesson_lowers_recalculated_progress() {
        let fx = Fixture::new(2).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        for lesson in &fx.lessons {
            service.mark_lesson_complete(fx.enrollment, *lesson).await.unwrap();
        }
        assert!(service.calculate(fx.enrollment).await.unwrap().completed);

        add_lesson(&fx.repo, fx.course).await;
        let recalculated = service.calculate(fx.enrollment).await.unwrap();
        assert_eq!(recalculated.progress.value(), 66);
        assert!(!recalculated.completed);

        let stored = fx.repo.get_enrollment(fx.enrollment).await.unwrap().unwrap();
        assert!(stored.is_completed());

        let refreshed = service.refresh(fx.enrollment).await.unwrap();
        assert_eq!(refreshed, recalculated);
        let stored = fx.repo.get_enrollment(fx.enrollment).await.unwrap().unwrap();
        assert!(!stored.is_completed());
        assert_eq!(stored.progress().value(), 66);
    }

    #[tokio::test]
    async fn zero_lesson_course_reports_zero() {
        let fx = Fixture::new(0).await;
        let service = fx.service(Clock::fixed(fixed_now()));

        let aggregate = service.calculate(fx.enrollment).await.unwrap();
        assert_eq!(aggregate.progress.value(), 0);
        assert!(!aggregate.completed);

        let view = service.course_progress(fx.enrollment).await.unwrap();
        assert!(view.per_lesson.is_empty());
        assert_eq!(view.aggregate, aggregate);
    }

    #[tokio::test]
    async fn lesson_from_another_course_is_rejected() {
        let fx = Fixture::new(1).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        let other_course = course(&fx.repo, fx.instructor).await;
        let foreign = add_lesson(&fx.repo, other_course).await;

        let err = service
            .mark_lesson_complete(fx.enrollment, foreign)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressError::LessonNotInCourse { lesson, course }
                if lesson == foreign && course == fx.course
        ));

        let err = service
            .record_time_spent(fx.enrollment, foreign, 60)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::LessonNotInCourse { .. }));
    }

    #[tokio::test]
    async fn student_without_enrollment_is_not_enrolled() {
        let fx = Fixture::new(1).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        let other_course = course(&fx.repo, fx.instructor).await;
        let lesson = add_lesson(&fx.repo, other_course).await;

        let err = service
            .complete_lesson_for_student(fx.student, lesson)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotEnrolled(c) if c == other_course));

        let err = service
            .complete_lesson_for_student(fx.student, LessonId::new(999))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::LessonNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_enrollment_is_reported() {
        let fx = Fixture::new(1).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        let missing = EnrollmentId::new(404);

        assert!(matches!(
            service.mark_lesson_complete(missing, fx.lessons[0]).await,
            Err(ProgressError::EnrollmentNotFound(_))
        ));
        assert!(matches!(
            service.calculate(missing).await,
            Err(ProgressError::EnrollmentNotFound(_))
        ));
        assert!(matches!(
            service.course_progress(missing).await,
            Err(ProgressError::EnrollmentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn time_spent_accumulates_without_completing() {
        let fx = Fixture::new(1).await;
        let service = fx.service(Clock::fixed(fixed_now()));

        service
            .record_time_spent(fx.enrollment, fx.lessons[0], 120)
            .await
            .unwrap();
        let record = service
            .record_time_spent(fx.enrollment, fx.lessons[0], 45)
            .await
            .unwrap();
        assert_eq!(record.time_spent_secs(), 165);
        assert!(!record.is_completed());
        assert_eq!(service.calculate(fx.enrollment).await.unwrap().progress.value(), 0);
    }

    #[tokio::test]
    async fn course_progress_lists_lessons_in_order() {
        let fx = Fixture::new(3).await;
        let service = fx.service(Clock::fixed(fixed_now()));
        service
            .mark_lesson_complete(fx.enrollment, fx.lessons[1])
            .await
            .unwrap();

        let view = service.course_progress(fx.enrollment).await.unwrap();
        let lessons: Vec<LessonId> = view.per_lesson.iter().map(|s| s.lesson_id).collect();
        assert_eq!(lessons, fx.lessons);
        let completed: Vec<bool> = view.per_lesson.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![false, true, false]);
        assert_eq!(view.per_lesson[1].completed_at, Some(fixed_now()));
        assert_eq!(view.aggregate.progress.value(), 33);
    }
}

use std::sync::Arc;

use course_core::model::{Course, CourseId, Lesson, LessonId, LessonNavigation, UserId};
use storage::repository::{CatalogRepository, NewCourseRecord, NewLessonRecord, StorageError};
use tracing::info;

use crate::Clock;
use crate::error::CatalogError;

/// Lesson to append to a course.
#[derive(Debug, Clone)]
pub struct NewLesson {
    pub course_id: CourseId,
    pub title: String,
    pub duration_minutes: Option<u32>,
}

/// Minimal catalog surface: courses and their ordered lessons.
#[derive(Clone)]
pub struct CatalogService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
}

impl CatalogService {
    #[must_use]
    pub fn new(clock: Clock, catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { clock, catalog }
    }

    /// Create a course owned by `instructor`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Course` for validation failures.
    /// Returns `CatalogError::Storage` if persistence fails.
    pub async fn create_course(
        &self,
        instructor: UserId,
        title: impl Into<String>,
        description: Option<String>,
        published: bool,
    ) -> Result<CourseId, CatalogError> {
        let course = Course::new(
            CourseId::new(1),
            instructor,
            title,
            description,
            published,
            self.clock.now(),
        )?;
        let id = self
            .catalog
            .insert_course(NewCourseRecord::from_course(&course))
            .await?;
        info!(course = %id, %instructor, published, "course created");
        Ok(id)
    }

    /// Fetch a course.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::CourseNotFound` if it does not exist.
    /// Returns `CatalogError::Storage` if repository access fails.
    pub async fn course(&self, id: CourseId) -> Result<Course, CatalogError> {
        self.catalog
            .get_course(id)
            .await?
            .ok_or(CatalogError::CourseNotFound(id))
    }

    /// Fetch a lesson.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::LessonNotFound` if it does not exist.
    /// Returns `CatalogError::Storage` if repository access fails.
    pub async fn lesson(&self, id: LessonId) -> Result<Lesson, CatalogError> {
        self.catalog
            .get_lesson(id)
            .await?
            .ok_or(CatalogError::LessonNotFound(id))
    }

    /// Lessons of a course in order.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if repository access fails.
    pub async fn lessons(&self, course: CourseId) -> Result<Vec<Lesson>, CatalogError> {
        Ok(self.catalog.lessons_for_course(course).await?)
    }

    /// Publish or unpublish a course.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::CourseNotFound` if the course does not exist.
    /// Returns `CatalogError::Storage` if persistence fails.
    pub async fn publish(&self, course: CourseId, published: bool) -> Result<(), CatalogError> {
        match self.catalog.set_published(course, published).await {
            Ok(()) => {
                info!(%course, published, "course publication changed");
                Ok(())
            }
            Err(StorageError::NotFound) => Err(CatalogError::CourseNotFound(course)),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a lesson after the course's current last lesson.
    ///
    /// Students already enrolled get no progress record for it until they
    /// complete it, and their stored progress is not lowered until the next
    /// completion or refresh.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Course` if the title is blank.
    /// Returns `CatalogError::CourseNotFound` if the course does not exist.
    /// Returns `CatalogError::Storage` if persistence fails.
    pub async fn add_lesson(&self, lesson: NewLesson) -> Result<Lesson, CatalogError> {
        // Validate with a placeholder id and order; storage assigns both.
        let draft = Lesson::new(
            LessonId::new(1),
            lesson.course_id,
            lesson.title,
            1,
            lesson.duration_minutes,
        )?;

        let created = self
            .catalog
            .insert_lesson(NewLessonRecord {
                course_id: draft.course_id(),
                title: draft.title().to_owned(),
                order: None,
                duration_minutes: draft.duration_minutes(),
                created_at: self.clock.now(),
            })
            .await
            .map_err(|e| match e {
                StorageError::NotFound => CatalogError::CourseNotFound(draft.course_id()),
                other => other.into(),
            })?;

        info!(
            course = %created.course_id(),
            lesson = %created.id(),
            order = created.order(),
            "lesson added"
        );
        Ok(created)
    }

    /// Previous and next lessons around `lesson` in course order.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::LessonNotFound` if the lesson does not exist.
    /// Returns `CatalogError::Storage` if repository access fails.
    pub async fn lesson_navigation(
        &self,
        lesson: LessonId,
    ) -> Result<LessonNavigation, CatalogError> {
        let current = self.lesson(lesson).await?;
        let ordered = self.catalog.lessons_for_course(current.course_id()).await?;
        LessonNavigation::locate(&ordered, lesson).ok_or(CatalogError::LessonNotFound(lesson))
    }

    /// Delete a lesson and every progress record pointing at it. Remaining
    /// lessons keep their order values.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::LessonNotFound` if the lesson does not exist.
    /// Returns `CatalogError::Storage` if persistence fails.
    pub async fn delete_lesson(&self, lesson: LessonId) -> Result<(), CatalogError> {
        match self.catalog.delete_lesson(lesson).await {
            Ok(()) => {
                info!(%lesson, "lesson deleted");
                Ok(())
            }
            Err(StorageError::NotFound) => Err(CatalogError::LessonNotFound(lesson)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{CourseError, Role};
    use course_core::time::fixed_now;
    use storage::repository::{IdentityRepository, InMemoryRepository, NewUserRecord};

    async fn setup() -> (CatalogService, UserId) {
        let repo = InMemoryRepository::new();
        let instructor = repo
            .insert_user(NewUserRecord {
                username: "edsger".into(),
                email: "edsger@example.com".into(),
                role: Role::Instructor,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        (
            CatalogService::new(Clock::fixed(fixed_now()), Arc::new(repo)),
            instructor,
        )
    }

    fn lesson(course: CourseId, title: &str) -> NewLesson {
        NewLesson {
            course_id: course,
            title: title.to_string(),
            duration_minutes: Some(20),
        }
    }

    #[tokio::test]
    async fn blank_titles_are_rejected() {
        let (service, instructor) = setup().await;
        let err = service
            .create_course(instructor, "   ", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Course(CourseError::EmptyTitle)));

        let course = service
            .create_course(instructor, "Algorithms", None, false)
            .await
            .unwrap();
        let err = service.add_lesson(lesson(course, "")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Course(CourseError::EmptyLessonTitle)));
    }

    #[tokio::test]
    async fn navigation_skips_order_gaps() {
        let (service, instructor) = setup().await;
        let course = service
            .create_course(instructor, "Algorithms", None, true)
            .await
            .unwrap();
        let a = service.add_lesson(lesson(course, "Sorting")).await.unwrap();
        let b = service.add_lesson(lesson(course, "Graphs")).await.unwrap();
        let c = service.add_lesson(lesson(course, "Dynamic programming")).await.unwrap();
        assert_eq!((a.order(), b.order(), c.order()), (1, 2, 3));

        service.delete_lesson(b.id()).await.unwrap();
        let d = service.add_lesson(lesson(course, "Review")).await.unwrap();
        assert_eq!(d.order(), 4);

        let ordered: Vec<LessonId> = service
            .lessons(course)
            .await
            .unwrap()
            .iter()
            .map(Lesson::id)
            .collect();
        assert_eq!(ordered, vec![a.id(), c.id(), d.id()]);

        let nav = service.lesson_navigation(c.id()).await.unwrap();
        assert_eq!(nav.previous, Some(a.id()));
        assert_eq!(nav.next, Some(d.id()));
        assert_eq!((nav.position, nav.total), (2, 3));

        assert!(matches!(
            service.lesson_navigation(b.id()).await,
            Err(CatalogError::LessonNotFound(_))
        ));
    }

    #[tokio::test]
    async fn publish_toggles_visibility() {
        let (service, instructor) = setup().await;
        let course = service
            .create_course(instructor, "Networks", Some("TCP/IP".into()), false)
            .await
            .unwrap();
        assert!(!service.course(course).await.unwrap().is_published());

        service.publish(course, true).await.unwrap();
        assert!(service.course(course).await.unwrap().is_published());

        assert!(matches!(
            service.publish(CourseId::new(77), true).await,
            Err(CatalogError::CourseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn lessons_need_an_existing_course() {
        let (service, _) = setup().await;
        let err = service
            .add_lesson(lesson(CourseId::new(5), "Orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::CourseNotFound(c) if c == CourseId::new(5)));
    }
}

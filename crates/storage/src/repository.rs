use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Identity, Lesson, LessonId, LessonProgress,
    LessonProgressId, Role, UserId, next_lesson_order, sort_lessons,
};
use course_core::progress::{AggregateProgress, ProgressCounts};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Insert shape for a user; the id is assigned by storage.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a course; the id is assigned by storage.
#[derive(Debug, Clone)]
pub struct NewCourseRecord {
    pub instructor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl NewCourseRecord {
    #[must_use]
    pub fn from_course(course: &Course) -> Self {
        Self {
            instructor_id: course.instructor_id(),
            title: course.title().to_owned(),
            description: course.description().map(str::to_owned),
            is_published: course.is_published(),
            created_at: course.created_at(),
        }
    }
}

/// Insert shape for a lesson.
///
/// When `order` is `None` the lesson is appended: last order in the course + 1.
#[derive(Debug, Clone)]
pub struct NewLessonRecord {
    pub course_id: CourseId,
    pub title: String,
    pub order: Option<u32>,
    pub duration_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewEnrollmentRecord {
    pub student_id: UserId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
}

/// Result of an enrollment insert guarded by the (student, course) constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentInsert {
    /// New row, plus one pending lesson record per lesson in the course.
    Created {
        enrollment: Enrollment,
        seeded_lessons: u64,
    },
    /// The pair was already enrolled (possibly by a concurrent request).
    Existing(Enrollment),
}

impl EnrollmentInsert {
    #[must_use]
    pub fn enrollment(&self) -> &Enrollment {
        match self {
            EnrollmentInsert::Created { enrollment, .. } | EnrollmentInsert::Existing(enrollment) => {
                enrollment
            }
        }
    }
}

/// Outcome of a completion write and the aggregate persisted with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub lesson_progress: LessonProgress,
    /// `false` when the lesson was already completed.
    pub newly_completed: bool,
    /// `true` when no record existed and one was backfilled.
    pub backfilled: bool,
    pub aggregate: AggregateProgress,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Identity lookup: principal id to role.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Persist a new user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the username or email is taken.
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError>;

    /// Fetch the identity for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn get_identity(&self, id: UserId) -> Result<Option<Identity>, StorageError>;

    /// Delete a user together with their enrollments and lesson progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, `StorageError::Conflict`
    /// while the user still teaches a course.
    async fn delete_user(&self, id: UserId) -> Result<(), StorageError>;
}

/// Read access to courses and their ordered lessons, plus the writes needed to
/// maintain them.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the instructor does not exist.
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn set_published(&self, id: CourseId, published: bool) -> Result<(), StorageError>;

    /// Insert a lesson, assigning its order when not supplied.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<Lesson, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Lessons of a course in course order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn lessons_for_course(&self, course: CourseId) -> Result<Vec<Lesson>, StorageError>;

    /// Delete a lesson and every progress record for it. Remaining lessons keep
    /// their order values.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson does not exist.
    async fn delete_lesson(&self, id: LessonId) -> Result<(), StorageError>;

    /// Delete a course with its lessons, enrollments and progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError>;
}

/// The enrollment ledger.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Atomically create an enrollment and seed a pending progress record for
    /// every lesson currently in the course.
    ///
    /// A duplicate (student, course) pair is reported as
    /// `EnrollmentInsert::Existing`, never as an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the student or course is missing.
    async fn create_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<EnrollmentInsert, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn find_enrollment(
        &self,
        student: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Enrollments of a student, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn enrollments_for_student(
        &self,
        student: UserId,
    ) -> Result<Vec<Enrollment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn count_for_course(&self, course: CourseId) -> Result<u64, StorageError>;

    /// Delete an enrollment and all of its lesson progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn delete_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError>;
}

/// The lesson progress ledger.
#[async_trait]
pub trait LessonProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if repository access fails.
    async fn progress_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<LessonProgress>, StorageError>;

    /// Current lesson total of the enrollment's course and its completed records.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn progress_counts(&self, enrollment: EnrollmentId)
    -> Result<ProgressCounts, StorageError>;

    /// In one transaction: mark the lesson completed (creating the record if
    /// absent, keeping the first completion time if already completed),
    /// recalculate the aggregate, and write it onto the enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn record_completion(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionRecord, StorageError>;

    /// Add to the time-spent accumulator, creating a pending record if absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn add_time_spent(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        secs: u64,
    ) -> Result<LessonProgress, StorageError>;

    /// Overwrite the derived progress fields of an enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn store_aggregate(
        &self,
        enrollment: EnrollmentId,
        aggregate: AggregateProgress,
    ) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

struct UserRow {
    identity: Identity,
    username: String,
    email: String,
}

#[derive(Default)]
struct MemoryState {
    next_user: u64,
    next_course: u64,
    next_lesson: u64,
    next_enrollment: u64,
    next_progress: u64,
    users: BTreeMap<UserId, UserRow>,
    courses: BTreeMap<CourseId, Course>,
    lessons: BTreeMap<LessonId, Lesson>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    progress: BTreeMap<LessonProgressId, LessonProgress>,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

impl MemoryState {
    fn find_enrollment(&self, student: UserId, course: CourseId) -> Option<&Enrollment> {
        self.enrollments
            .values()
            .find(|e| e.student_id() == student && e.course_id() == course)
    }

    fn find_progress_id(&self, enrollment: EnrollmentId, lesson: LessonId) -> Option<LessonProgressId> {
        self.progress
            .values()
            .find(|p| p.enrollment_id() == enrollment && p.lesson_id() == lesson)
            .map(LessonProgress::id)
    }

    fn counts(&self, enrollment: &Enrollment) -> ProgressCounts {
        let course = enrollment.course_id();
        let total = self.lessons.values().filter(|l| l.course_id() == course).count();
        let done = self
            .progress
            .values()
            .filter(|p| p.enrollment_id() == enrollment.id() && p.is_completed())
            .filter(|p| {
                self.lessons
                    .get(&p.lesson_id())
                    .is_some_and(|l| l.course_id() == course)
            })
            .count();
        ProgressCounts::new(total as u64, done as u64)
    }

    fn remove_enrollments(&mut self, doomed: &[EnrollmentId]) {
        self.enrollments.retain(|id, _| !doomed.contains(id));
        self.progress
            .retain(|_, p| !doomed.contains(&p.enrollment_id()));
    }
}

/// In-memory repository for tests and prototyping.
///
/// All tables sit behind one mutex, so every multi-row operation is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl IdentityRepository for InMemoryRepository {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        let mut guard = self.lock()?;
        if guard
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StorageError::Conflict);
        }
        let id = UserId::new(bump(&mut guard.next_user));
        guard.users.insert(
            id,
            UserRow {
                identity: Identity::new(id, user.role),
                username: user.username,
                email: user.email,
            },
        );
        Ok(id)
    }

    async fn get_identity(&self, id: UserId) -> Result<Option<Identity>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.users.get(&id).map(|u| u.identity))
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.users.contains_key(&id) {
            return Err(StorageError::NotFound);
        }
        if guard.courses.values().any(|c| c.instructor_id() == id) {
            return Err(StorageError::Conflict);
        }
        let doomed: Vec<EnrollmentId> = guard
            .enrollments
            .values()
            .filter(|e| e.student_id() == id)
            .map(Enrollment::id)
            .collect();
        guard.remove_enrollments(&doomed);
        guard.users.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.users.contains_key(&course.instructor_id) {
            return Err(StorageError::Conflict);
        }
        let id = CourseId::new(bump(&mut guard.next_course));
        let course = Course::new(
            id,
            course.instructor_id,
            course.title,
            course.description,
            course.is_published,
            course.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.courses.insert(id, course);
        Ok(id)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.courses.get(&id).cloned())
    }

    async fn set_published(&self, id: CourseId, published: bool) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let course = guard.courses.get(&id).ok_or(StorageError::NotFound)?;
        let updated = Course::new(
            course.id(),
            course.instructor_id(),
            course.title(),
            course.description().map(str::to_owned),
            published,
            course.created_at(),
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.courses.insert(id, updated);
        Ok(())
    }

    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<Lesson, StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&lesson.course_id) {
            return Err(StorageError::NotFound);
        }
        let order = match lesson.order {
            Some(order) => order,
            None => {
                let siblings: Vec<Lesson> = guard
                    .lessons
                    .values()
                    .filter(|l| l.course_id() == lesson.course_id)
                    .cloned()
                    .collect();
                next_lesson_order(&siblings)
            }
        };
        let id = LessonId::new(bump(&mut guard.next_lesson));
        let created = Lesson::new(
            id,
            lesson.course_id,
            lesson.title,
            order,
            lesson.duration_minutes,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.lessons.insert(id, created.clone());
        Ok(created)
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.lessons.get(&id).cloned())
    }

    async fn lessons_for_course(&self, course: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let guard = self.lock()?;
        let mut lessons: Vec<Lesson> = guard
            .lessons
            .values()
            .filter(|l| l.course_id() == course)
            .cloned()
            .collect();
        sort_lessons(&mut lessons);
        Ok(lessons)
    }

    async fn delete_lesson(&self, id: LessonId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.lessons.remove(&id).is_none() {
            return Err(StorageError::NotFound);
        }
        guard.progress.retain(|_, p| p.lesson_id() != id);
        Ok(())
    }

    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.courses.remove(&id).is_none() {
            return Err(StorageError::NotFound);
        }
        let doomed: Vec<EnrollmentId> = guard
            .enrollments
            .values()
            .filter(|e| e.course_id() == id)
            .map(Enrollment::id)
            .collect();
        guard.remove_enrollments(&doomed);
        let lessons: Vec<LessonId> = guard
            .lessons
            .values()
            .filter(|l| l.course_id() == id)
            .map(Lesson::id)
            .collect();
        guard.lessons.retain(|lid, _| !lessons.contains(lid));
        guard.progress.retain(|_, p| !lessons.contains(&p.lesson_id()));
        Ok(())
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn create_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<EnrollmentInsert, StorageError> {
        let mut guard = self.lock()?;
        if let Some(existing) = guard.find_enrollment(enrollment.student_id, enrollment.course_id) {
            return Ok(EnrollmentInsert::Existing(existing.clone()));
        }
        if !guard.users.contains_key(&enrollment.student_id)
            || !guard.courses.contains_key(&enrollment.course_id)
        {
            return Err(StorageError::NotFound);
        }

        let id = EnrollmentId::new(bump(&mut guard.next_enrollment));
        let created = Enrollment::new(
            id,
            enrollment.student_id,
            enrollment.course_id,
            enrollment.enrolled_at,
        );
        guard.enrollments.insert(id, created.clone());

        let lessons: Vec<LessonId> = guard
            .lessons
            .values()
            .filter(|l| l.course_id() == enrollment.course_id)
            .map(Lesson::id)
            .collect();
        for lesson in &lessons {
            let pid = LessonProgressId::new(bump(&mut guard.next_progress));
            guard
                .progress
                .insert(pid, LessonProgress::pending(pid, id, *lesson));
        }

        Ok(EnrollmentInsert::Created {
            enrollment: created,
            seeded_lessons: lessons.len() as u64,
        })
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.enrollments.get(&id).cloned())
    }

    async fn find_enrollment(
        &self,
        student: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.find_enrollment(student, course).cloned())
    }

    async fn enrollments_for_student(
        &self,
        student: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .enrollments
            .values()
            .filter(|e| e.student_id() == student)
            .cloned()
            .collect())
    }

    async fn count_for_course(&self, course: CourseId) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .enrollments
            .values()
            .filter(|e| e.course_id() == course)
            .count() as u64)
    }

    async fn delete_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.enrollments.contains_key(&id) {
            return Err(StorageError::NotFound);
        }
        guard.remove_enrollments(&[id]);
        Ok(())
    }
}

#[async_trait]
impl LessonProgressRepository for InMemoryRepository {
    async fn progress_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .progress
            .values()
            .filter(|p| p.enrollment_id() == enrollment)
            .cloned()
            .collect())
    }

    async fn progress_counts(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<ProgressCounts, StorageError> {
        let guard = self.lock()?;
        let enrollment = guard
            .enrollments
            .get(&enrollment)
            .ok_or(StorageError::NotFound)?;
        Ok(guard.counts(enrollment))
    }

    async fn record_completion(
        &self,
        enrollment: EnrollmentId,
        lesson: LessonId,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionRecord, StorageError> {
        let mut guard = self.lock()?;
        if !guard.enrollments.contains_key(&enrollment) {
            return Err(StorageError::NotFound);
        }
        if !guard.lessons.contains_key(&lesson) {
            return Err(StorageError::NotFound);
        }

        let (record, newly_completed, backfilled) = match guard.find_progress_id(enrollment, lesson)
        {
            Some(pid) => {
                let record = guard.progress.get_mut(&pid).ok_or(StorageError::NotFound)?;
                let changed = record.mark_complete(completed_at);
                (record.clone(), changed, false)
            }
            None => {
                let pid = LessonProgressId::new(bump(&mut guard.next_progress));
                let record = LessonProgress::backfilled(pid, enrollment, lesson, completed_at);
                guard.progress.insert(pid, record.clone());
                (record, true, true)
            }
        };

        let aggregate = {
            let row = guard
                .enrollments
                .get(&enrollment)
                .ok_or(StorageError::NotFound)?;
            guard.counts(row).aggregate()
        };
        if let Some(row) = guard.enrollments.get_mut(&enrollment) {
            row.apply_aggregate(aggregate);
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
        let mut guard = self.lock()?;
        if !guard.enrollments.contains_key(&enrollment) {
            return Err(StorageError::NotFound);
        }
        if !guard.lessons.contains_key(&lesson) {
            return Err(StorageError::NotFound);
        }
        let pid = match guard.find_progress_id(enrollment, lesson) {
            Some(pid) => pid,
            None => {
                let pid = LessonProgressId::new(bump(&mut guard.next_progress));
                guard
                    .progress
                    .insert(pid, LessonProgress::pending(pid, enrollment, lesson));
                pid
            }
        };
        let record = guard.progress.get_mut(&pid).ok_or(StorageError::NotFound)?;
        record.add_time_spent(secs);
        Ok(record.clone())
    }

    async fn store_aggregate(
        &self,
        enrollment: EnrollmentId,
        aggregate: AggregateProgress,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let row = guard
            .enrollments
            .get_mut(&enrollment)
            .ok_or(StorageError::NotFound)?;
        row.apply_aggregate(aggregate);
        Ok(())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn IdentityRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub lesson_progress: Arc<dyn LessonProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Share one repository implementing every contract.
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: IdentityRepository
            + CatalogRepository
            + EnrollmentRepository
            + LessonProgressRepository
            + Clone
            + 'static,
    {
        Self {
            users: Arc::new(repo.clone()),
            catalog: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            lesson_progress: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;

    async fn seeded(lessons: u32) -> (InMemoryRepository, UserId, CourseId) {
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
                username: "sam".into(),
                email: "sam@example.com".into(),
                role: Role::Student,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        let course = repo
            .insert_course(NewCourseRecord {
                instructor_id: instructor,
                title: "Rust".into(),
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
        (repo, student, course)
    }

    fn enrollment(student: UserId, course: CourseId) -> NewEnrollmentRecord {
        NewEnrollmentRecord {
            student_id: student,
            course_id: course,
            enrolled_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn duplicate_enrollment_returns_existing_row() {
        let (repo, student, course) = seeded(2).await;
        let first = repo.create_enrollment(enrollment(student, course)).await.unwrap();
        let EnrollmentInsert::Created { seeded_lessons, .. } = &first else {
            panic!("expected created");
        };
        assert_eq!(*seeded_lessons, 2);

        let second = repo.create_enrollment(enrollment(student, course)).await.unwrap();
        assert!(matches!(second, EnrollmentInsert::Existing(_)));
        assert_eq!(second.enrollment().id(), first.enrollment().id());
        assert_eq!(repo.count_for_course(course).await.unwrap(), 1);
        assert_eq!(
            repo.progress_for_enrollment(first.enrollment().id())
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn appended_lessons_take_last_order_plus_one() {
        let (repo, _, course) = seeded(2).await;
        let lessons = repo.lessons_for_course(course).await.unwrap();
        repo.delete_lesson(lessons[0].id()).await.unwrap();
        let appended = repo
            .insert_lesson(NewLessonRecord {
                course_id: course,
                title: "Late".into(),
                order: None,
                duration_minutes: Some(10),
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        assert_eq!(appended.order(), 3);
    }

    #[tokio::test]
    async fn completion_backfills_and_updates_enrollment() {
        let (repo, student, course) = seeded(1).await;
        let e = repo
            .create_enrollment(enrollment(student, course))
            .await
            .unwrap()
            .enrollment()
            .clone();
        let late = repo
            .insert_lesson(NewLessonRecord {
                course_id: course,
                title: "Late".into(),
                order: None,
                duration_minutes: None,
                created_at: fixed_now(),
            })
            .await
            .unwrap();

        let rec = repo
            .record_completion(e.id(), late.id(), fixed_now())
            .await
            .unwrap();
        assert!(rec.backfilled);
        assert!(rec.newly_completed);
        assert_eq!(rec.aggregate.progress.value(), 50);

        let stored = repo.get_enrollment(e.id()).await.unwrap().unwrap();
        assert_eq!(stored.progress().value(), 50);
        assert!(!stored.is_completed());
    }

    #[tokio::test]
    async fn deleting_student_cascades_enrollments() {
        let (repo, student, course) = seeded(3).await;
        let e = repo
            .create_enrollment(enrollment(student, course))
            .await
            .unwrap()
            .enrollment()
            .clone();
        repo.delete_user(student).await.unwrap();
        assert!(repo.get_enrollment(e.id()).await.unwrap().is_none());
        assert!(repo.progress_for_enrollment(e.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn instructor_with_courses_cannot_be_deleted() {
        let (repo, _, course) = seeded(0).await;
        let instructor = repo.get_course(course).await.unwrap().unwrap().instructor_id();
        assert!(matches!(
            repo.delete_user(instructor).await,
            Err(StorageError::Conflict)
        ));
    }
}

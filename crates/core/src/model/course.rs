use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("lesson title cannot be empty")]
    EmptyLessonTitle,

    #[error("lesson order must be > 0")]
    InvalidLessonOrder,
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// A course as the catalog exposes it to the enrollment core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    id: CourseId,
    instructor_id: UserId,
    title: String,
    description: Option<String>,
    is_published: bool,
    created_at: DateTime<Utc>,
}

impl Course {
    /// Creates a course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` if the title is blank.
    pub fn new(
        id: CourseId,
        instructor_id: UserId,
        title: impl Into<String>,
        description: Option<String>,
        is_published: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        Ok(Self {
            id,
            instructor_id,
            title: title.to_string(),
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            is_published,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn instructor_id(&self) -> UserId {
        self.instructor_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// Course-scoped content with an explicit position.
///
/// `order` is assigned once at creation and never renumbered, so a course's
/// orders may contain gaps after deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    id: LessonId,
    course_id: CourseId,
    title: String,
    order: u32,
    duration_minutes: Option<u32>,
}

impl Lesson {
    /// Creates a lesson.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyLessonTitle` for a blank title and
    /// `CourseError::InvalidLessonOrder` for an order of zero.
    pub fn new(
        id: LessonId,
        course_id: CourseId,
        title: impl Into<String>,
        order: u32,
        duration_minutes: Option<u32>,
    ) -> Result<Self, CourseError> {
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return Err(CourseError::EmptyLessonTitle);
        }
        if order == 0 {
            return Err(CourseError::InvalidLessonOrder);
        }
        Ok(Self {
            id,
            course_id,
            title: title.to_string(),
            order,
            duration_minutes,
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn duration_minutes(&self) -> Option<u32> {
        self.duration_minutes
    }
}

/// Order for a lesson appended to a course: last order + 1, or 1 when empty.
#[must_use]
pub fn next_lesson_order(lessons: &[Lesson]) -> u32 {
    lessons
        .iter()
        .map(Lesson::order)
        .max()
        .map_or(1, |last| last.saturating_add(1))
}

/// Sorts lessons into course order. Ties on `order` fall back to id.
pub fn sort_lessons(lessons: &mut [Lesson]) {
    lessons.sort_by_key(|l| (l.order(), l.id()));
}

//
// ─── NAVIGATION ────────────────────────────────────────────────────────────────
//

/// Neighbours of a lesson within its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonNavigation {
    pub lesson_id: LessonId,
    pub position: usize,
    pub total: usize,
    pub previous: Option<LessonId>,
    pub next: Option<LessonId>,
}

impl LessonNavigation {
    /// Locate `lesson` within `ordered` (already in course order).
    ///
    /// Navigation is positional, so gaps in `order` values are irrelevant.
    /// Returns `None` if the lesson is not part of the list.
    #[must_use]
    pub fn locate(ordered: &[Lesson], lesson: LessonId) -> Option<Self> {
        let index = ordered.iter().position(|l| l.id() == lesson)?;
        Some(Self {
            lesson_id: lesson,
            position: index + 1,
            total: ordered.len(),
            previous: index.checked_sub(1).map(|i| ordered[i].id()),
            next: ordered.get(index + 1).map(Lesson::id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn lesson(id: u64, order: u32) -> Lesson {
        Lesson::new(
            LessonId::new(id),
            CourseId::new(1),
            format!("Lesson {id}"),
            order,
            None,
        )
        .unwrap()
    }

    #[test]
    fn course_title_is_trimmed_and_required() {
        let course = Course::new(
            CourseId::new(1),
            UserId::new(2),
            "  Rust 101  ",
            Some("   ".into()),
            false,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(course.title(), "Rust 101");
        assert_eq!(course.description(), None);

        let err = Course::new(CourseId::new(1), UserId::new(2), " ", None, false, fixed_now())
            .unwrap_err();
        assert_eq!(err, CourseError::EmptyTitle);
    }

    #[test]
    fn lesson_rejects_zero_order() {
        let err = Lesson::new(LessonId::new(1), CourseId::new(1), "Intro", 0, None).unwrap_err();
        assert_eq!(err, CourseError::InvalidLessonOrder);
    }

    #[test]
    fn next_order_starts_at_one() {
        assert_eq!(next_lesson_order(&[]), 1);
    }

    #[test]
    fn next_order_follows_last_even_with_gaps() {
        let lessons = vec![lesson(1, 1), lesson(2, 5), lesson(3, 3)];
        assert_eq!(next_lesson_order(&lessons), 6);
    }

    #[test]
    fn navigation_is_positional_across_gaps() {
        let mut lessons = vec![lesson(3, 9), lesson(1, 1), lesson(2, 4)];
        sort_lessons(&mut lessons);

        let first = LessonNavigation::locate(&lessons, LessonId::new(1)).unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.next, Some(LessonId::new(2)));
        assert_eq!(first.position, 1);

        let middle = LessonNavigation::locate(&lessons, LessonId::new(2)).unwrap();
        assert_eq!(middle.previous, Some(LessonId::new(1)));
        assert_eq!(middle.next, Some(LessonId::new(3)));

        let last = LessonNavigation::locate(&lessons, LessonId::new(3)).unwrap();
        assert_eq!(last.next, None);
        assert_eq!(last.total, 3);
    }

    #[test]
    fn navigation_for_foreign_lesson_is_none() {
        let lessons = vec![lesson(1, 1)];
        assert!(LessonNavigation::locate(&lessons, LessonId::new(99)).is_none());
    }
}

mod course;
mod enrollment;
mod ids;
mod lesson_progress;
mod user;

pub use ids::{CourseId, EnrollmentId, LessonId, LessonProgressId, ParseIdError, UserId};

pub use course::{Course, CourseError, Lesson, LessonNavigation, next_lesson_order, sort_lessons};
pub use enrollment::{Enrollment, EnrollmentResult, EnrollmentStatus};
pub use lesson_progress::{CourseProgress, LessonProgress, LessonStatus};
pub use user::{Identity, Role, RoleError};

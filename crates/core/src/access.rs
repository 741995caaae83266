//! Capability checks run by callers before invoking the enrollment core.
//!
//! The core itself accepts pre-validated references; every role and ownership
//! rule lives here so handlers share one policy instead of guarding each route.

use thiserror::Error;

use crate::model::{Course, Enrollment, Identity, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    #[error("only students can do this")]
    NotAStudent,

    #[error("course is not published")]
    CourseNotPublished,

    #[error("enrollment belongs to another student")]
    NotEnrollmentOwner,

    #[error("only the course instructor or an admin can do this")]
    NotCourseInstructor,

    #[error("you must be enrolled in this course")]
    NotEnrolled,
}

/// Something a caller wants to do on behalf of an identity.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    /// Enroll in a course.
    Enroll { course: &'a Course },
    /// Complete lessons, record time, or read progress of an enrollment.
    TrackProgress { enrollment: &'a Enrollment },
    /// Add, edit, or remove lessons; publish the course.
    ManageCourse { course: &'a Course },
    /// Open a lesson of `course`. `enrolled` is whether the identity holds an
    /// enrollment in it.
    ViewLesson { course: &'a Course, enrolled: bool },
}

/// Decide whether `identity` may perform `action`.
///
/// # Errors
///
/// Returns the `AccessError` describing the first rule that fails.
pub fn authorize(identity: &Identity, action: Action<'_>) -> Result<(), AccessError> {
    match action {
        Action::Enroll { course } => {
            if !identity.is_student() {
                return Err(AccessError::NotAStudent);
            }
            if !course.is_published() {
                return Err(AccessError::CourseNotPublished);
            }
            Ok(())
        }
        Action::TrackProgress { enrollment } => {
            if !identity.is_student() {
                return Err(AccessError::NotAStudent);
            }
            if enrollment.student_id() != identity.id() {
                return Err(AccessError::NotEnrollmentOwner);
            }
            Ok(())
        }
        Action::ManageCourse { course } => {
            if identity.is_admin() || course.instructor_id() == identity.id() {
                Ok(())
            } else {
                Err(AccessError::NotCourseInstructor)
            }
        }
        Action::ViewLesson { course, enrolled } => match identity.role() {
            Role::Admin => Ok(()),
            Role::Instructor if course.instructor_id() == identity.id() => Ok(()),
            Role::Instructor => Err(AccessError::NotCourseInstructor),
            Role::Student if enrolled => Ok(()),
            Role::Student => Err(AccessError::NotEnrolled),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CourseId, EnrollmentId, UserId};
    use crate::time::fixed_now;

    fn course(published: bool) -> Course {
        Course::new(
            CourseId::new(1),
            UserId::new(10),
            "Rust",
            None,
            published,
            fixed_now(),
        )
        .unwrap()
    }

    fn student(id: u64) -> Identity {
        Identity::new(UserId::new(id), Role::Student)
    }

    #[test]
    fn only_students_enroll_in_published_courses() {
        let published = course(true);
        assert_eq!(authorize(&student(1), Action::Enroll { course: &published }), Ok(()));

        let instructor = Identity::new(UserId::new(10), Role::Instructor);
        assert_eq!(
            authorize(&instructor, Action::Enroll { course: &published }),
            Err(AccessError::NotAStudent)
        );

        let draft = course(false);
        assert_eq!(
            authorize(&student(1), Action::Enroll { course: &draft }),
            Err(AccessError::CourseNotPublished)
        );
    }

    #[test]
    fn progress_is_owner_only() {
        let enrollment =
            Enrollment::new(EnrollmentId::new(1), UserId::new(1), CourseId::new(1), fixed_now());
        let action = Action::TrackProgress {
            enrollment: &enrollment,
        };
        assert_eq!(authorize(&student(1), action), Ok(()));
        assert_eq!(
            authorize(&student(2), action),
            Err(AccessError::NotEnrollmentOwner)
        );
        let admin = Identity::new(UserId::new(1), Role::Admin);
        assert_eq!(authorize(&admin, action), Err(AccessError::NotAStudent));
    }

    #[test]
    fn course_management_needs_owner_or_admin() {
        let c = course(false);
        let owner = Identity::new(UserId::new(10), Role::Instructor);
        let other = Identity::new(UserId::new(11), Role::Instructor);
        let admin = Identity::new(UserId::new(99), Role::Admin);
        assert_eq!(authorize(&owner, Action::ManageCourse { course: &c }), Ok(()));
        assert_eq!(authorize(&admin, Action::ManageCourse { course: &c }), Ok(()));
        assert_eq!(
            authorize(&other, Action::ManageCourse { course: &c }),
            Err(AccessError::NotCourseInstructor)
        );
    }

    #[test]
    fn lessons_visible_to_enrolled_students() {
        let c = course(true);
        assert_eq!(
            authorize(
                &student(1),
                Action::ViewLesson {
                    course: &c,
                    enrolled: false
                }
            ),
            Err(AccessError::NotEnrolled)
        );
        assert_eq!(
            authorize(
                &student(1),
                Action::ViewLesson {
                    course: &c,
                    enrolled: true
                }
            ),
            Ok(())
        );
    }
}

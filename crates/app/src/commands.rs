use anyhow::{anyhow, bail};
use course_core::access::{AccessError, Action, authorize};
use course_core::model::{CourseId, Identity, LessonId, Role, UserId};
use course_core::progress::Progress;
use serde::Serialize;
use services::{AppServices, NewLesson};
use storage::repository::{IdentityRepository, NewUserRecord, StorageError};

use crate::cli::Command;

pub async fn dispatch(command: Command, app: &AppServices) -> anyhow::Result<()> {
    match command {
        Command::Seed => seed(app).await,
        Command::Enroll { user, course } => enroll(app, user, course).await,
        Command::Complete { user, lesson } => complete(app, user, lesson).await,
        Command::Time {
            user,
            lesson,
            seconds,
        } => time_spent(app, user, lesson, seconds).await,
        Command::Progress { user, course } => progress(app, user, course).await,
        Command::Unenroll { user, course } => unenroll(app, user, course).await,
        Command::Navigate { user, lesson } => navigate(app, user, lesson).await,
        Command::Courses { user } => courses(app, user).await,
        Command::Students { user, course } => students(app, user, course).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn identity(app: &AppServices, user: UserId) -> anyhow::Result<Identity> {
    app.users()
        .get_identity(user)
        .await?
        .ok_or_else(|| anyhow!("user {user} does not exist"))
}

#[derive(Serialize)]
struct SeedReport {
    admin: UserId,
    instructor: UserId,
    students: Vec<UserId>,
    course: CourseId,
    lessons: Vec<LessonId>,
}

async fn seed(app: &AppServices) -> anyhow::Result<()> {
    let users = app.users();
    let mut ids = Vec::new();
    for (username, role) in [
        ("admin", Role::Admin),
        ("instructor", Role::Instructor),
        ("student1", Role::Student),
        ("student2", Role::Student),
    ] {
        let record = NewUserRecord {
            username: username.to_string(),
            email: format!("{username}@coursehub.local"),
            role,
            created_at: app.clock().now(),
        };
        match users.insert_user(record).await {
            Ok(id) => ids.push(id),
            Err(StorageError::Conflict) => bail!("database is already seeded ({username} exists)"),
            Err(e) => return Err(e.into()),
        }
    }
    let &[admin, instructor, student1, student2] = ids.as_slice() else {
        bail!("seeding created an unexpected number of users");
    };

    let catalog = app.catalog();
    let course = catalog
        .create_course(
            instructor,
            "Introduction to Programming",
            Some("Variables, control flow and functions.".to_string()),
            true,
        )
        .await?;
    let mut lessons = Vec::new();
    for (title, minutes) in [
        ("Getting started", 15),
        ("Control flow", 25),
        ("Functions", 30),
    ] {
        let lesson = catalog
            .add_lesson(NewLesson {
                course_id: course,
                title: title.to_string(),
                duration_minutes: Some(minutes),
            })
            .await?;
        lessons.push(lesson.id());
    }

    tracing::info!(%course, lessons = lessons.len(), "sample data seeded");
    print_json(&SeedReport {
        admin,
        instructor,
        students: vec![student1, student2],
        course,
        lessons,
    })
}

async fn enroll(app: &AppServices, user: UserId, course: CourseId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let course = app.catalog().course(course).await?;
    authorize(&identity, Action::Enroll { course: &course })?;

    let result = app.enrollments().enroll(identity.id(), course.id()).await?;
    if !result.is_created() {
        eprintln!("You are already enrolled in \"{}\".", course.title());
    }
    print_json(&result)
}

async fn complete(app: &AppServices, user: UserId, lesson: LessonId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let progress = app.progress();
    let (enrollment, lesson) = progress.enrollment_for_lesson(identity.id(), lesson).await?;
    authorize(&identity, Action::TrackProgress { enrollment: &enrollment })?;

    let completion = progress
        .mark_lesson_complete(enrollment.id(), lesson.id())
        .await?;
    print_json(&completion)
}

async fn time_spent(
    app: &AppServices,
    user: UserId,
    lesson: LessonId,
    seconds: u64,
) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let progress = app.progress();
    let (enrollment, lesson) = progress.enrollment_for_lesson(identity.id(), lesson).await?;
    authorize(&identity, Action::TrackProgress { enrollment: &enrollment })?;

    let record = progress
        .record_time_spent(enrollment.id(), lesson.id(), seconds)
        .await?;
    print_json(&record)
}

async fn progress(app: &AppServices, user: UserId, course: CourseId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let enrollment = app
        .enrollments()
        .find(identity.id(), course)
        .await?
        .ok_or(AccessError::NotEnrolled)?;
    authorize(&identity, Action::TrackProgress { enrollment: &enrollment })?;

    let view = app.progress().course_progress(enrollment.id()).await?;
    print_json(&view)
}

async fn unenroll(app: &AppServices, user: UserId, course: CourseId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let enrollment = app
        .enrollments()
        .find(identity.id(), course)
        .await?
        .ok_or(AccessError::NotEnrolled)?;
    authorize(&identity, Action::TrackProgress { enrollment: &enrollment })?;

    app.enrollments().unenroll(identity.id(), course).await?;
    print_json(&serde_json::json!({ "unenrolled": enrollment.id() }))
}

async fn navigate(app: &AppServices, user: UserId, lesson: LessonId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let catalog = app.catalog();
    let lesson = catalog.lesson(lesson).await?;
    let course = catalog.course(lesson.course_id()).await?;
    let enrolled = app
        .enrollments()
        .find(identity.id(), course.id())
        .await?
        .is_some();
    authorize(&identity, Action::ViewLesson { course: &course, enrolled })?;

    let nav = catalog.lesson_navigation(lesson.id()).await?;
    print_json(&nav)
}

#[derive(Serialize)]
struct CourseSummary {
    course: CourseId,
    title: String,
    lessons: usize,
    progress: Progress,
    completed: bool,
}

async fn courses(app: &AppServices, user: UserId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    if !identity.is_student() {
        return Err(AccessError::NotAStudent.into());
    }

    let catalog = app.catalog();
    let mut summaries = Vec::new();
    for enrollment in app.enrollments().enrollments_for_student(identity.id()).await? {
        let course = catalog.course(enrollment.course_id()).await?;
        let lessons = catalog.lessons(course.id()).await?.len();
        summaries.push(CourseSummary {
            course: course.id(),
            title: course.title().to_string(),
            lessons,
            progress: enrollment.progress(),
            completed: enrollment.is_completed(),
        });
    }
    print_json(&summaries)
}

async fn students(app: &AppServices, user: UserId, course: CourseId) -> anyhow::Result<()> {
    let identity = identity(app, user).await?;
    let course = app.catalog().course(course).await?;
    authorize(&identity, Action::ManageCourse { course: &course })?;

    let count = app.enrollments().student_count(course.id()).await?;
    print_json(&serde_json::json!({ "course": course.id(), "students": count }))
}

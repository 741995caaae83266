use clap::{Parser, Subcommand};
use course_core::model::{CourseId, LessonId, UserId};

/// Top-level CLI parser for the `coursehub` binary.
#[derive(Debug, Parser)]
#[command(name = "coursehub", version, about = "Course enrollment and progress tracking")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// `SQLite` database URL or path
    #[arg(long = "db", global = true, env = "COURSEHUB_DB_URL", default_value = "sqlite:coursehub.sqlite3")]
    pub db_url: String,

    /// Log filter directives (falls back to `RUST_LOG`, then `info`)
    #[arg(long, global = true, env = "COURSEHUB_LOG")]
    pub log: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create sample users and a published course with three lessons
    Seed,
    /// Enroll a student in a course
    Enroll {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
    /// Mark a lesson complete
    Complete {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        lesson: LessonId,
    },
    /// Add time spent on a lesson
    Time {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        seconds: u64,
    },
    /// Show per-lesson progress for a course
    Progress {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
    /// Leave a course, dropping its progress
    Unenroll {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
    /// Previous and next lessons around a lesson
    Navigate {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        lesson: LessonId,
    },
    /// A student's enrollments with their stored progress
    Courses {
        #[arg(long)]
        user: UserId,
    },
    /// Number of students enrolled in a course
    Students {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
}

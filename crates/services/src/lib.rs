#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog_service;
pub mod enrollment_service;
pub mod error;
pub mod progress_service;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use catalog_service::{CatalogService, NewLesson};
pub use enrollment_service::EnrollmentService;
pub use error::{AppServicesError, CatalogError, EnrollmentError, ProgressError};
pub use progress_service::{LessonCompletion, ProgressService};

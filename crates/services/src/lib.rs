#![forbid(unsafe_code)]

pub mod app_services;
pub mod enrollment_service;
pub mod error;
pub mod events;
pub mod progress_service;
pub mod quiz_service;
pub mod statistics_service;

pub use progress_core::Clock;

pub use app_services::AppServices;
pub use enrollment_service::EnrollmentService;
pub use error::{AppServicesError, EnrollmentError, ProgressError, QuizError, StatisticsError};
pub use events::{BroadcastEvents, NoopEvents, QuizEventSink};
pub use progress_service::{CourseProgress, ProgressService};
pub use quiz_service::{QuestionResult, QuizResult, QuizService, QuizSubmissionResult};
pub use statistics_service::StatisticsService;

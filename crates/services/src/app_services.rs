use std::sync::Arc;

use progress_core::events::QuizCompleted;
use storage::repository::{CatalogRepository, Storage};
use tokio::sync::broadcast;

use crate::Clock;
use crate::enrollment_service::EnrollmentService;
use crate::error::AppServicesError;
use crate::events::BroadcastEvents;
use crate::progress_service::ProgressService;
use crate::quiz_service::QuizService;
use crate::statistics_service::StatisticsService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    catalog: Arc<dyn CatalogRepository>,
    events: BroadcastEvents,
    quizzes: Arc<QuizService>,
    progress: Arc<ProgressService>,
    enrollments: Arc<EnrollmentService>,
    statistics: Arc<StatisticsService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage, running migrations first.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock))
    }

    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), clock)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        let events = BroadcastEvents::default();
        let quizzes = Arc::new(QuizService::new(
            clock,
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.ledger),
            Arc::new(events.clone()),
        ));
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&storage.progress),
            Arc::clone(&storage.ledger),
        ));
        let enrollments = Arc::new(EnrollmentService::new(
            clock,
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.enrollments),
        ));
        let statistics = Arc::new(StatisticsService::new(
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.statistics),
        ));

        Self {
            catalog: Arc::clone(&storage.catalog),
            events,
            quizzes,
            progress,
            enrollments,
            statistics,
        }
    }

    /// Content authoring access, used for seeding.
    #[must_use]
    pub fn catalog(&self) -> Arc<dyn CatalogRepository> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QuizCompleted> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn quizzes(&self) -> Arc<QuizService> {
        Arc::clone(&self.quizzes)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn enrollments(&self) -> Arc<EnrollmentService> {
        Arc::clone(&self.enrollments)
    }

    #[must_use]
    pub fn statistics(&self) -> Arc<StatisticsService> {
        Arc::clone(&self.statistics)
    }
}

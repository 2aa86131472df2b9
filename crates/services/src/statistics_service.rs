use std::sync::Arc;

use tracing::instrument;

use progress_core::{
    model::CourseId,
    statistics::{CourseStatistics, QuizAverage, QuizResultQuery, QuizResultRow},
};
use storage::repository::{CatalogRepository, StatisticsRepository};

use crate::error::StatisticsError;

/// Read-only course reporting.
#[derive(Clone)]
pub struct StatisticsService {
    catalog: Arc<dyn CatalogRepository>,
    statistics: Arc<dyn StatisticsRepository>,
}

impl StatisticsService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        statistics: Arc<dyn StatisticsRepository>,
    ) -> Self {
        Self {
            catalog,
            statistics,
        }
    }

    /// # Errors
    ///
    /// Returns `StatisticsError::CourseNotFound` or `Storage`.
    #[instrument(skip(self), fields(course_id = %course_id))]
    pub async fn course_statistics(
        &self,
        course_id: CourseId,
    ) -> Result<CourseStatistics, StatisticsError> {
        self.ensure_course(course_id).await?;
        Ok(self.statistics.course_statistics(course_id).await?)
    }

    /// Average score per quiz lesson over students who completed it.
    ///
    /// # Errors
    ///
    /// Returns `StatisticsError::CourseNotFound` or `Storage`.
    #[instrument(skip(self), fields(course_id = %course_id))]
    pub async fn average_quiz_scores(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<QuizAverage>, StatisticsError> {
        self.ensure_course(course_id).await?;
        Ok(self.statistics.average_quiz_scores(course_id).await?)
    }

    /// # Errors
    ///
    /// Returns `StatisticsError::CourseNotFound` or `Storage`.
    #[instrument(skip(self, query), fields(course_id = %query.course_id))]
    pub async fn quiz_results(
        &self,
        query: &QuizResultQuery,
    ) -> Result<Vec<QuizResultRow>, StatisticsError> {
        self.ensure_course(query.course_id).await?;
        Ok(self.statistics.quiz_results(query).await?)
    }

    async fn ensure_course(&self, course_id: CourseId) -> Result<(), StatisticsError> {
        if self.catalog.course_outline(course_id).await?.is_none() {
            return Err(StatisticsError::CourseNotFound(course_id));
        }
        Ok(())
    }
}

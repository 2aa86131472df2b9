use thiserror::Error;

use crate::evaluator::EvaluationError;
use crate::model::{CatalogError, QuestionError};
use crate::scoring::ScoringError;

/// Umbrella error for callers that do not care which domain rule failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

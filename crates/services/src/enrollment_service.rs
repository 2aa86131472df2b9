use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use progress_core::{
    model::{CourseId, CourseOutline, PaymentRef, StudentId},
    statistics::{CourseSummaryStats, PurchaseKind},
    time::Clock,
};
use storage::repository::{CatalogRepository, EnrollmentRepository, EnrollmentWrite, StorageError};

use crate::error::EnrollmentError;

/// Creates and removes enrollments together with the progress rows they anchor.
#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn CatalogRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            clock,
            catalog,
            enrollments,
        }
    }

    /// Enroll one student, paid when `payment` is present.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::CourseNotFound`, `AlreadyEnrolled`, or `Storage`.
    #[instrument(skip(self, payment), fields(course_id = %course_id, student_id = %student_id))]
    pub async fn enroll_course(
        &self,
        course_id: CourseId,
        student_id: StudentId,
        payment: Option<PaymentRef>,
    ) -> Result<PurchaseKind, EnrollmentError> {
        let kinds = self
            .enroll(
                course_id,
                vec![EnrollmentWrite {
                    student_id,
                    payment,
                }],
            )
            .await?;
        let kind = kinds.first().copied().ok_or_else(|| {
            StorageError::Serialization("enrollment returned no purchase".into())
        })?;
        info!(?kind, "student enrolled");
        Ok(kind)
    }

    /// Free enrollment for a group of students, all or nothing. Duplicate ids
    /// are enrolled once.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::AlreadyEnrolled` listing every student who is
    /// already enrolled, plus `CourseNotFound` or `Storage`.
    #[instrument(skip(self, students), fields(course_id = %course_id, students = students.len()))]
    pub async fn enroll_students(
        &self,
        course_id: CourseId,
        students: &[StudentId],
    ) -> Result<Vec<PurchaseKind>, EnrollmentError> {
        let mut seen = HashSet::with_capacity(students.len());
        let writes: Vec<EnrollmentWrite> = students
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|&student_id| EnrollmentWrite {
                student_id,
                payment: None,
            })
            .collect();
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let kinds = self.enroll(course_id, writes).await?;
        info!(enrolled = kinds.len(), "students enrolled");
        Ok(kinds)
    }

    /// Remove the enrollment and all progress under it. Attempt history stays.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::NotEnrolled`, `CourseNotFound`, or `Storage`.
    #[instrument(skip(self), fields(course_id = %course_id, student_id = %student_id))]
    pub async fn unenroll_course(
        &self,
        course_id: CourseId,
        student_id: StudentId,
    ) -> Result<(), EnrollmentError> {
        let outline = self.outline(course_id).await?;
        self.enrollments
            .unenroll(&outline, student_id)
            .await
            .map_err(|err| match err {
                StorageError::NotFound => EnrollmentError::NotEnrolled,
                other => EnrollmentError::Storage(other),
            })?;
        info!("student unenrolled");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `EnrollmentError::Storage` on read failures.
    pub async fn summary_stats(
        &self,
        course_id: CourseId,
    ) -> Result<CourseSummaryStats, EnrollmentError> {
        Ok(self.enrollments.summary_stats(course_id).await?)
    }

    async fn enroll(
        &self,
        course_id: CourseId,
        writes: Vec<EnrollmentWrite>,
    ) -> Result<Vec<PurchaseKind>, EnrollmentError> {
        let now = self.clock.now();
        let outline = self.outline(course_id).await?;
        let ids: Vec<StudentId> = writes.iter().map(|w| w.student_id).collect();

        let existing = self.enrollments.enrolled_among(course_id, &ids).await?;
        if !existing.is_empty() {
            warn!(?existing, "students already enrolled");
            return Err(EnrollmentError::AlreadyEnrolled {
                student_ids: existing,
            });
        }

        match self.enrollments.enroll(&outline, &writes, now).await {
            Ok(kinds) => Ok(kinds),
            Err(StorageError::Conflict) => {
                // Lost a race with a concurrent enrollment.
                let student_ids = self.enrollments.enrolled_among(course_id, &ids).await?;
                Err(EnrollmentError::AlreadyEnrolled { student_ids })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn outline(&self, course_id: CourseId) -> Result<CourseOutline, EnrollmentError> {
        self.catalog
            .course_outline(course_id)
            .await?
            .ok_or(EnrollmentError::CourseNotFound(course_id))
    }
}

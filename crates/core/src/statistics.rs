//! Enrollment funnel counters and reporting read models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ChapterId, CourseId, CourseProgressStatus, LessonId, PaymentRef, StudentId};

//
// ─── ENROLLMENT FUNNEL ────────────────────────────────────────────────────────
//

/// Which counter an enrollment increments. The three paths are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    Free,
    Paid,
    /// Paid by a student who had already made progress on freemium lessons.
    PaidAfterFreemium,
}

impl PurchaseKind {
    #[must_use]
    pub fn classify(payment: Option<&PaymentRef>, had_prior_freemium_progress: bool) -> Self {
        match (payment, had_prior_freemium_progress) {
            (None, _) => PurchaseKind::Free,
            (Some(_), false) => PurchaseKind::Paid,
            (Some(_), true) => PurchaseKind::PaidAfterFreemium,
        }
    }
}

/// Per-course purchase counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummaryStats {
    pub course_id: CourseId,
    pub free_purchased_count: u32,
    pub paid_purchased_count: u32,
    pub paid_purchased_after_freemium_count: u32,
}

impl CourseSummaryStats {
    #[must_use]
    pub fn empty(course_id: CourseId) -> Self {
        Self {
            course_id,
            free_purchased_count: 0,
            paid_purchased_count: 0,
            paid_purchased_after_freemium_count: 0,
        }
    }

    pub fn record(&mut self, kind: PurchaseKind) {
        let counter = match kind {
            PurchaseKind::Free => &mut self.free_purchased_count,
            PurchaseKind::Paid => &mut self.paid_purchased_count,
            PurchaseKind::PaidAfterFreemium => &mut self.paid_purchased_after_freemium_count,
        };
        *counter = counter.saturating_add(1);
    }

    /// Everyone who enrolled, whichever path they took.
    #[must_use]
    pub fn enrolled_participants(&self) -> u32 {
        self.free_purchased_count
            .saturating_add(self.paid_purchased_count)
            .saturating_add(self.paid_purchased_after_freemium_count)
    }
}

//
// ─── REPORTING ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: CourseProgressStatus,
    pub count: u32,
}

/// Course-level completion overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatistics {
    pub enrolled_count: u32,
    /// Share of enrolled students with a completed course, 0..=100, two decimals.
    pub completion_percentage: f64,
    /// Share of lesson progress rows that are completed, 0..=100, rounded.
    pub average_lesson_completion_percentage: f64,
    pub status_distribution: Vec<StatusCount>,
    pub purchases: CourseSummaryStats,
}

/// Percentage helper shared by both storage backends.
#[must_use]
pub fn percentage(part: u32, whole: u32, decimals: i32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let factor = 10_f64.powi(decimals);
    (f64::from(part) / f64::from(whole) * 100.0 * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAverage {
    pub lesson_id: LessonId,
    pub title: String,
    pub average_score: u32,
    pub finished_count: u32,
}

/// One student's stored result for one quiz lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultRow {
    pub lesson_id: LessonId,
    pub lesson_title: String,
    pub chapter_id: ChapterId,
    pub student_id: StudentId,
    pub score: u8,
    pub is_passed: bool,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizResultSort {
    #[default]
    LessonOrder,
    Score,
    CompletedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Typed filter/sort specification for quiz results within a course.
///
/// Only completed quiz lessons are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResultQuery {
    pub course_id: CourseId,
    pub lesson_id: Option<LessonId>,
    pub student_id: Option<StudentId>,
    pub passed: Option<bool>,
    pub sort: QuizResultSort,
    pub direction: SortDirection,
    pub limit: Option<u32>,
}

impl QuizResultQuery {
    #[must_use]
    pub fn for_course(course_id: CourseId) -> Self {
        Self {
            course_id,
            lesson_id: None,
            student_id: None,
            passed: None,
            sort: QuizResultSort::default(),
            direction: SortDirection::default(),
            limit: None,
        }
    }

    #[must_use]
    pub fn lesson(mut self, lesson_id: LessonId) -> Self {
        self.lesson_id = Some(lesson_id);
        self
    }

    #[must_use]
    pub fn student(mut self, student_id: StudentId) -> Self {
        self.student_id = Some(student_id);
        self
    }

    #[must_use]
    pub fn passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }

    #[must_use]
    pub fn sorted_by(mut self, sort: QuizResultSort, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress_core::ledger::{ChapterTally, CourseTally, LedgerReport, settle_chapter, settle_course};
use progress_core::model::{
    Chapter, ChapterId, ChapterOutline, ChapterProgress, Course, CourseEnrollment, CourseId,
    CourseOutline, CourseProgressStatus, GradingState, Lesson, LessonId, LessonProgress, Question,
    QuestionId, QuizAttempt, StudentAnswer, StudentId,
};
use progress_core::scoring::QuizOutcome;
use progress_core::statistics::{
    CourseStatistics, CourseSummaryStats, PurchaseKind, QuizAverage, QuizResultQuery,
    QuizResultRow, QuizResultSort, SortDirection, StatusCount, percentage,
};

use crate::repository::{
    CatalogRepository, EnrollmentRepository, EnrollmentWrite, LedgerPersistence, LessonAccess,
    ManualGradeWrite, ProgressRepository, QuizSubmissionWrite, RetakeWrite, StatisticsRepository,
    StorageError, SubmissionReceipt,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    courses: HashMap<CourseId, Course>,
    chapters: HashMap<ChapterId, Chapter>,
    lessons: HashMap<LessonId, Lesson>,
    questions: HashMap<QuestionId, Question>,
    answers: HashMap<(QuestionId, StudentId), StudentAnswer>,
    lesson_progress: HashMap<(StudentId, LessonId), LessonProgress>,
    chapter_progress: HashMap<(StudentId, ChapterId), ChapterProgress>,
    enrollments: HashMap<(StudentId, CourseId), CourseEnrollment>,
    attempts: Vec<QuizAttempt>,
    next_attempt_id: i64,
    summaries: HashMap<CourseId, CourseSummaryStats>,
}

/// Simple in-memory repository for prototyping and tests.
///
/// Writes run against a copy of the state that replaces the original only when
/// the whole operation succeeds.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> Result<T, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(f(&guard))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }
}

impl MemoryState {
    fn lesson_orders(&self, lesson_id: LessonId) -> (u32, u32) {
        self.lessons
            .get(&lesson_id)
            .map(|lesson| {
                let chapter_order = self
                    .chapters
                    .get(&lesson.chapter_id)
                    .map_or(0, |c| c.display_order);
                (chapter_order, lesson.display_order)
            })
            .unwrap_or_default()
    }

    fn lesson_in_course(&self, lesson_id: LessonId, course_id: CourseId) -> bool {
        self.lessons
            .get(&lesson_id)
            .is_some_and(|l| l.course_id == course_id)
    }

    fn outline(&self, course_id: CourseId) -> Option<CourseOutline> {
        let course = self.courses.get(&course_id)?.clone();
        let mut chapters: Vec<&Chapter> = self
            .chapters
            .values()
            .filter(|c| c.course_id == course_id)
            .collect();
        chapters.sort_by_key(|c| (c.display_order, c.id));

        let chapters = chapters
            .into_iter()
            .map(|chapter| {
                let mut lessons: Vec<&Lesson> = self
                    .lessons
                    .values()
                    .filter(|l| l.chapter_id == chapter.id)
                    .collect();
                lessons.sort_by_key(|l| (l.display_order, l.id));
                ChapterOutline {
                    chapter: chapter.clone(),
                    lessons: lessons.iter().map(|l| (l.id, l.kind)).collect(),
                }
            })
            .collect();
        Some(CourseOutline { course, chapters })
    }

    fn progress_row(&self, student_id: StudentId, lesson: &Lesson) -> LessonProgress {
        self.lesson_progress
            .get(&(student_id, lesson.id))
            .cloned()
            .unwrap_or_else(|| LessonProgress::new(student_id, lesson.id, lesson.chapter_id, lesson.kind))
    }

    fn chapter_tally(&self, student_id: StudentId, chapter_id: ChapterId) -> ChapterTally {
        let lesson_count = self
            .lessons
            .values()
            .filter(|l| l.chapter_id == chapter_id)
            .count();
        let completed_lessons = self
            .lesson_progress
            .values()
            .filter(|p| p.student_id == student_id && p.chapter_id == chapter_id && p.is_completed())
            .filter(|p| self.lessons.contains_key(&p.lesson_id))
            .count();
        ChapterTally {
            lesson_count: count_u32(lesson_count),
            completed_lessons: count_u32(completed_lessons),
        }
    }

    fn course_tally(&self, student_id: StudentId, course_id: CourseId) -> CourseTally {
        let required_chapters = self
            .chapters
            .values()
            .filter(|c| c.course_id == course_id)
            .filter(|c| self.lessons.values().any(|l| l.chapter_id == c.id))
            .count();
        let completed_chapters = self
            .chapter_progress
            .values()
            .filter(|c| {
                c.student_id == student_id && c.course_id == course_id && c.completed_at.is_some()
            })
            .count();
        let has_activity = self.lesson_progress.values().any(|p| {
            p.student_id == student_id
                && (p.is_started || p.is_completed())
                && self.lesson_in_course(p.lesson_id, course_id)
        });
        CourseTally {
            required_chapters: count_u32(required_chapters),
            completed_chapters: count_u32(completed_chapters),
            has_activity,
        }
    }

    /// Recount chapter and course aggregates. Students without an enrollment
    /// (freemium learners) have no aggregates to settle.
    fn settle(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> (bool, bool) {
        if !self.enrollments.contains_key(&(student_id, course_id)) {
            return (false, false);
        }

        let tally = self.chapter_tally(student_id, chapter_id);
        let chapter = self
            .chapter_progress
            .entry((student_id, chapter_id))
            .or_insert_with(|| ChapterProgress::new(student_id, chapter_id, course_id));
        let chapter_completed = settle_chapter(chapter, tally, now);

        let tally = self.course_tally(student_id, course_id);
        let course_completed = self
            .enrollments
            .get_mut(&(student_id, course_id))
            .is_some_and(|enrollment| settle_course(enrollment, tally, now));
        (chapter_completed, course_completed)
    }

    fn push_attempt(&mut self, mut attempt: QuizAttempt) -> i64 {
        self.next_attempt_id += 1;
        let id = self.next_attempt_id;
        attempt.id = Some(id);
        self.attempts.push(attempt);
        id
    }

    fn apply_lesson_write(
        &mut self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut LessonProgress) -> bool,
    ) -> LedgerReport {
        let mut row = self.progress_row(student_id, lesson);
        let lesson_changed = change(&mut row);
        self.lesson_progress.insert((student_id, lesson.id), row);
        let (chapter_completed, course_completed) =
            self.settle(student_id, lesson.chapter_id, lesson.course_id, now);
        LedgerReport {
            lesson_changed,
            chapter_completed,
            course_completed,
        }
    }

    fn quiz_rows(&self, query: &QuizResultQuery) -> Vec<QuizResultRow> {
        self.lesson_progress
            .values()
            .filter_map(|p| {
                let lesson = self.lessons.get(&p.lesson_id)?;
                let completed_at = p.completed_at?;
                let keep = lesson.kind.is_quiz()
                    && lesson.course_id == query.course_id
                    && query.lesson_id.is_none_or(|id| id == lesson.id)
                    && query.student_id.is_none_or(|id| id == p.student_id)
                    && query.passed.is_none_or(|passed| passed == p.is_quiz_passed)
                    && self
                        .enrollments
                        .contains_key(&(p.student_id, lesson.course_id));
                keep.then(|| QuizResultRow {
                    lesson_id: lesson.id,
                    lesson_title: lesson.title.clone(),
                    chapter_id: lesson.chapter_id,
                    student_id: p.student_id,
                    score: p.quiz_score.unwrap_or(0),
                    is_passed: p.is_quiz_passed,
                    attempts: p.attempts,
                    completed_at,
                })
            })
            .collect()
    }

    fn compare_results(&self, sort: QuizResultSort, a: &QuizResultRow, b: &QuizResultRow) -> Ordering {
        let order_a = self.lesson_orders(a.lesson_id);
        let order_b = self.lesson_orders(b.lesson_id);
        match sort {
            QuizResultSort::LessonOrder => order_a.cmp(&order_b),
            QuizResultSort::Score => a.score.cmp(&b.score),
            QuizResultSort::CompletedAt => a.completed_at.cmp(&b.completed_at),
        }
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

//
// ─── CATALOG ──────────────────────────────────────────────────────────────────
//

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        self.write(|state| {
            state.courses.insert(course.id, course.clone());
            Ok(())
        })
    }

    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError> {
        self.write(|state| {
            if !state.courses.contains_key(&chapter.course_id) {
                return Err(StorageError::NotFound);
            }
            state.chapters.insert(chapter.id, chapter.clone());
            Ok(())
        })
    }

    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        self.write(|state| {
            match state.chapters.get(&lesson.chapter_id) {
                Some(chapter) if chapter.course_id == lesson.course_id => {}
                Some(_) => return Err(StorageError::Conflict),
                None => return Err(StorageError::NotFound),
            }
            state.lessons.insert(lesson.id, lesson.clone());
            Ok(())
        })
    }

    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        self.write(|state| {
            if !state.lessons.contains_key(&question.lesson_id) {
                return Err(StorageError::NotFound);
            }
            state.questions.insert(question.id, question.clone());
            Ok(())
        })
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        self.read(|state| state.lessons.get(&id).cloned())
    }

    async fn questions_for_lesson(&self, id: LessonId) -> Result<Vec<Question>, StorageError> {
        self.read(|state| {
            let mut questions: Vec<Question> = state
                .questions
                .values()
                .filter(|q| q.lesson_id == id)
                .cloned()
                .collect();
            questions.sort_by_key(|q| (q.display_order, q.id));
            questions
        })
    }

    async fn course_outline(&self, id: CourseId) -> Result<Option<CourseOutline>, StorageError> {
        self.read(|state| state.outline(id))
    }
}

//
// ─── PROGRESS READS ───────────────────────────────────────────────────────────
//

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn lesson_access(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<Option<LessonAccess>, StorageError> {
        self.read(|state| {
            let lesson = state.lessons.get(&lesson_id)?.clone();
            let is_freemium = state
                .chapters
                .get(&lesson.chapter_id)
                .is_some_and(|c| c.is_freemium);
            let is_enrolled = state
                .enrollments
                .contains_key(&(student_id, lesson.course_id));
            let progress = state.lesson_progress.get(&(student_id, lesson_id)).cloned();
            Some(LessonAccess {
                lesson,
                is_enrolled,
                is_freemium,
                progress,
            })
        })
    }

    async fn lesson_progress(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        self.read(|state| state.lesson_progress.get(&(student_id, lesson_id)).cloned())
    }

    async fn chapter_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ChapterProgress>, StorageError> {
        self.read(|state| {
            let mut rows: Vec<ChapterProgress> = state
                .chapter_progress
                .values()
                .filter(|c| c.student_id == student_id && c.course_id == course_id)
                .cloned()
                .collect();
            rows.sort_by_key(|c| {
                let order = state.chapters.get(&c.chapter_id).map_or(0, |ch| ch.display_order);
                (order, c.chapter_id)
            });
            rows
        })
    }

    async fn lesson_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        self.read(|state| {
            let mut rows: Vec<LessonProgress> = state
                .lesson_progress
                .values()
                .filter(|p| p.student_id == student_id && state.lesson_in_course(p.lesson_id, course_id))
                .cloned()
                .collect();
            rows.sort_by_key(|p| (state.lesson_orders(p.lesson_id), p.lesson_id));
            rows
        })
    }

    async fn enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<CourseEnrollment>, StorageError> {
        self.read(|state| state.enrollments.get(&(student_id, course_id)).cloned())
    }

    async fn answers_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<StudentAnswer>, StorageError> {
        self.read(|state| {
            let mut rows: Vec<StudentAnswer> = state
                .answers
                .values()
                .filter(|a| a.student_id == student_id && a.lesson_id == lesson_id)
                .cloned()
                .collect();
            rows.sort_by_key(|a| {
                let order = state.questions.get(&a.question_id).map_or(0, |q| q.display_order);
                (order, a.question_id)
            });
            rows
        })
    }

    async fn attempts_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        self.read(|state| {
            state
                .attempts
                .iter()
                .filter(|a| a.student_id == student_id && a.lesson_id == lesson_id)
                .cloned()
                .collect()
        })
    }
}

//
// ─── LEDGER WRITES ────────────────────────────────────────────────────────────
//

#[async_trait]
impl LedgerPersistence for InMemoryRepository {
    async fn record_submission(
        &self,
        write: &QuizSubmissionWrite,
    ) -> Result<SubmissionReceipt, StorageError> {
        self.write(|state| {
            let lesson = &write.lesson;
            let mut row = state.progress_row(write.student_id, lesson);
            if row.is_completed() {
                return Err(StorageError::Conflict);
            }

            for answer in &write.answers {
                let key = (answer.question_id, answer.student_id);
                if state.answers.insert(key, answer.clone()).is_some() {
                    return Err(StorageError::Conflict);
                }
            }

            row.record_submission(&write.outcome, write.now);
            state.lesson_progress.insert((write.student_id, lesson.id), row);

            let attempt_id = state.push_attempt(QuizAttempt::from_outcome(
                write.student_id,
                lesson.course_id,
                lesson.id,
                &write.outcome,
                write.now,
            ));

            let (chapter_completed, course_completed) =
                state.settle(write.student_id, lesson.chapter_id, lesson.course_id, write.now);
            Ok(SubmissionReceipt {
                attempt_id,
                report: LedgerReport {
                    lesson_changed: true,
                    chapter_completed,
                    course_completed,
                },
            })
        })
    }

    async fn apply_manual_grade(
        &self,
        write: &ManualGradeWrite,
    ) -> Result<QuizOutcome, StorageError> {
        self.write(|state| {
            let student_id = write.student_id;
            let lesson = &write.lesson;
            let mut row = state
                .lesson_progress
                .get(&(student_id, lesson.id))
                .filter(|p| p.is_completed())
                .cloned()
                .ok_or(StorageError::Conflict)?;

            for evaluation in &write.evaluations {
                if let Some(answer) = state
                    .answers
                    .get_mut(&(evaluation.question_id, student_id))
                    .filter(|a| a.lesson_id == lesson.id)
                {
                    answer.is_correct = evaluation.is_correct;
                    answer.grading = GradingState::Manual;
                }
            }

            let (correct, total) = state
                .answers
                .values()
                .filter(|a| a.student_id == student_id && a.lesson_id == lesson.id)
                .fold((0_u32, 0_u32), |(correct, total), a| {
                    (correct + u32::from(a.is_correct), total + 1)
                });
            let outcome = QuizOutcome::from_counts(correct, total, write.threshold);

            row.overwrite_outcome(&outcome);
            state.lesson_progress.insert((student_id, lesson.id), row);

            let latest = state
                .attempts
                .iter_mut()
                .filter(|a| a.student_id == student_id && a.lesson_id == lesson.id)
                .max_by_key(|a| a.id);
            match latest {
                Some(attempt) => attempt.overwrite(&outcome, write.now),
                None => {
                    state.push_attempt(QuizAttempt::from_outcome(
                        student_id,
                        lesson.course_id,
                        lesson.id,
                        &outcome,
                        write.now,
                    ));
                }
            }

            state.settle(student_id, lesson.chapter_id, lesson.course_id, write.now);
            Ok(outcome)
        })
    }

    async fn reset_for_retake(&self, write: &RetakeWrite) -> Result<LessonProgress, StorageError> {
        self.write(|state| {
            let key = (write.student_id, write.lesson.id);
            let row = state
                .lesson_progress
                .get_mut(&key)
                .filter(|p| p.is_completed() && p.attempts == write.expected_attempts)
                .ok_or(StorageError::Conflict)?;
            row.reset_for_retake();
            let row = row.clone();

            state
                .answers
                .retain(|_, a| !(a.student_id == write.student_id && a.lesson_id == write.lesson.id));
            Ok(row)
        })
    }

    async fn mark_started(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError> {
        self.write(|state| {
            Ok(state.apply_lesson_write(
                student_id,
                lesson,
                now,
                LessonProgress::mark_started,
            ))
        })
    }

    async fn mark_completed(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError> {
        self.write(|state| {
            Ok(state.apply_lesson_write(student_id, lesson, now, |row| row.mark_completed(now)))
        })
    }
}

//
// ─── ENROLLMENT ───────────────────────────────────────────────────────────────
//

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn enroll(
        &self,
        outline: &CourseOutline,
        students: &[EnrollmentWrite],
        now: DateTime<Utc>,
    ) -> Result<Vec<PurchaseKind>, StorageError> {
        let course_id = outline.course.id;
        let lesson_ids = outline.lesson_ids();
        self.write(|state| {
            let mut kinds = Vec::with_capacity(students.len());
            for student in students {
                let student_id = student.student_id;
                if state.enrollments.contains_key(&(student_id, course_id)) {
                    return Err(StorageError::Conflict);
                }

                let had_prior = lesson_ids
                    .iter()
                    .any(|id| state.lesson_progress.contains_key(&(student_id, *id)));
                let kind = PurchaseKind::classify(student.payment.as_ref(), had_prior);

                state.enrollments.insert(
                    (student_id, course_id),
                    CourseEnrollment::new(student_id, course_id, student.payment.clone(), now),
                );
                for chapter in &outline.chapters {
                    let chapter_id = chapter.chapter.id;
                    state
                        .chapter_progress
                        .entry((student_id, chapter_id))
                        .or_insert_with(|| ChapterProgress::new(student_id, chapter_id, course_id));
                    for (lesson_id, lesson_kind) in &chapter.lessons {
                        state
                            .lesson_progress
                            .entry((student_id, *lesson_id))
                            .or_insert_with(|| {
                                LessonProgress::new(student_id, *lesson_id, chapter_id, *lesson_kind)
                            });
                    }
                }
                state
                    .summaries
                    .entry(course_id)
                    .or_insert_with(|| CourseSummaryStats::empty(course_id))
                    .record(kind);

                for chapter in &outline.chapters {
                    state.settle(student_id, chapter.chapter.id, course_id, now);
                }
                kinds.push(kind);
            }
            Ok(kinds)
        })
    }

    async fn unenroll(
        &self,
        outline: &CourseOutline,
        student_id: StudentId,
    ) -> Result<(), StorageError> {
        let course_id = outline.course.id;
        let lesson_ids = outline.lesson_ids();
        self.write(|state| {
            if state.enrollments.remove(&(student_id, course_id)).is_none() {
                return Err(StorageError::NotFound);
            }
            state
                .chapter_progress
                .retain(|_, c| !(c.student_id == student_id && c.course_id == course_id));
            state
                .answers
                .retain(|_, a| !(a.student_id == student_id && lesson_ids.contains(&a.lesson_id)));
            state
                .lesson_progress
                .retain(|_, p| !(p.student_id == student_id && lesson_ids.contains(&p.lesson_id)));
            Ok(())
        })
    }

    async fn enrolled_among(
        &self,
        course_id: CourseId,
        students: &[StudentId],
    ) -> Result<Vec<StudentId>, StorageError> {
        self.read(|state| {
            students
                .iter()
                .copied()
                .filter(|s| state.enrollments.contains_key(&(*s, course_id)))
                .collect()
        })
    }

    async fn summary_stats(&self, course_id: CourseId) -> Result<CourseSummaryStats, StorageError> {
        self.read(|state| {
            state
                .summaries
                .get(&course_id)
                .copied()
                .unwrap_or_else(|| CourseSummaryStats::empty(course_id))
        })
    }
}

//
// ─── REPORTING ────────────────────────────────────────────────────────────────
//

#[async_trait]
impl StatisticsRepository for InMemoryRepository {
    async fn course_statistics(
        &self,
        course_id: CourseId,
    ) -> Result<CourseStatistics, StorageError> {
        self.read(|state| {
            let enrollments: Vec<&CourseEnrollment> = state
                .enrollments
                .values()
                .filter(|e| e.course_id == course_id)
                .collect();
            let enrolled = count_u32(enrollments.len());

            let status_distribution = [
                CourseProgressStatus::NotStarted,
                CourseProgressStatus::InProgress,
                CourseProgressStatus::Completed,
            ]
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: count_u32(enrollments.iter().filter(|e| e.status == status).count()),
            })
            .collect::<Vec<_>>();
            let completed = status_distribution
                .iter()
                .find(|s| s.status == CourseProgressStatus::Completed)
                .map_or(0, |s| s.count);

            let (done, rows) = state
                .lesson_progress
                .values()
                .filter(|p| {
                    state.lesson_in_course(p.lesson_id, course_id)
                        && state.enrollments.contains_key(&(p.student_id, course_id))
                })
                .fold((0_u32, 0_u32), |(done, rows), p| {
                    (done + u32::from(p.is_completed()), rows + 1)
                });

            CourseStatistics {
                enrolled_count: enrolled,
                completion_percentage: percentage(completed, enrolled, 2),
                average_lesson_completion_percentage: percentage(done, rows, 0),
                status_distribution,
                purchases: state
                    .summaries
                    .get(&course_id)
                    .copied()
                    .unwrap_or_else(|| CourseSummaryStats::empty(course_id)),
            }
        })
    }

    async fn average_quiz_scores(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<QuizAverage>, StorageError> {
        self.read(|state| {
            let mut quizzes: Vec<&Lesson> = state
                .lessons
                .values()
                .filter(|l| l.course_id == course_id && l.kind.is_quiz())
                .collect();
            quizzes.sort_by_key(|l| (state.lesson_orders(l.id), l.id));

            quizzes
                .into_iter()
                .filter_map(|lesson| {
                    let scores: Vec<u32> = state
                        .lesson_progress
                        .values()
                        .filter(|p| p.lesson_id == lesson.id && p.is_completed())
                        .filter(|p| state.enrollments.contains_key(&(p.student_id, course_id)))
                        .map(|p| u32::from(p.quiz_score.unwrap_or(0)))
                        .collect();
                    let finished = count_u32(scores.len());
                    (finished > 0).then(|| {
                        let sum: u32 = scores.iter().sum();
                        QuizAverage {
                            lesson_id: lesson.id,
                            title: lesson.title.clone(),
                            average_score: (sum + finished / 2) / finished,
                            finished_count: finished,
                        }
                    })
                })
                .collect()
        })
    }

    async fn quiz_results(
        &self,
        query: &QuizResultQuery,
    ) -> Result<Vec<QuizResultRow>, StorageError> {
        self.read(|state| {
            let mut rows = state.quiz_rows(query);
            rows.sort_by(|a, b| {
                let primary = state.compare_results(query.sort, a, b);
                let primary = match query.direction {
                    SortDirection::Asc => primary,
                    SortDirection::Desc => primary.reverse(),
                };
                primary
                    .then_with(|| state.lesson_orders(a.lesson_id).cmp(&state.lesson_orders(b.lesson_id)))
                    .then_with(|| a.student_id.cmp(&b.student_id))
            });
            if let Some(limit) = query.limit {
                rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
            rows
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{AnswerKeyOption, AnswerPart, LessonKind, PaymentRef, QuestionType};
    use progress_core::time::fixed_now;

    fn chapter(id: u64, is_freemium: bool) -> Chapter {
        Chapter {
            id: ChapterId::new(id),
            course_id: CourseId::new(1),
            title: format!("Chapter {id}"),
            display_order: u32::try_from(id).unwrap(),
            is_freemium,
        }
    }

    async fn seeded() -> (InMemoryRepository, Lesson, Lesson) {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&Course {
            id: CourseId::new(1),
            title: "Rust".into(),
        })
        .await
        .unwrap();
        let ch = chapter(1, true);
        repo.upsert_chapter(&ch).await.unwrap();
        let text = Lesson::new(LessonId::new(10), &ch, "Intro", LessonKind::Text, 1, None).unwrap();
        let quiz = Lesson::new(LessonId::new(11), &ch, "Check", LessonKind::Quiz, 2, None).unwrap();
        repo.upsert_lesson(&text).await.unwrap();
        repo.upsert_lesson(&quiz).await.unwrap();
        let question = Question::new(
            QuestionId::new(100),
            quiz.id,
            QuestionType::SingleChoice,
            1,
            "Pick",
            vec![
                AnswerKeyOption::choice(1, 1, "yes", true),
                AnswerKeyOption::choice(2, 2, "no", false),
            ],
        )
        .unwrap();
        repo.upsert_question(&question).await.unwrap();
        (repo, text, quiz)
    }

    fn submission(quiz: &Lesson, student: StudentId, correct: bool) -> QuizSubmissionWrite {
        let outcome = QuizOutcome::from_counts(u32::from(correct), 1, 0);
        QuizSubmissionWrite {
            student_id: student,
            lesson: quiz.clone(),
            answers: vec![StudentAnswer {
                question_id: QuestionId::new(100),
                lesson_id: quiz.id,
                student_id: student,
                answers: vec![AnswerPart::choice(if correct { 1 } else { 2 })],
                is_correct: correct,
                grading: GradingState::Auto,
                answered_at: fixed_now(),
            }],
            outcome,
            now: fixed_now(),
        }
    }

    #[tokio::test]
    async fn submission_cascades_to_chapter_and_course() {
        let (repo, text, quiz) = seeded().await;
        let student = StudentId::new(7);
        let outline = repo.course_outline(CourseId::new(1)).await.unwrap().unwrap();
        repo.enroll(
            &outline,
            &[EnrollmentWrite {
                student_id: student,
                payment: None,
            }],
            fixed_now(),
        )
        .await
        .unwrap();

        let report = repo.mark_completed(student, &text, fixed_now()).await.unwrap();
        assert!(report.lesson_changed);
        assert!(!report.chapter_completed);

        let receipt = repo.record_submission(&submission(&quiz, student, true)).await.unwrap();
        assert!(receipt.report.chapter_completed);
        assert!(receipt.report.course_completed);

        let enrollment = repo.enrollment(student, CourseId::new(1)).await.unwrap().unwrap();
        assert_eq!(enrollment.finished_chapter_count, 1);
        assert_eq!(enrollment.status, CourseProgressStatus::Completed);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_state() {
        let (repo, _, quiz) = seeded().await;
        let student = StudentId::new(7);
        repo.record_submission(&submission(&quiz, student, true)).await.unwrap();

        let err = repo
            .record_submission(&submission(&quiz, student, false))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().len(), 1);
        let answers = repo.answers_for_lesson(student, quiz.id).await.unwrap();
        assert!(answers[0].is_correct);
    }

    #[tokio::test]
    async fn failure_midway_through_cascade_discards_earlier_steps() {
        let (repo, text, quiz) = seeded().await;
        let student = StudentId::new(7);
        let second = Question::new(
            QuestionId::new(101),
            quiz.id,
            QuestionType::TrueOrFalse,
            2,
            "Sure?",
            vec![
                AnswerKeyOption::choice(3, 1, "True", true),
                AnswerKeyOption::choice(4, 2, "False", false),
            ],
        )
        .unwrap();
        repo.upsert_question(&second).await.unwrap();
        let outline = repo.course_outline(CourseId::new(1)).await.unwrap().unwrap();
        repo.enroll(
            &outline,
            &[EnrollmentWrite {
                student_id: student,
                payment: None,
            }],
            fixed_now(),
        )
        .await
        .unwrap();
        repo.mark_completed(student, &text, fixed_now()).await.unwrap();

        let mut write = submission(&quiz, student, true);
        let stray = StudentAnswer {
            question_id: second.id,
            answers: vec![AnswerPart::choice(3)],
            ..write.answers[0].clone()
        };
        write.answers.push(stray.clone());
        repo.write(|state| {
            state.answers.insert((second.id, student), stray);
            Ok(())
        })
        .unwrap();

        let err = repo.record_submission(&write).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let answers = repo.answers_for_lesson(student, quiz.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_id, second.id);
        let progress = repo.lesson_progress(student, quiz.id).await.unwrap();
        assert!(progress.is_none_or(|p| p.completed_at.is_none()));
        assert!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().is_empty());

        let chapters = repo
            .chapter_progress_for_course(student, CourseId::new(1))
            .await
            .unwrap();
        assert_eq!(chapters[0].completed_lesson_count, 1);
        assert!(chapters[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn freemium_progress_is_counted_at_paid_enrollment() {
        let (repo, text, _) = seeded().await;
        let student = StudentId::new(8);
        repo.mark_completed(student, &text, fixed_now()).await.unwrap();
        assert!(
            repo.chapter_progress_for_course(student, CourseId::new(1))
                .await
                .unwrap()
                .is_empty()
        );

        let outline = repo.course_outline(CourseId::new(1)).await.unwrap().unwrap();
        let kinds = repo
            .enroll(
                &outline,
                &[EnrollmentWrite {
                    student_id: student,
                    payment: PaymentRef::new("pi_123"),
                }],
                fixed_now(),
            )
            .await
            .unwrap();
        assert_eq!(kinds, vec![PurchaseKind::PaidAfterFreemium]);

        let chapters = repo
            .chapter_progress_for_course(student, CourseId::new(1))
            .await
            .unwrap();
        assert_eq!(chapters[0].completed_lesson_count, 1);
        let stats = repo.summary_stats(CourseId::new(1)).await.unwrap();
        assert_eq!(stats.paid_purchased_after_freemium_count, 1);
        assert_eq!(stats.paid_purchased_count, 0);
    }

    #[tokio::test]
    async fn retake_guard_checks_attempt_counter() {
        let (repo, _, quiz) = seeded().await;
        let student = StudentId::new(9);
        repo.record_submission(&submission(&quiz, student, false)).await.unwrap();

        let stale = RetakeWrite {
            student_id: student,
            lesson: quiz.clone(),
            expected_attempts: 5,
        };
        assert!(matches!(
            repo.reset_for_retake(&stale).await.unwrap_err(),
            StorageError::Conflict
        ));

        let fresh = RetakeWrite {
            expected_attempts: 1,
            ..stale
        };
        let row = repo.reset_for_retake(&fresh).await.unwrap();
        assert_eq!(row.attempts, 2);
        assert!(repo.answers_for_lesson(student, quiz.id).await.unwrap().is_empty());
    }
}

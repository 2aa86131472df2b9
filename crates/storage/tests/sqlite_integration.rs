use chrono::Duration;
use progress_core::model::{
    AnswerKeyOption, AnswerPart, Chapter, ChapterId, Course, CourseId, CourseProgressStatus,
    GradingState, Lesson, LessonId, LessonKind, ManualEvaluation, PaymentRef, Question, QuestionId,
    QuestionType, QuizSettings, StudentAnswer, StudentId,
};
use progress_core::scoring::QuizOutcome;
use progress_core::statistics::{PurchaseKind, QuizResultQuery, QuizResultSort, SortDirection};
use progress_core::time::fixed_now;
use storage::repository::{
    CatalogRepository, EnrollmentRepository, EnrollmentWrite, LedgerPersistence,
    ManualGradeWrite, ProgressRepository, QuizSubmissionWrite, RetakeWrite, StatisticsRepository,
    StorageError,
};
use storage::sqlite::SqliteRepository;

const COURSE: CourseId = CourseId::new(1);

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

/// One chapter, one quiz lesson (threshold 50) with a single-choice and a
/// true/false question.
async fn seed_quiz_course(repo: &SqliteRepository) -> Lesson {
    repo.upsert_course(&Course {
        id: COURSE,
        title: "Ownership".into(),
    })
    .await
    .unwrap();
    let chapter = Chapter {
        id: ChapterId::new(1),
        course_id: COURSE,
        title: "Borrowing".into(),
        display_order: 1,
        is_freemium: false,
    };
    repo.upsert_chapter(&chapter).await.unwrap();

    let settings = QuizSettings::new(Some(50), Some(3), Some(24)).unwrap();
    let quiz = Lesson::new(
        LessonId::new(10),
        &chapter,
        "Checkpoint",
        LessonKind::Quiz,
        1,
        Some(settings),
    )
    .unwrap();
    repo.upsert_lesson(&quiz).await.unwrap();

    let single = Question::new(
        QuestionId::new(100),
        quiz.id,
        QuestionType::SingleChoice,
        1,
        "Who owns a moved value?",
        vec![
            AnswerKeyOption::choice(1, 1, "The receiver", true),
            AnswerKeyOption::choice(2, 2, "The sender", false),
        ],
    )
    .unwrap()
    .with_solution("Moves transfer ownership.");
    let boolean = Question::new(
        QuestionId::new(101),
        quiz.id,
        QuestionType::TrueOrFalse,
        2,
        "References may outlive their referent.",
        vec![
            AnswerKeyOption::choice(3, 1, "True", false),
            AnswerKeyOption::choice(4, 2, "False", true),
        ],
    )
    .unwrap();
    repo.upsert_question(&boolean).await.unwrap();
    repo.upsert_question(&single).await.unwrap();
    quiz
}

async fn enroll(repo: &SqliteRepository, student: StudentId, payment: Option<&str>) -> PurchaseKind {
    let outline = repo.course_outline(COURSE).await.unwrap().unwrap();
    let kinds = repo
        .enroll(
            &outline,
            &[EnrollmentWrite {
                student_id: student,
                payment: payment.and_then(PaymentRef::new),
            }],
            fixed_now(),
        )
        .await
        .unwrap();
    kinds[0]
}

fn answer(quiz: &Lesson, student: StudentId, question: u64, option: u64, correct: bool) -> StudentAnswer {
    StudentAnswer {
        question_id: QuestionId::new(question),
        lesson_id: quiz.id,
        student_id: student,
        answers: vec![AnswerPart::choice(option)],
        is_correct: correct,
        grading: GradingState::Auto,
        answered_at: fixed_now(),
    }
}

fn half_right(quiz: &Lesson, student: StudentId) -> QuizSubmissionWrite {
    QuizSubmissionWrite {
        student_id: student,
        lesson: quiz.clone(),
        answers: vec![
            answer(quiz, student, 100, 1, true),
            answer(quiz, student, 101, 3, false),
        ],
        outcome: QuizOutcome::from_counts(1, 2, 50),
        now: fixed_now(),
    }
}

#[tokio::test]
async fn catalog_round_trips_questions_and_settings() {
    let repo = connect("memdb_catalog").await;
    let quiz = seed_quiz_course(&repo).await;

    let fetched = repo.get_lesson(quiz.id).await.unwrap().unwrap();
    assert_eq!(fetched, quiz);
    assert_eq!(fetched.quiz_settings().unwrap().attempts_limit(), Some(3));

    let questions = repo.questions_for_lesson(quiz.id).await.unwrap();
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0].id, QuestionId::new(100));
    assert_eq!(
        questions[0].solution_explanation.as_deref(),
        Some("Moves transfer ownership.")
    );
    assert_eq!(questions[1].options().len(), 2);

    let outline = repo.course_outline(COURSE).await.unwrap().unwrap();
    assert_eq!(outline.chapters.len(), 1);
    assert_eq!(outline.lesson_ids(), vec![quiz.id]);
    assert!(repo.course_outline(CourseId::new(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn submission_cascades_in_one_transaction() {
    let repo = connect("memdb_cascade").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    assert_eq!(enroll(&repo, student, None).await, PurchaseKind::Free);

    let receipt = repo.record_submission(&half_right(&quiz, student)).await.unwrap();
    assert!(receipt.report.chapter_completed);
    assert!(receipt.report.course_completed);

    let progress = repo.lesson_progress(student, quiz.id).await.unwrap().unwrap();
    assert_eq!(progress.quiz_score, Some(50));
    assert!(progress.is_quiz_passed);
    assert_eq!(progress.completed_question_count, 2);
    assert_eq!(progress.last_attempt_at, Some(fixed_now()));

    let chapters = repo.chapter_progress_for_course(student, COURSE).await.unwrap();
    assert_eq!(chapters[0].completed_lesson_count, 1);
    assert!(chapters[0].completed_at.is_some());

    let enrollment = repo.enrollment(student, COURSE).await.unwrap().unwrap();
    assert_eq!(enrollment.finished_chapter_count, 1);
    assert_eq!(enrollment.status, CourseProgressStatus::Completed);

    let answers = repo.answers_for_lesson(student, quiz.id).await.unwrap();
    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0].answers, vec![AnswerPart::choice(1)]);
}

#[tokio::test]
async fn second_submission_conflicts_without_side_effects() {
    let repo = connect("memdb_conflict").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    enroll(&repo, student, None).await;
    repo.record_submission(&half_right(&quiz, student)).await.unwrap();

    let err = repo
        .record_submission(&half_right(&quiz, student))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    assert_eq!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failure_midway_through_cascade_rolls_back_everything() {
    let repo = connect("memdb_midway").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    enroll(&repo, student, None).await;

    // A stray answer for the second question makes the answer inserts fail
    // after the lesson row has already been updated in the transaction.
    sqlx::query(
        r#"
            INSERT INTO student_question_answers (
                question_id, student_id, lesson_id, answer,
                is_correct, grading, answered_at
            )
            VALUES (101, 7, 10, '[{"answerId":4}]', 1, ?1, ?2)
        "#,
    )
    .bind(GradingState::Auto.as_str())
    .bind(fixed_now())
    .execute(repo.pool())
    .await
    .unwrap();

    let err = repo
        .record_submission(&half_right(&quiz, student))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let progress = repo.lesson_progress(student, quiz.id).await.unwrap();
    assert!(progress.is_none_or(|p| p.completed_at.is_none() && p.quiz_score.is_none()));
    assert!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().is_empty());

    let answers = repo.answers_for_lesson(student, quiz.id).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].question_id, QuestionId::new(101));

    let chapters = repo.chapter_progress_for_course(student, COURSE).await.unwrap();
    assert_eq!(chapters[0].completed_lesson_count, 0);
    assert!(chapters[0].completed_at.is_none());
    let enrollment = repo.enrollment(student, COURSE).await.unwrap().unwrap();
    assert_eq!(enrollment.finished_chapter_count, 0);
}

#[tokio::test]
async fn manual_grade_recounts_and_updates_latest_attempt() {
    let repo = connect("memdb_regrade").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    enroll(&repo, student, None).await;

    let before = ManualGradeWrite {
        student_id: student,
        lesson: quiz.clone(),
        evaluations: vec![ManualEvaluation {
            question_id: QuestionId::new(101),
            is_correct: true,
        }],
        threshold: 50,
        now: fixed_now(),
    };
    assert!(matches!(
        repo.apply_manual_grade(&before).await.unwrap_err(),
        StorageError::Conflict
    ));

    repo.record_submission(&half_right(&quiz, student)).await.unwrap();
    let later = ManualGradeWrite {
        now: fixed_now() + Duration::hours(1),
        ..before
    };
    let first = repo.apply_manual_grade(&later).await.unwrap();
    let second = repo.apply_manual_grade(&later).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.score(), 100);

    let attempts = repo.attempts_for_lesson(student, quiz.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].correct_answers, 2);
    assert_eq!(attempts[0].updated_at, fixed_now() + Duration::hours(1));

    let progress = repo.lesson_progress(student, quiz.id).await.unwrap().unwrap();
    assert_eq!(progress.quiz_score, Some(100));
    assert_eq!(progress.completed_at, Some(fixed_now()));
    let answers = repo.answers_for_lesson(student, quiz.id).await.unwrap();
    assert_eq!(answers[1].grading, GradingState::Manual);
}

#[tokio::test]
async fn retake_clears_answers_and_keeps_aggregates() {
    let repo = connect("memdb_retake").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    enroll(&repo, student, None).await;
    repo.record_submission(&half_right(&quiz, student)).await.unwrap();

    let row = repo
        .reset_for_retake(&RetakeWrite {
            student_id: student,
            lesson: quiz.clone(),
            expected_attempts: 1,
        })
        .await
        .unwrap();
    assert_eq!(row.attempts, 2);
    assert!(!row.is_completed());
    assert!(row.is_started);

    assert!(repo.answers_for_lesson(student, quiz.id).await.unwrap().is_empty());
    let stored = repo.lesson_progress(student, quiz.id).await.unwrap().unwrap();
    assert_eq!(stored, row);

    let enrollment = repo.enrollment(student, COURSE).await.unwrap().unwrap();
    assert_eq!(enrollment.finished_chapter_count, 1);

    let again = repo
        .reset_for_retake(&RetakeWrite {
            student_id: student,
            lesson: quiz.clone(),
            expected_attempts: 2,
        })
        .await
        .unwrap_err();
    assert!(matches!(again, StorageError::Conflict));

    let mut resubmit = half_right(&quiz, student);
    resubmit.now = fixed_now() + Duration::days(2);
    repo.record_submission(&resubmit).await.unwrap();
    assert_eq!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unenroll_removes_progress_and_keeps_history() {
    let repo = connect("memdb_unenroll").await;
    let quiz = seed_quiz_course(&repo).await;
    let student = StudentId::new(7);
    enroll(&repo, student, Some("pi_1")).await;
    repo.record_submission(&half_right(&quiz, student)).await.unwrap();

    let outline = repo.course_outline(COURSE).await.unwrap().unwrap();
    repo.unenroll(&outline, student).await.unwrap();

    assert!(repo.enrollment(student, COURSE).await.unwrap().is_none());
    assert!(repo.chapter_progress_for_course(student, COURSE).await.unwrap().is_empty());
    assert!(repo.lesson_progress_for_course(student, COURSE).await.unwrap().is_empty());
    assert!(repo.answers_for_lesson(student, quiz.id).await.unwrap().is_empty());
    assert_eq!(repo.attempts_for_lesson(student, quiz.id).await.unwrap().len(), 1);

    assert!(matches!(
        repo.unenroll(&outline, student).await.unwrap_err(),
        StorageError::NotFound
    ));
    assert_eq!(repo.summary_stats(COURSE).await.unwrap().paid_purchased_count, 1);
}

#[tokio::test]
async fn enrollment_is_all_or_nothing() {
    let repo = connect("memdb_bulk").await;
    seed_quiz_course(&repo).await;
    enroll(&repo, StudentId::new(2), None).await;

    let outline = repo.course_outline(COURSE).await.unwrap().unwrap();
    let batch: Vec<EnrollmentWrite> = [1, 2, 3]
        .into_iter()
        .map(|id| EnrollmentWrite {
            student_id: StudentId::new(id),
            payment: None,
        })
        .collect();
    let err = repo.enroll(&outline, &batch, fixed_now()).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let enrolled = repo
        .enrolled_among(COURSE, &[StudentId::new(1), StudentId::new(2), StudentId::new(3)])
        .await
        .unwrap();
    assert_eq!(enrolled, vec![StudentId::new(2)]);
    assert_eq!(repo.summary_stats(COURSE).await.unwrap().free_purchased_count, 1);
}

#[tokio::test]
async fn reporting_filters_and_sorts_quiz_results() {
    let repo = connect("memdb_reporting").await;
    let quiz = seed_quiz_course(&repo).await;
    for id in [1, 2, 3] {
        enroll(&repo, StudentId::new(id), None).await;
    }

    repo.record_submission(&half_right(&quiz, StudentId::new(1)))
        .await
        .unwrap();
    let mut perfect = half_right(&quiz, StudentId::new(2));
    perfect.answers[1] = answer(&quiz, StudentId::new(2), 101, 4, true);
    perfect.outcome = QuizOutcome::from_counts(2, 2, 50);
    perfect.now = fixed_now() + Duration::minutes(5);
    repo.record_submission(&perfect).await.unwrap();

    let stats = repo.course_statistics(COURSE).await.unwrap();
    assert_eq!(stats.enrolled_count, 3);
    assert_eq!(stats.completion_percentage, 66.67);
    assert_eq!(stats.average_lesson_completion_percentage, 67.0);
    assert_eq!(stats.purchases.free_purchased_count, 3);

    let averages = repo.average_quiz_scores(COURSE).await.unwrap();
    assert_eq!(averages.len(), 1);
    assert_eq!(averages[0].average_score, 75);
    assert_eq!(averages[0].finished_count, 2);

    let by_score = repo
        .quiz_results(
            &QuizResultQuery::for_course(COURSE)
                .sorted_by(QuizResultSort::Score, SortDirection::Desc),
        )
        .await
        .unwrap();
    let students: Vec<_> = by_score.iter().map(|r| r.student_id).collect();
    assert_eq!(students, vec![StudentId::new(2), StudentId::new(1)]);

    let limited = repo
        .quiz_results(
            &QuizResultQuery::for_course(COURSE)
                .student(StudentId::new(1))
                .passed(true)
                .limit(5),
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].score, 50);
}

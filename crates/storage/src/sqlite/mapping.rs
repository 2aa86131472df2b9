use chrono::{DateTime, Utc};
use progress_core::model::{
    AnswerKeyOption, AnswerPart, ChapterId, ChapterProgress, CourseEnrollment, CourseId,
    CourseProgressStatus, GradingState, Lesson, LessonId, LessonKind, LessonProgress, OptionId,
    PaymentRef, QuestionId, QuestionType, QuizAttempt, QuizSettings, StudentAnswer, StudentId,
};
use progress_core::statistics::QuizResultRow;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, surfacing uniqueness violations as conflicts.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Connection(e.to_string()),
    }
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn u8_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn get_u32(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    u32_from_i64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn chapter_id_from_i64(v: i64) -> Result<ChapterId, StorageError> {
    Ok(ChapterId::new(i64_to_u64("chapter_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

//
// ─── CATALOG ROWS ─────────────────────────────────────────────────────────────
//

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let kind = LessonKind::parse(row.try_get::<String, _>("kind").map_err(ser)?.as_str())
        .map_err(ser)?;

    let settings = if kind.is_quiz() {
        let threshold = row
            .try_get::<Option<i64>, _>("threshold_score")
            .map_err(ser)?
            .map(|v| u8_from_i64("threshold_score", v))
            .transpose()?;
        let attempts_limit = row
            .try_get::<Option<i64>, _>("attempts_limit")
            .map_err(ser)?
            .map(|v| u32_from_i64("attempts_limit", v))
            .transpose()?;
        let cooldown_hours = row
            .try_get::<Option<i64>, _>("cooldown_hours")
            .map_err(ser)?
            .map(|v| u32_from_i64("cooldown_hours", v))
            .transpose()?;
        Some(QuizSettings::new(threshold, attempts_limit, cooldown_hours).map_err(ser)?)
    } else {
        None
    };

    Lesson::from_parts(
        lesson_id_from_i64(row.try_get("id").map_err(ser)?)?,
        chapter_id_from_i64(row.try_get("chapter_id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        kind,
        get_u32(row, "display_order")?,
        settings,
    )
    .map_err(ser)
}

pub(crate) fn map_option_row(row: &SqliteRow) -> Result<AnswerKeyOption, StorageError> {
    Ok(AnswerKeyOption {
        id: OptionId::new(i64_to_u64("option_id", row.try_get("id").map_err(ser)?)?),
        display_order: get_u32(row, "display_order")?,
        text: row.try_get("option_text").map_err(ser)?,
        is_correct: row.try_get("is_correct").map_err(ser)?,
        matched_word: row.try_get("matched_word").map_err(ser)?,
        scale_answer: row
            .try_get::<Option<i64>, _>("scale_answer")
            .map_err(ser)?
            .map(|v| u8_from_i64("scale_answer", v))
            .transpose()?,
    })
}

pub(crate) fn parse_question_type(raw: &str) -> Result<QuestionType, StorageError> {
    QuestionType::parse(raw).map_err(ser)
}

//
// ─── PROGRESS ROWS ────────────────────────────────────────────────────────────
//

pub(crate) fn map_lesson_progress_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    Ok(LessonProgress {
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        chapter_id: chapter_id_from_i64(row.try_get("chapter_id").map_err(ser)?)?,
        is_started: row.try_get("is_started").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        completed_question_count: get_u32(row, "completed_question_count")?,
        quiz_score: row
            .try_get::<Option<i64>, _>("quiz_score")
            .map_err(ser)?
            .map(|v| u8_from_i64("quiz_score", v))
            .transpose()?,
        is_quiz_passed: row.try_get("is_quiz_passed").map_err(ser)?,
        attempts: get_u32(row, "attempts")?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(ser)?,
    })
}

pub(crate) fn map_chapter_progress_row(row: &SqliteRow) -> Result<ChapterProgress, StorageError> {
    Ok(ChapterProgress {
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        chapter_id: chapter_id_from_i64(row.try_get("chapter_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        completed_lesson_count: get_u32(row, "completed_lesson_count")?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<CourseEnrollment, StorageError> {
    let status: String = row.try_get("progress").map_err(ser)?;
    let status = CourseProgressStatus::parse(&status)
        .ok_or_else(|| StorageError::Serialization(format!("invalid progress: {status}")))?;
    Ok(CourseEnrollment {
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        payment: row
            .try_get::<Option<String>, _>("payment_id")
            .map_err(ser)?
            .and_then(PaymentRef::new),
        enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
        finished_chapter_count: get_u32(row, "finished_chapter_count")?,
        status,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

pub(crate) fn encode_answer(parts: &[AnswerPart]) -> Result<String, StorageError> {
    serde_json::to_string(parts).map_err(ser)
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<StudentAnswer, StorageError> {
    let raw: String = row.try_get("answer").map_err(ser)?;
    let grading: String = row.try_get("grading").map_err(ser)?;
    Ok(StudentAnswer {
        question_id: question_id_from_i64(row.try_get("question_id").map_err(ser)?)?,
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        answers: serde_json::from_str(&raw).map_err(ser)?,
        is_correct: row.try_get("is_correct").map_err(ser)?,
        grading: GradingState::parse(&grading)
            .ok_or_else(|| StorageError::Serialization(format!("invalid grading: {grading}")))?,
        answered_at: row.try_get("answered_at").map_err(ser)?,
    })
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<QuizAttempt, StorageError> {
    Ok(QuizAttempt {
        id: Some(row.try_get("id").map_err(ser)?),
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        correct_answers: get_u32(row, "correct_answers")?,
        wrong_answers: get_u32(row, "wrong_answers")?,
        score: u8_from_i64("score", row.try_get("score").map_err(ser)?)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_quiz_result_row(row: &SqliteRow) -> Result<QuizResultRow, StorageError> {
    let completed_at: DateTime<Utc> = row.try_get("completed_at").map_err(ser)?;
    Ok(QuizResultRow {
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        lesson_title: row.try_get("lesson_title").map_err(ser)?,
        chapter_id: chapter_id_from_i64(row.try_get("chapter_id").map_err(ser)?)?,
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        score: row
            .try_get::<Option<i64>, _>("quiz_score")
            .map_err(ser)?
            .map(|v| u8_from_i64("quiz_score", v))
            .transpose()?
            .unwrap_or(0),
        is_passed: row.try_get("is_quiz_passed").map_err(ser)?,
        attempts: get_u32(row, "attempts")?,
        completed_at,
    })
}

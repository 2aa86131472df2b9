use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Catalog tables, student-side progress tables, attempt history and course counters.
const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            display_order INTEGER NOT NULL CHECK (display_order >= 0),
            is_freemium INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lessons (
            id INTEGER PRIMARY KEY,
            chapter_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            display_order INTEGER NOT NULL CHECK (display_order >= 0),
            threshold_score INTEGER CHECK (threshold_score BETWEEN 0 AND 100),
            attempts_limit INTEGER CHECK (attempts_limit >= 0),
            cooldown_hours INTEGER CHECK (cooldown_hours >= 0),
            FOREIGN KEY (chapter_id) REFERENCES chapters(id) ON DELETE CASCADE,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            lesson_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            display_order INTEGER NOT NULL CHECK (display_order >= 0),
            title TEXT NOT NULL,
            solution_explanation TEXT,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS question_options (
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            display_order INTEGER NOT NULL CHECK (display_order >= 0),
            option_text TEXT NOT NULL,
            is_correct INTEGER NOT NULL,
            matched_word TEXT,
            scale_answer INTEGER CHECK (scale_answer BETWEEN 1 AND 5),
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_question_answers (
            question_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            answer TEXT NOT NULL,
            is_correct INTEGER NOT NULL,
            grading TEXT NOT NULL,
            answered_at TEXT NOT NULL,
            PRIMARY KEY (question_id, student_id),
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_lesson_progress (
            student_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            chapter_id INTEGER NOT NULL,
            is_started INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            completed_question_count INTEGER NOT NULL DEFAULT 0 CHECK (completed_question_count >= 0),
            quiz_score INTEGER CHECK (quiz_score BETWEEN 0 AND 100),
            is_quiz_passed INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 1 CHECK (attempts >= 1),
            last_attempt_at TEXT,
            PRIMARY KEY (student_id, lesson_id),
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_chapter_progress (
            student_id INTEGER NOT NULL,
            chapter_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            completed_lesson_count INTEGER NOT NULL DEFAULT 0 CHECK (completed_lesson_count >= 0),
            completed_at TEXT,
            PRIMARY KEY (student_id, chapter_id),
            FOREIGN KEY (chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_courses (
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            payment_id TEXT,
            enrolled_at TEXT NOT NULL,
            finished_chapter_count INTEGER NOT NULL DEFAULT 0 CHECK (finished_chapter_count >= 0),
            progress TEXT NOT NULL,
            completed_at TEXT,
            PRIMARY KEY (student_id, course_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS quiz_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            correct_answers INTEGER NOT NULL CHECK (correct_answers >= 0),
            wrong_answers INTEGER NOT NULL CHECK (wrong_answers >= 0),
            score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS course_summary_stats (
            course_id INTEGER PRIMARY KEY,
            free_purchased_count INTEGER NOT NULL DEFAULT 0,
            paid_purchased_count INTEGER NOT NULL DEFAULT 0,
            paid_purchased_after_freemium_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_lessons_chapter_order
            ON lessons (chapter_id, display_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_questions_lesson_order
            ON questions (lesson_id, display_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_answers_student_lesson
            ON student_question_answers (student_id, lesson_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_lesson_progress_student_chapter
            ON student_lesson_progress (student_id, chapter_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_quiz_attempts_student_lesson
            ON quiz_attempts (student_id, lesson_id, id);
    ",
];

/// Runs versioned migrations, one transaction per version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    for (version, statements) in [(1_i64, SCHEMA_V1)] {
        if is_applied(pool, version).await? {
            continue;
        }
        tracing::debug!(version, "applying schema migration");

        let mut tx = pool.begin().await?;
        for &statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}

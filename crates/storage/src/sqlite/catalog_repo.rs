use progress_core::model::{
    Chapter, ChapterOutline, Course, CourseId, CourseOutline, Lesson, LessonId, Question,
};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{
        chapter_id_from_i64, course_id_from_i64, db_err, id_i64, map_lesson_row,
        map_option_row, parse_question_type, question_id_from_i64, ser,
        u32_from_i64,
    },
};
use crate::repository::{CatalogRepository, StorageError};

const LESSON_COLUMNS: &str = r"
    id, chapter_id, course_id, title, kind, display_order,
    threshold_score, attempts_limit, cooldown_hours
";

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO courses (id, title)
                VALUES (?1, ?2)
                ON CONFLICT(id) DO UPDATE SET title = excluded.title
            ",
        )
        .bind(id_i64("course_id", course.id.value())?)
        .bind(&course.title)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError> {
        let course_id = id_i64("course_id", chapter.course_id.value())?;
        let exists = sqlx::query("SELECT 1 FROM courses WHERE id = ?1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
                INSERT INTO chapters (id, course_id, title, display_order, is_freemium)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    course_id = excluded.course_id,
                    title = excluded.title,
                    display_order = excluded.display_order,
                    is_freemium = excluded.is_freemium
            ",
        )
        .bind(id_i64("chapter_id", chapter.id.value())?)
        .bind(course_id)
        .bind(&chapter.title)
        .bind(i64::from(chapter.display_order))
        .bind(chapter.is_freemium)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let chapter_id = id_i64("chapter_id", lesson.chapter_id.value())?;
        let course_id = id_i64("course_id", lesson.course_id.value())?;
        let owner: Option<i64> = sqlx::query_scalar("SELECT course_id FROM chapters WHERE id = ?1")
            .bind(chapter_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match owner {
            Some(owner) if owner == course_id => {}
            Some(_) => return Err(StorageError::Conflict),
            None => return Err(StorageError::NotFound),
        }

        let settings = lesson.quiz_settings();
        sqlx::query(
            r"
                INSERT INTO lessons (
                    id, chapter_id, course_id, title, kind, display_order,
                    threshold_score, attempts_limit, cooldown_hours
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    chapter_id = excluded.chapter_id,
                    course_id = excluded.course_id,
                    title = excluded.title,
                    kind = excluded.kind,
                    display_order = excluded.display_order,
                    threshold_score = excluded.threshold_score,
                    attempts_limit = excluded.attempts_limit,
                    cooldown_hours = excluded.cooldown_hours
            ",
        )
        .bind(id_i64("lesson_id", lesson.id.value())?)
        .bind(chapter_id)
        .bind(course_id)
        .bind(&lesson.title)
        .bind(lesson.kind.as_str())
        .bind(i64::from(lesson.display_order))
        .bind(settings.and_then(|s| s.threshold_score()).map(i64::from))
        .bind(settings.and_then(|s| s.attempts_limit()).map(i64::from))
        .bind(settings.and_then(|s| s.cooldown_hours()).map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let question_id = id_i64("question_id", question.id.value())?;
        let lesson_id = id_i64("lesson_id", question.lesson_id.value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let exists = sqlx::query("SELECT 1 FROM lessons WHERE id = ?1")
            .bind(lesson_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
                INSERT INTO questions (id, lesson_id, kind, display_order, title, solution_explanation)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    lesson_id = excluded.lesson_id,
                    kind = excluded.kind,
                    display_order = excluded.display_order,
                    title = excluded.title,
                    solution_explanation = excluded.solution_explanation
            ",
        )
        .bind(question_id)
        .bind(lesson_id)
        .bind(question.kind.as_str())
        .bind(i64::from(question.display_order))
        .bind(&question.title)
        .bind(question.solution_explanation.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM question_options WHERE question_id = ?1")
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for option in question.options() {
            sqlx::query(
                r"
                    INSERT INTO question_options (
                        id, question_id, display_order, option_text,
                        is_correct, matched_word, scale_answer
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )
            .bind(id_i64("option_id", option.id.value())?)
            .bind(question_id)
            .bind(i64::from(option.display_order))
            .bind(&option.text)
            .bind(option.is_correct)
            .bind(option.matched_word.as_deref())
            .bind(option.scale_answer.map(i64::from))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(&format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"))
            .bind(id_i64("lesson_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn questions_for_lesson(&self, id: LessonId) -> Result<Vec<Question>, StorageError> {
        let lesson_id = id_i64("lesson_id", id.value())?;

        let rows = sqlx::query(
            r"
                SELECT id, kind, display_order, title, solution_explanation
                FROM questions
                WHERE lesson_id = ?1
                ORDER BY display_order ASC, id ASC
            ",
        )
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let option_rows = sqlx::query(
            r"
                SELECT o.id, o.question_id, o.display_order, o.option_text,
                       o.is_correct, o.matched_word, o.scale_answer
                FROM question_options o
                JOIN questions q ON q.id = o.question_id
                WHERE q.lesson_id = ?1
                ORDER BY o.question_id ASC, o.display_order ASC, o.id ASC
            ",
        )
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            let question_id = question_id_from_i64(row.try_get("id").map_err(ser)?)?;
            let mut options = Vec::new();
            for option_row in &option_rows {
                let owner = question_id_from_i64(option_row.try_get("question_id").map_err(ser)?)?;
                if owner == question_id {
                    options.push(map_option_row(option_row)?);
                }
            }

            let kind: String = row.try_get("kind").map_err(ser)?;
            let order: i64 = row.try_get("display_order").map_err(ser)?;
            let question = Question::new(
                question_id,
                id,
                parse_question_type(&kind)?,
                u32_from_i64("display_order", order)?,
                row.try_get::<String, _>("title").map_err(ser)?,
                options,
            )
            .map_err(ser)?;
            let solution: Option<String> = row.try_get("solution_explanation").map_err(ser)?;
            questions.push(match solution {
                Some(text) => question.with_solution(text),
                None => question,
            });
        }
        Ok(questions)
    }

    async fn course_outline(&self, id: CourseId) -> Result<Option<CourseOutline>, StorageError> {
        let course_id = id_i64("course_id", id.value())?;

        let Some(course_row) = sqlx::query("SELECT id, title FROM courses WHERE id = ?1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        let course = Course {
            id: course_id_from_i64(course_row.try_get("id").map_err(ser)?)?,
            title: course_row.try_get("title").map_err(ser)?,
        };

        let chapter_rows = sqlx::query(
            r"
                SELECT id, course_id, title, display_order, is_freemium
                FROM chapters
                WHERE course_id = ?1
                ORDER BY display_order ASC, id ASC
            ",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let lesson_rows = sqlx::query(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE course_id = ?1 ORDER BY display_order ASC, id ASC"
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let lessons = lesson_rows
            .iter()
            .map(map_lesson_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut chapters = Vec::with_capacity(chapter_rows.len());
        for row in chapter_rows {
            let order: i64 = row.try_get("display_order").map_err(ser)?;
            let chapter = Chapter {
                id: chapter_id_from_i64(row.try_get("id").map_err(ser)?)?,
                course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
                title: row.try_get("title").map_err(ser)?,
                display_order: u32_from_i64("display_order", order)?,
                is_freemium: row.try_get("is_freemium").map_err(ser)?,
            };
            let lessons = lessons
                .iter()
                .filter(|l| l.chapter_id == chapter.id)
                .map(|l| (l.id, l.kind))
                .collect();
            chapters.push(ChapterOutline { chapter, lessons });
        }

        Ok(Some(CourseOutline { course, chapters }))
    }
}


use progress_core::model::{CourseId, CourseProgressStatus};
use progress_core::statistics::{
    CourseStatistics, QuizAverage, QuizResultQuery, QuizResultRow, QuizResultSort, SortDirection,
    StatusCount, percentage,
};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{
    SqliteRepository,
    enrollment_repo::load_summary,
    mapping::{db_err, id_i64, lesson_id_from_i64, map_quiz_result_row, ser, u32_from_i64},
};
use crate::repository::{StatisticsRepository, StorageError};

/// Translate a typed quiz-result query into SQL. Every filter value is bound;
/// only the fixed sort fragments are pushed as text.
pub(crate) fn quiz_results_query(
    query: &QuizResultQuery,
) -> Result<QueryBuilder<'static, Sqlite>, StorageError> {
    let mut qb = QueryBuilder::new(
        r"
            SELECT
                p.lesson_id, l.title AS lesson_title, l.chapter_id, p.student_id,
                p.quiz_score, p.is_quiz_passed, p.attempts, p.completed_at
            FROM student_lesson_progress p
            JOIN lessons l ON l.id = p.lesson_id
            JOIN chapters c ON c.id = l.chapter_id
            JOIN student_courses sc
                ON sc.student_id = p.student_id AND sc.course_id = l.course_id
            WHERE l.kind = 'quiz'
              AND p.completed_at IS NOT NULL
              AND l.course_id = ",
    );
    qb.push_bind(id_i64("course_id", query.course_id.value())?);

    if let Some(lesson_id) = query.lesson_id {
        qb.push(" AND p.lesson_id = ");
        qb.push_bind(id_i64("lesson_id", lesson_id.value())?);
    }
    if let Some(student_id) = query.student_id {
        qb.push(" AND p.student_id = ");
        qb.push_bind(id_i64("student_id", student_id.value())?);
    }
    if let Some(passed) = query.passed {
        qb.push(" AND p.is_quiz_passed = ");
        qb.push_bind(passed);
    }

    let dir = match query.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    qb.push(" ORDER BY ");
    match query.sort {
        QuizResultSort::LessonOrder => {
            qb.push(format!("c.display_order {dir}, l.display_order {dir}"));
        }
        QuizResultSort::Score => {
            qb.push(format!(
                "p.quiz_score {dir}, c.display_order ASC, l.display_order ASC"
            ));
        }
        QuizResultSort::CompletedAt => {
            qb.push(format!(
                "p.completed_at {dir}, c.display_order ASC, l.display_order ASC"
            ));
        }
    }
    qb.push(", p.student_id ASC");

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));
    }
    Ok(qb)
}

#[async_trait::async_trait]
impl StatisticsRepository for SqliteRepository {
    async fn course_statistics(
        &self,
        course_id: CourseId,
    ) -> Result<CourseStatistics, StorageError> {
        let course = id_i64("course_id", course_id.value())?;

        let status_rows = sqlx::query(
            r"
                SELECT progress, COUNT(*) AS n
                FROM student_courses
                WHERE course_id = ?1
                GROUP BY progress
            ",
        )
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut status_distribution: Vec<StatusCount> = [
            CourseProgressStatus::NotStarted,
            CourseProgressStatus::InProgress,
            CourseProgressStatus::Completed,
        ]
        .into_iter()
        .map(|status| StatusCount { status, count: 0 })
        .collect();
        for row in status_rows {
            let raw: String = row.try_get("progress").map_err(ser)?;
            let status = CourseProgressStatus::parse(&raw)
                .ok_or_else(|| StorageError::Serialization(format!("invalid progress: {raw}")))?;
            let n = u32_from_i64("n", row.try_get("n").map_err(ser)?)?;
            if let Some(slot) = status_distribution.iter_mut().find(|s| s.status == status) {
                slot.count = n;
            }
        }
        let enrolled: u32 = status_distribution.iter().map(|s| s.count).sum();
        let completed = status_distribution
            .iter()
            .find(|s| s.status == CourseProgressStatus::Completed)
            .map_or(0, |s| s.count);

        let (rows, done): (i64, i64) = sqlx::query_as(
            r"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN p.completed_at IS NOT NULL THEN 1 ELSE 0 END), 0)
                FROM student_lesson_progress p
                JOIN lessons l ON l.id = p.lesson_id
                JOIN student_courses sc
                    ON sc.student_id = p.student_id AND sc.course_id = l.course_id
                WHERE l.course_id = ?1
            ",
        )
        .bind(course)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let purchases = load_summary(&mut conn, course_id).await?;

        Ok(CourseStatistics {
            enrolled_count: enrolled,
            completion_percentage: percentage(completed, enrolled, 2),
            average_lesson_completion_percentage: percentage(
                u32_from_i64("done", done)?,
                u32_from_i64("rows", rows)?,
                0,
            ),
            status_distribution,
            purchases,
        })
    }

    async fn average_quiz_scores(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<QuizAverage>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    l.id AS lesson_id,
                    l.title AS title,
                    COUNT(*) AS finished,
                    SUM(COALESCE(p.quiz_score, 0)) AS total
                FROM lessons l
                JOIN chapters c ON c.id = l.chapter_id
                JOIN student_lesson_progress p ON p.lesson_id = l.id
                JOIN student_courses sc
                    ON sc.student_id = p.student_id AND sc.course_id = l.course_id
                WHERE l.course_id = ?1
                  AND l.kind = 'quiz'
                  AND p.completed_at IS NOT NULL
                GROUP BY l.id, l.title, c.display_order, l.display_order
                ORDER BY c.display_order ASC, l.display_order ASC, l.id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let finished = u32_from_i64("finished", row.try_get("finished").map_err(ser)?)?;
            let total = u32_from_i64("total", row.try_get("total").map_err(ser)?)?;
            out.push(QuizAverage {
                lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
                title: row.try_get("title").map_err(ser)?,
                average_score: (total + finished / 2) / finished.max(1),
                finished_count: finished,
            });
        }
        Ok(out)
    }

    async fn quiz_results(
        &self,
        query: &QuizResultQuery,
    ) -> Result<Vec<QuizResultRow>, StorageError> {
        let mut qb = quiz_results_query(query)?;
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(map_quiz_result_row).collect()
    }
}

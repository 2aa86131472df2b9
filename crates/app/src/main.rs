use std::path::Path;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use progress_core::model::{
    CourseId, LessonId, ManualEvaluation, PaymentRef, QuestionSubmission, StudentId,
};
use progress_core::statistics::{QuizResultQuery, QuizResultSort, SortDirection};
use services::{AppServices, Clock, EnrollmentError, ProgressError, QuizError};

mod seed;

#[derive(Parser)]
#[command(
    name = "progressctl",
    version,
    about = "Quiz evaluation and student progress tracking"
)]
struct Cli {
    /// SQLite database URL
    #[arg(
        long,
        global = true,
        env = "PROGRESS_DB_URL",
        default_value = "sqlite:progress.sqlite3?mode=rwc"
    )]
    db: String,

    /// Log filter directives
    #[arg(
        long,
        global = true,
        env = "RUST_LOG",
        default_value = "info,services=debug,storage=info"
    )]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LessonTarget {
    #[arg(long)]
    lesson: LessonId,
    #[arg(long)]
    student: StudentId,
}

#[derive(Args)]
struct CourseTarget {
    #[arg(long)]
    course: CourseId,
    #[arg(long)]
    student: StudentId,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    LessonOrder,
    Score,
    CompletedAt,
}

impl From<SortArg> for QuizResultSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::LessonOrder => QuizResultSort::LessonOrder,
            SortArg::Score => QuizResultSort::Score,
            SortArg::CompletedAt => QuizResultSort::CompletedAt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Load the demo course
    Seed,
    /// Enroll a student, paid when --payment is given
    Enroll {
        #[command(flatten)]
        target: CourseTarget,
        #[arg(long)]
        payment: Option<String>,
    },
    /// Free enrollment for several students at once
    EnrollMany {
        #[arg(long)]
        course: CourseId,
        #[arg(long, value_delimiter = ',', required = true)]
        students: Vec<StudentId>,
    },
    /// Remove an enrollment and all progress under it
    Unenroll {
        #[command(flatten)]
        target: CourseTarget,
    },
    /// Mark a lesson as opened
    Start {
        #[command(flatten)]
        target: LessonTarget,
    },
    /// Complete a non-quiz lesson
    Complete {
        #[command(flatten)]
        target: LessonTarget,
    },
    /// Submit quiz answers as JSON: [{"questionId":1,"answers":[{"answerId":1}]}]
    Submit {
        #[command(flatten)]
        target: LessonTarget,
        #[arg(long)]
        answers: String,
    },
    /// Override correctness as JSON: [{"questionId":3,"isCorrect":true}]
    Grade {
        #[command(flatten)]
        target: LessonTarget,
        #[arg(long)]
        evaluations: String,
    },
    /// Clear quiz answers so the quiz can be taken again
    Retake {
        #[command(flatten)]
        target: LessonTarget,
    },
    /// Show whether a retake is currently allowed
    RetakeStatus {
        #[command(flatten)]
        target: LessonTarget,
    },
    /// Show the stored quiz result
    Result {
        #[command(flatten)]
        target: LessonTarget,
    },
    /// Show a student's progress in a course
    Progress {
        #[command(flatten)]
        target: CourseTarget,
    },
    /// Course completion and purchase statistics
    Stats {
        #[arg(long)]
        course: CourseId,
    },
    /// Quiz results for a course
    Results {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        lesson: Option<LessonId>,
        #[arg(long)]
        student: Option<StudentId>,
        #[arg(long)]
        passed: Option<bool>,
        #[arg(long, value_enum, default_value = "lesson-order")]
        sort: SortArg,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseReport<T: Serialize, U: Serialize> {
    statistics: T,
    quiz_averages: U,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Create the parent directory of a file-backed database URL.
fn prepare_sqlite_file(db_url: &str) -> anyhow::Result<()> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .with_context(|| format!("not a sqlite url: {db_url}"))?;
    if rest.starts_with(":memory:") || rest.contains("mode=memory") {
        return Ok(());
    }

    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() {
        anyhow::bail!("sqlite url has no path: {db_url}");
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    prepare_sqlite_file(&cli.db)?;
    let services = AppServices::new_sqlite(&cli.db, Clock::default())
        .await
        .with_context(|| format!("opening {}", cli.db))?;

    match cli.command {
        Commands::Migrate => print_json(&serde_json::json!({ "migrated": true })),
        Commands::Seed => print_json(&seed::seed(services.catalog().as_ref()).await?),
        Commands::Enroll { target, payment } => {
            let payment = payment.and_then(PaymentRef::new);
            let kind = services
                .enrollments()
                .enroll_course(target.course, target.student, payment)
                .await?;
            print_json(&serde_json::json!({ "purchase": kind }))
        }
        Commands::EnrollMany { course, students } => {
            let kinds = services
                .enrollments()
                .enroll_students(course, &students)
                .await?;
            print_json(&serde_json::json!({ "enrolled": kinds.len() }))
        }
        Commands::Unenroll { target } => {
            services
                .enrollments()
                .unenroll_course(target.course, target.student)
                .await?;
            print_json(&serde_json::json!({ "unenrolled": true }))
        }
        Commands::Start { target } => print_json(
            &services
                .progress()
                .mark_lesson_started(target.lesson, target.student)
                .await?,
        ),
        Commands::Complete { target } => print_json(
            &services
                .progress()
                .mark_lesson_completed(target.lesson, target.student)
                .await?,
        ),
        Commands::Submit { target, answers } => {
            let answers: Vec<QuestionSubmission> =
                serde_json::from_str(&answers).context("parsing --answers")?;
            print_json(
                &services
                    .quizzes()
                    .submit_quiz_answers(target.lesson, target.student, answers)
                    .await?,
            )
        }
        Commands::Grade {
            target,
            evaluations,
        } => {
            let evaluations: Vec<ManualEvaluation> =
                serde_json::from_str(&evaluations).context("parsing --evaluations")?;
            print_json(
                &services
                    .quizzes()
                    .manual_grade(target.lesson, target.student, evaluations)
                    .await?,
            )
        }
        Commands::Retake { target } => {
            services
                .quizzes()
                .delete_answers_for_retake(target.lesson, target.student)
                .await?;
            print_json(&serde_json::json!({ "cleared": true }))
        }
        Commands::RetakeStatus { target } => print_json(
            &services
                .quizzes()
                .retake_status(target.lesson, target.student)
                .await?,
        ),
        Commands::Result { target } => print_json(
            &services
                .quizzes()
                .quiz_result(target.lesson, target.student)
                .await?,
        ),
        Commands::Progress { target } => print_json(
            &services
                .progress()
                .course_progress(target.student, target.course)
                .await?,
        ),
        Commands::Stats { course } => {
            let statistics = services.statistics();
            print_json(&CourseReport {
                statistics: statistics.course_statistics(course).await?,
                quiz_averages: statistics.average_quiz_scores(course).await?,
            })
        }
        Commands::Results {
            course,
            lesson,
            student,
            passed,
            sort,
            desc,
            limit,
        } => {
            let direction = if desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            let query = QuizResultQuery {
                course_id: course,
                lesson_id: lesson,
                student_id: student,
                passed,
                sort: sort.into(),
                direction,
                limit,
            };
            print_json(&services.statistics().quiz_results(&query).await?)
        }
    }
}

/// Rejected requests exit with 1, everything else with 2.
fn exit_code(err: &anyhow::Error) -> i32 {
    let rejected = err
        .downcast_ref::<QuizError>()
        .is_some_and(QuizError::is_precondition)
        || err
            .downcast_ref::<ProgressError>()
            .is_some_and(|e| !matches!(e, ProgressError::Storage(_)))
        || err
            .downcast_ref::<EnrollmentError>()
            .is_some_and(|e| !matches!(e, EnrollmentError::Storage(_)));
    if rejected { 1 } else { 2 }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod collector;
mod db;
mod delivery;
mod models;
mod normalize;
mod report;
mod risk;
mod rules;
mod session;

use collector::{AlertLogBuffer, NoopAlertSink};
use models::{InterventionKind, RiskLevel, Severity, StudentSnapshot};
use session::SessionStore;

#[derive(Parser)]
#[command(name = "student-early-warning")]
#[command(about = "Rule-based student risk scoring and advisor alerts", long_about = None)]
struct Cli {
    /// Session file holding notifications, the de-dup digest and interventions
    #[arg(long, global = true, default_value = "session.json")]
    session: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every student in a CSV file
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "level"])
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        student: Option<String>,
        /// Only show students at this risk level
        #[arg(long, value_enum)]
        level: Option<LevelArg>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Collect alerts, rank students and queue new notifications
    Alerts {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "Advisor")]
        issued_by: String,
        /// Also record every alert in the Postgres alert log
        #[arg(long, default_value_t = false)]
        log_db: bool,
    },
    /// List pending notifications
    Inbox {
        #[arg(long)]
        student: Option<String>,
    },
    /// Acknowledge a pending notification by its inbox index
    Ack {
        #[arg(long)]
        student: String,
        #[arg(long)]
        index: usize,
    },
    /// Email a pending notification to the student again
    Resend {
        #[arg(long)]
        student: String,
        #[arg(long)]
        index: usize,
        #[arg(long, default_value = "outbox.jsonl")]
        outbox: PathBuf,
    },
    /// Send a manual notification to a student
    Notify {
        #[arg(long)]
        student: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "Advisor")]
        advisor: String,
    },
    /// Record an advisor intervention
    Intervene {
        #[arg(long)]
        student: String,
        #[arg(long, value_enum)]
        kind: InterventionArg,
        #[arg(long)]
        advisor: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Show a student's intervention history
    Interventions {
        #[arg(long)]
        student: String,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        summary_csv: Option<PathBuf>,
    },
    /// Create or upgrade the alert log schema
    InitDb,
    /// Show recently logged alerts
    History {
        #[arg(long)]
        student: Option<String>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LevelArg {
    High,
    Medium,
    Low,
}

impl From<LevelArg> for RiskLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::High => RiskLevel::High,
            LevelArg::Medium => RiskLevel::Medium,
            LevelArg::Low => RiskLevel::Low,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InterventionArg {
    AcademicSupport,
    FinancialAid,
    AttendanceOutreach,
    MentalHealthReferral,
    CareerCounseling,
    Other,
}

impl From<InterventionArg> for InterventionKind {
    fn from(arg: InterventionArg) -> Self {
        match arg {
            InterventionArg::AcademicSupport => InterventionKind::AcademicSupport,
            InterventionArg::FinancialAid => InterventionKind::FinancialAid,
            InterventionArg::AttendanceOutreach => InterventionKind::AttendanceOutreach,
            InterventionArg::MentalHealthReferral => InterventionKind::MentalHealthReferral,
            InterventionArg::CareerCounseling => InterventionKind::CareerCounseling,
            InterventionArg::Other => InterventionKind::Other,
        }
    }
}

const DEFAULT_LOG_DIRECTIVE: &str = "student_early_warning=info";

/// `RUST_LOG` wins when it is set and parses; otherwise info for this crate.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

fn load_students(csv: &Path) -> anyhow::Result<Vec<StudentSnapshot>> {
    let records = normalize::read_csv(csv)?;
    Ok(normalize::normalize_all(&records))
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to use the alert log")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(rust_log.as_deref()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            csv,
            student,
            level,
            limit,
        } => {
            let students = load_students(&csv)?;
            let level = level.map(RiskLevel::from);
            let selected: Vec<_> = students
                .iter()
                .filter(|snapshot| student.as_deref().map_or(true, |id| snapshot.id == id))
                .map(|snapshot| (snapshot, risk::assess(snapshot)))
                .filter(|(_, assessment)| {
                    level.map_or(true, |wanted| assessment.risk_level == wanted)
                })
                .take(limit)
                .collect();

            if selected.is_empty() {
                println!("No matching students in {}.", csv.display());
                return Ok(());
            }

            for (snapshot, assessment) in selected {
                println!(
                    "- {} score {:.2} ({}) academic {:.2} financial {:.2} engagement {:.2}",
                    snapshot.display_name(),
                    assessment.overall_score,
                    assessment.risk_level,
                    assessment.academic_score,
                    assessment.financial_score,
                    assessment.engagement_score
                );
                for alert in &assessment.alerts {
                    println!("    [{}] {}: {}", alert.severity, alert.alert_type, alert.message);
                }
            }
        }
        Commands::Alerts {
            csv,
            limit,
            issued_by,
            log_db,
        } => {
            let students = load_students(&csv)?;
            let store = SessionStore::load(&cli.session)?;

            let cohort = if log_db {
                let buffer = AlertLogBuffer::new();
                let cohort = collector::collect_alerts(&students, &buffer);
                if buffer.is_empty() {
                    tracing::info!("no alerts to write to the alert log");
                } else {
                    tracing::debug!("flushing {} buffered alerts", buffer.len());
                    let entries = buffer.drain();
                    let stored = match connect().await {
                        Ok(pool) => db::log_alerts(&pool, &entries).await,
                        Err(err) => Err(err),
                    };
                    match stored {
                        Ok(count) => tracing::info!("{count} new alerts written to the alert log"),
                        Err(err) => tracing::warn!("alert log unavailable: {err:#}"),
                    }
                }
                cohort
            } else {
                collector::collect_alerts(&students, &NoopAlertSink)
            };

            let created = store.ingest_cohort(&cohort, &issued_by);
            store.save(&cli.session)?;

            if cohort.students.is_empty() {
                println!("No students require attention.");
                return Ok(());
            }

            println!(
                "{} students with {} alerts ({} new notifications):",
                cohort.students.len(),
                cohort.total_alerts,
                created.len()
            );
            for student in cohort.students.iter().take(limit) {
                println!(
                    "- {} {} risk, score {:.2}, {} critical / {} total",
                    student.name.as_deref().unwrap_or(&student.student_id),
                    student.assessment.risk_level,
                    student.assessment.overall_score,
                    student.assessment.critical_alert_count,
                    student.assessment.total_alert_count()
                );
            }
        }
        Commands::Inbox { student } => {
            let store = SessionStore::load(&cli.session)?;
            let pending: Vec<_> = match student {
                Some(student_id) => {
                    let notes = store.notifications_for(&student_id);
                    if notes.is_empty() && store.is_acknowledged(&student_id) {
                        println!("All notifications for {student_id} have been acknowledged.");
                        return Ok(());
                    }
                    if notes.is_empty() {
                        Vec::new()
                    } else {
                        vec![(student_id, notes)]
                    }
                }
                None => store.pending(),
            };

            if pending.is_empty() {
                println!("No alerts at the moment.");
                return Ok(());
            }

            for (student_id, notes) in pending {
                println!("Student {student_id}");
                for (index, note) in notes.iter().enumerate() {
                    println!(
                        "  [{index}] ({}) {} at {}: {}",
                        Severity::from_subject(&note.subject),
                        note.subject,
                        note.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        note.message
                    );
                }
            }
        }
        Commands::Ack { student, index } => {
            let store = SessionStore::load(&cli.session)?;
            if store.acknowledge(&student, index) {
                store.save(&cli.session)?;
                println!("Acknowledged notification {index} for {student}.");
            } else {
                println!("Failed to acknowledge: no notification {index} for {student}.");
            }
        }
        Commands::Resend {
            student,
            index,
            outbox,
        } => {
            let store = SessionStore::load(&cli.session)?;
            let settings = delivery::EmailSettings::from_env();
            let domain = std::env::var("STUDENT_EMAIL_DOMAIN")
                .unwrap_or_else(|_| delivery::DEFAULT_STUDENT_EMAIL_DOMAIN.to_string());
            let mailer = delivery::SpoolMailer::new(outbox);

            let report = delivery::resend(
                &store,
                &student,
                index,
                settings.as_ref().map_err(String::as_str),
                &domain,
                &mailer,
            );
            if report.success {
                println!("{} (spooled to {})", report.reason, mailer.outbox().display());
            } else {
                println!("Email not sent: {}", report.reason);
            }
        }
        Commands::Notify {
            student,
            subject,
            message,
            advisor,
        } => {
            let store = SessionStore::load(&cli.session)?;
            store.add_notification(&student, &subject, &message, &advisor);
            store.save(&cli.session)?;
            println!("Notification queued for {student}.");
        }
        Commands::Intervene {
            student,
            kind,
            advisor,
            notes,
        } => {
            let store = SessionStore::load(&cli.session)?;
            let entry = store.record_intervention(&student, kind.into(), &advisor, &notes)?;
            store.save(&cli.session)?;
            println!("{} intervention recorded for {student}.", entry.kind);
        }
        Commands::Interventions { student } => {
            let store = SessionStore::load(&cli.session)?;
            let history = store.interventions_for(&student);

            if history.is_empty() {
                println!("No interventions recorded yet.");
                return Ok(());
            }

            for entry in history {
                println!(
                    "- {} (by {}) {}: {}",
                    entry.kind,
                    entry.advisor,
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.notes
                );
            }
        }
        Commands::Report {
            csv,
            out,
            summary_csv,
        } => {
            let students = load_students(&csv)?;
            let cohort = collector::collect_alerts(&students, &NoopAlertSink);
            let source = csv.display().to_string();
            let report = report::build_report(&source, Utc::now(), &students, &cohort);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());

            if let Some(path) = summary_csv {
                let rows = report::write_summary_csv(&students, &path)?;
                println!("Summary of {rows} students written to {}.", path.display());
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::History {
            student,
            since_days,
        } => {
            let pool = connect().await?;
            let since = db::cutoff(Utc::now(), since_days)?;
            let alerts = db::fetch_alert_log(&pool, since, student.as_deref()).await?;

            if alerts.is_empty() {
                println!("No alerts logged for this window.");
                return Ok(());
            }

            for alert in alerts {
                println!(
                    "- {} {} [{}] {} via {} at {}",
                    alert.student_id,
                    alert.alert_type,
                    alert.severity,
                    alert.message,
                    alert.source,
                    alert.logged_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}

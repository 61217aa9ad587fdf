use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AlertType, CohortAlerts, RiskAssessment, RiskLevel, Severity, StudentSnapshot};
use crate::risk;
use crate::rules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTypeSummary {
    pub alert_type: AlertType,
    pub count: usize,
    pub critical: usize,
}

pub fn summarize_by_type(cohort: &CohortAlerts) -> Vec<AlertTypeSummary> {
    let mut map: BTreeMap<AlertType, (usize, usize)> = BTreeMap::new();

    for student in &cohort.students {
        for alert in &student.assessment.alerts {
            let entry = map.entry(alert.alert_type).or_insert((0, 0));
            entry.0 += 1;
            if alert.severity == Severity::Critical {
                entry.1 += 1;
            }
        }
    }

    let mut summaries: Vec<AlertTypeSummary> = map
        .into_iter()
        .map(|(alert_type, (count, critical))| AlertTypeSummary {
            alert_type,
            count,
            critical,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

/// Up to three short risk phrases for a student, e.g. `Low GPA, Unpaid fees`.
pub fn brief_summary(snapshot: &StudentSnapshot) -> String {
    let mut parts = Vec::new();

    if snapshot.gpa < rules::GPA_CRITICAL {
        parts.push("Low GPA");
    } else if snapshot.gpa < rules::GPA_WARNING {
        parts.push("At-risk GPA");
    }
    if snapshot.unpaid_fees > rules::FEES_CRITICAL {
        parts.push("Unpaid fees");
    }
    if snapshot.attendance_pct < rules::ATTENDANCE_WARNING {
        parts.push("Low attendance");
    }
    if snapshot.warnings_count >= rules::WARNINGS_CRITICAL {
        parts.push("Multiple warnings");
    }
    if snapshot.counseling_visits < rules::COUNSELING_VISITS_MIN
        || snapshot.engagement_score < rules::ENGAGEMENT_LOW
    {
        parts.push("Low engagement");
    }

    if parts.is_empty() {
        return "No major risks".to_string();
    }
    parts.truncate(3);
    parts.join(", ")
}

pub fn summary_line(snapshot: &StudentSnapshot, assessment: &RiskAssessment) -> String {
    format!("{} risk — {}", assessment.risk_level, brief_summary(snapshot))
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    #[serde(rename = "Student ID")]
    student_id: &'a str,
    #[serde(rename = "Risk")]
    risk: RiskLevel,
    #[serde(rename = "Score")]
    score: f64,
    #[serde(rename = "Summary")]
    summary: String,
}

pub fn write_summary_csv(students: &[StudentSnapshot], out: &Path) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("failed to create {}", out.display()))?;

    for snapshot in students {
        let assessment = risk::assess(snapshot);
        writer.serialize(SummaryRow {
            student_id: &snapshot.id,
            risk: assessment.risk_level,
            score: assessment.overall_score,
            summary: summary_line(snapshot, &assessment),
        })?;
    }

    writer.flush()?;
    Ok(students.len())
}

pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    students: &[StudentSnapshot],
    cohort: &CohortAlerts,
) -> String {
    let summaries = summarize_by_type(cohort);
    let assessments: Vec<RiskAssessment> = students.iter().map(risk::assess).collect();

    let mut output = String::new();

    let _ = writeln!(output, "# Student Early Warning Report");
    let _ = writeln!(
        output,
        "Generated from {} at {} ({} students)",
        source,
        generated_at.format("%Y-%m-%d %H:%M"),
        students.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Levels");

    for level in [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low] {
        let count = assessments
            .iter()
            .filter(|assessment| assessment.risk_level == level)
            .count();
        let _ = writeln!(output, "- {level}: {count}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alert Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No alerts raised for this cohort.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} alerts ({} critical)",
                summary.alert_type, summary.count, summary.critical
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts Requiring Attention");

    if cohort.students.is_empty() {
        let _ = writeln!(output, "No students with alerts.");
    } else {
        for student in cohort.students.iter().take(10) {
            let label = match &student.name {
                Some(name) => format!("{name} ({})", student.student_id),
                None => student.student_id.clone(),
            };
            let messages: Vec<&str> = student
                .assessment
                .alerts
                .iter()
                .map(|alert| alert.message.as_str())
                .collect();
            let _ = writeln!(
                output,
                "- {} {} risk, score {:.2}, {} critical / {} total: {}",
                label,
                student.assessment.risk_level,
                student.assessment.overall_score,
                student.assessment.critical_alert_count,
                student.assessment.total_alert_count(),
                messages.join("; ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Student Summaries");

    if students.is_empty() {
        let _ = writeln!(output, "No students loaded.");
    } else {
        for (snapshot, assessment) in students.iter().zip(assessments.iter()) {
            let _ = writeln!(
                output,
                "- {}: {}",
                snapshot.id,
                summary_line(snapshot, assessment)
            );
        }
    }

    output
}

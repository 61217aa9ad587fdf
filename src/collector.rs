use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::models::{AlertLogEntry, AlertRecord, CohortAlerts, FlaggedStudent, StudentSnapshot};
use crate::risk;

pub const RULE_ENGINE_SOURCE: &str = "rule_engine";

/// Destination for every alert the collector produces. Implementations are
/// best-effort: the collector ignores whatever they return.
pub trait AlertSink {
    fn log_alert(&self, entry: &AlertLogEntry) -> anyhow::Result<()>;
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn log_alert(&self, _entry: &AlertLogEntry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Buffers entries in memory so they can be flushed to the durable log once
/// the pass is over.
#[derive(Debug, Default)]
pub struct AlertLogBuffer {
    entries: Mutex<Vec<AlertLogEntry>>,
}

impl AlertLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<AlertLogEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *entries)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for AlertLogBuffer {
    fn log_alert(&self, entry: &AlertLogEntry) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

fn forward(sink: &dyn AlertSink, student_id: &str, alert: &AlertRecord) {
    let entry = AlertLogEntry {
        student_id: student_id.to_string(),
        alert_type: alert.alert_type,
        severity: alert.severity,
        message: alert.message.clone(),
        source: RULE_ENGINE_SOURCE.to_string(),
        logged_at: Utc::now(),
    };
    if let Err(err) = sink.log_alert(&entry) {
        tracing::debug!(
            "alert log forward failed for {student_id} ({}): {err:#}",
            alert.alert_type
        );
    }
}

/// Orders the cohort by critical count, then total alert count, both
/// descending. Stable, so full ties keep their input order.
pub fn rank(students: &mut [FlaggedStudent]) {
    students.sort_by(|a, b| {
        b.assessment
            .critical_alert_count
            .cmp(&a.assessment.critical_alert_count)
            .then_with(|| {
                b.assessment
                    .total_alert_count()
                    .cmp(&a.assessment.total_alert_count())
            })
    });
}

/// Scores every student, keeps those with at least one alert, forwards each
/// alert to `sink` and returns the ranked cohort.
pub fn collect_alerts(students: &[StudentSnapshot], sink: &dyn AlertSink) -> CohortAlerts {
    let mut flagged = Vec::new();
    let mut total_alerts = 0usize;

    for snapshot in students {
        let assessment = risk::assess(snapshot);
        if assessment.alerts.is_empty() {
            continue;
        }

        for alert in &assessment.alerts {
            forward(sink, &snapshot.id, alert);
        }
        total_alerts += assessment.alerts.len();

        flagged.push(FlaggedStudent {
            student_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            advisor: snapshot.advisor.clone(),
            assessment,
        });
    }

    rank(&mut flagged);
    tracing::debug!(
        "{} of {} students flagged with {total_alerts} alerts",
        flagged.len(),
        students.len()
    );

    CohortAlerts {
        students: flagged,
        total_alerts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinancialAidStatus, Severity};

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn log_alert(&self, _entry: &AlertLogEntry) -> anyhow::Result<()> {
            anyhow::bail!("alert store offline")
        }
    }

    fn calm(id: &str) -> StudentSnapshot {
        let mut snapshot = StudentSnapshot::with_defaults(id);
        snapshot.counseling_visits = 2;
        snapshot
    }

    fn at_risk(id: &str) -> StudentSnapshot {
        StudentSnapshot {
            gpa: 1.5,
            warnings_count: 3,
            attendance_pct: 60.0,
            financial_aid_status: FinancialAidStatus::Delayed,
            ..calm(id)
        }
    }

    fn flagged(id: &str, critical: usize, warnings: usize) -> FlaggedStudent {
        let mut assessment = risk::assess(&calm(id));
        assessment.alerts = (0..critical)
            .map(|_| Severity::Critical)
            .chain((0..warnings).map(|_| Severity::Warning))
            .map(|severity| AlertRecord {
                alert_type: crate::models::AlertType::Gpa,
                severity,
                message: String::new(),
            })
            .collect();
        assessment.critical_alert_count = critical;
        assessment.warning_alert_count = warnings;
        FlaggedStudent {
            student_id: id.to_string(),
            name: None,
            advisor: None,
            assessment,
        }
    }

    #[test]
    fn only_students_with_alerts_are_returned() {
        let students = vec![calm("S1"), at_risk("S2"), calm("S3")];
        let cohort = collect_alerts(&students, &NoopAlertSink);

        assert_eq!(cohort.students.len(), 1);
        assert_eq!(cohort.students[0].student_id, "S2");
        assert_eq!(cohort.total_alerts, cohort.students[0].assessment.alerts.len());
    }

    #[test]
    fn critical_count_dominates_total_count() {
        let mut students = vec![flagged("B", 1, 4), flagged("A", 2, 1)];
        rank(&mut students);

        assert_eq!(students[0].student_id, "A");
        assert_eq!(students[0].assessment.total_alert_count(), 3);
        assert_eq!(students[1].assessment.total_alert_count(), 5);
    }

    #[test]
    fn total_count_breaks_ties_and_full_ties_keep_order() {
        let mut students = vec![
            flagged("first", 1, 0),
            flagged("second", 1, 2),
            flagged("third", 1, 0),
        ];
        rank(&mut students);

        let order: Vec<&str> = students.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(order, vec!["second", "first", "third"]);
    }

    #[test]
    fn sink_failures_do_not_change_the_cohort() {
        let students = vec![at_risk("S1"), calm("S2"), at_risk("S3")];
        let with_noop = collect_alerts(&students, &NoopAlertSink);
        let with_failure = collect_alerts(&students, &FailingSink);

        assert_eq!(with_noop, with_failure);
    }

    #[test]
    fn buffer_receives_every_alert() {
        let buffer = AlertLogBuffer::new();
        let cohort = collect_alerts(&[at_risk("S1"), at_risk("S2")], &buffer);

        assert_eq!(buffer.len(), cohort.total_alerts);
        let entries = buffer.drain();
        assert!(entries.iter().all(|entry| entry.source == RULE_ENGINE_SOURCE));
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn scores_do_not_depend_on_batch_order() {
        let ordered = vec![at_risk("S1"), calm("S2"), at_risk("S3")];
        let mut reversed = ordered.clone();
        reversed.reverse();

        let a = collect_alerts(&ordered, &NoopAlertSink);
        let b = collect_alerts(&reversed, &NoopAlertSink);
        for student in &a.students {
            let twin = b
                .students
                .iter()
                .find(|other| other.student_id == student.student_id)
                .unwrap();
            assert_eq!(student.assessment, twin.assessment);
        }
    }
}

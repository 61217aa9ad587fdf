use crate::models::{AlertRecord, AlertType, FinancialAidStatus, Severity, StudentSnapshot};

pub const GPA_CRITICAL: f64 = 2.0;
pub const GPA_WARNING: f64 = 2.5;
pub const FEES_CRITICAL: f64 = 500.0;
pub const FEES_WARNING: f64 = 100.0;
pub const ATTENDANCE_WARNING: f64 = 80.0;
pub const ENGAGEMENT_LOW: f64 = 50.0;
pub const COUNSELING_VISITS_MIN: u32 = 1;
pub const CREDITS_FRESHMAN: u32 = 30;
pub const WARNINGS_CRITICAL: u32 = 2;

/// Result of a single rule: a tier plus the rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub severity: Severity,
    pub message: String,
}

impl RuleOutcome {
    fn none() -> Self {
        Self {
            severity: Severity::None,
            message: String::new(),
        }
    }

    fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            message,
        }
    }

    fn critical(message: String) -> Self {
        Self {
            severity: Severity::Critical,
            message,
        }
    }

    pub fn into_alert(self, alert_type: AlertType) -> Option<AlertRecord> {
        if self.severity == Severity::None {
            return None;
        }
        Some(AlertRecord {
            alert_type,
            severity: self.severity,
            message: self.message,
        })
    }
}

pub fn gpa_alert(gpa: f64) -> RuleOutcome {
    if gpa < GPA_CRITICAL {
        RuleOutcome::critical(format!("Critical GPA: {gpa:.2}"))
    } else if gpa < GPA_WARNING {
        RuleOutcome::warning(format!("Warning GPA: {gpa:.2}"))
    } else {
        RuleOutcome::none()
    }
}

pub fn financial_alert(unpaid_fees: f64, aid_status: &FinancialAidStatus) -> RuleOutcome {
    if unpaid_fees > FEES_CRITICAL || aid_status.is_delayed() {
        RuleOutcome::critical(format!("Financial risk: ${unpaid_fees:.2}"))
    } else if unpaid_fees > FEES_WARNING {
        RuleOutcome::warning(format!("Outstanding: ${unpaid_fees:.2}"))
    } else {
        RuleOutcome::none()
    }
}

pub fn attendance_alert(attendance_pct: f64) -> RuleOutcome {
    if attendance_pct < ATTENDANCE_WARNING {
        RuleOutcome::warning(format!("Attendance: {attendance_pct:.2}%"))
    } else {
        RuleOutcome::none()
    }
}

/// Missing counseling is reported ahead of a low engagement score.
pub fn engagement_alert(engagement_score: f64, counseling_visits: u32) -> RuleOutcome {
    if counseling_visits < COUNSELING_VISITS_MIN {
        RuleOutcome::warning("No counseling visits".to_string())
    } else if engagement_score < ENGAGEMENT_LOW {
        RuleOutcome::warning(format!("Low engagement: {engagement_score:.2}"))
    } else {
        RuleOutcome::none()
    }
}

pub fn credits_alert(credits: u32, is_freshman: bool) -> RuleOutcome {
    if credits < CREDITS_FRESHMAN && is_freshman {
        RuleOutcome::critical(format!("Dropout risk: {credits} credits"))
    } else if credits < CREDITS_FRESHMAN {
        RuleOutcome::warning(format!("Low credits: {credits}"))
    } else {
        RuleOutcome::none()
    }
}

pub fn warnings_alert(warnings_count: u32) -> RuleOutcome {
    if warnings_count >= WARNINGS_CRITICAL {
        RuleOutcome::critical(format!("{warnings_count} warnings"))
    } else if warnings_count >= 1 {
        RuleOutcome::warning(format!("{warnings_count} warning(s)"))
    } else {
        RuleOutcome::none()
    }
}

/// Freshman status as callers derive it. This shares the Credits rule's own
/// threshold, so through `evaluate` a low-credit student is always critical.
pub fn is_freshman(credits: u32) -> bool {
    credits < CREDITS_FRESHMAN
}

pub fn evaluate_rule(alert_type: AlertType, snapshot: &StudentSnapshot) -> RuleOutcome {
    match alert_type {
        AlertType::Gpa => gpa_alert(snapshot.gpa),
        AlertType::Financial => {
            financial_alert(snapshot.unpaid_fees, &snapshot.financial_aid_status)
        }
        AlertType::Attendance => attendance_alert(snapshot.attendance_pct),
        AlertType::Engagement => {
            engagement_alert(snapshot.engagement_score, snapshot.counseling_visits)
        }
        AlertType::Credits => credits_alert(snapshot.credits, is_freshman(snapshot.credits)),
        AlertType::Warnings => warnings_alert(snapshot.warnings_count),
    }
}

/// Runs all six rules in a fixed order and keeps the non-`none` results.
pub fn evaluate(snapshot: &StudentSnapshot) -> Vec<AlertRecord> {
    AlertType::ALL
        .iter()
        .filter_map(|alert_type| evaluate_rule(*alert_type, snapshot).into_alert(*alert_type))
        .collect()
}

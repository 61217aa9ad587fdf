use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinancialAidStatus {
    #[default]
    OnTime,
    Delayed,
    PaymentPlan,
    Other(String),
}

impl FinancialAidStatus {
    pub fn parse(raw: &str) -> Self {
        let folded: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "" | "ontime" | "active" => FinancialAidStatus::OnTime,
            "delayed" => FinancialAidStatus::Delayed,
            "paymentplan" => FinancialAidStatus::PaymentPlan,
            _ => FinancialAidStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, FinancialAidStatus::Delayed)
    }
}

/// A fully defaulted, clamped view of one student's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub advisor: Option<String>,
    pub gpa: f64,
    pub credits: u32,
    pub warnings_count: u32,
    pub unpaid_fees: f64,
    pub financial_aid_status: FinancialAidStatus,
    pub attendance_pct: f64,
    pub counseling_visits: u32,
    pub engagement_score: f64,
}

impl StudentSnapshot {
    pub const DEFAULT_GPA: f64 = 3.0;
    pub const DEFAULT_CREDITS: u32 = 60;
    pub const DEFAULT_ATTENDANCE: f64 = 90.0;
    pub const DEFAULT_ENGAGEMENT: f64 = 70.0;

    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            advisor: None,
            gpa: Self::DEFAULT_GPA,
            credits: Self::DEFAULT_CREDITS,
            warnings_count: 0,
            unpaid_fees: 0.0,
            financial_aid_status: FinancialAidStatus::OnTime,
            attendance_pct: Self::DEFAULT_ATTENDANCE,
            counseling_visits: 0,
            engagement_score: Self::DEFAULT_ENGAGEMENT,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "GPA")]
    Gpa,
    Financial,
    Attendance,
    Engagement,
    Credits,
    Warnings,
}

impl AlertType {
    pub const ALL: [AlertType; 6] = [
        AlertType::Gpa,
        AlertType::Financial,
        AlertType::Attendance,
        AlertType::Engagement,
        AlertType::Credits,
        AlertType::Warnings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Gpa => "GPA",
            AlertType::Financial => "Financial",
            AlertType::Attendance => "Attendance",
            AlertType::Engagement => "Engagement",
            AlertType::Credits => "Credits",
            AlertType::Warnings => "Warnings",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so that `Critical > Warning > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Recovers the tier from a notification subject such as `GPA - CRITICAL`.
    pub fn from_subject(subject: &str) -> Self {
        let upper = subject.to_uppercase();
        if upper.contains("CRITICAL") {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
}

impl AlertRecord {
    pub fn subject(&self) -> String {
        format!(
            "{} - {}",
            self.alert_type,
            self.severity.as_str().to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::High
        } else if score >= 40.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    AcademicHighRisk,
    AttendanceAlert,
    FinancialRisk,
    DropoutRisk,
    LowEngagement,
    HighAttritionWarnings,
    StopOutRisk,
}

pub type RiskFlags = BTreeSet<RiskFlag>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub academic_score: f64,
    pub financial_score: f64,
    pub engagement_score: f64,
    pub alerts: Vec<AlertRecord>,
    pub flags: RiskFlags,
    pub critical_alert_count: usize,
    pub warning_alert_count: usize,
}

impl RiskAssessment {
    pub fn total_alert_count(&self) -> usize {
        self.alerts.len()
    }
}

/// One entry of the ranked "alerts requiring attention" cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedStudent {
    pub student_id: String,
    pub name: Option<String>,
    pub advisor: Option<String>,
    pub assessment: RiskAssessment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortAlerts {
    pub students: Vec<FlaggedStudent>,
    pub total_alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLogEntry {
    pub student_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub source: String,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub student_id: String,
    pub subject: String,
    pub message: String,
    pub issued_by: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterventionKind {
    AcademicSupport,
    FinancialAid,
    AttendanceOutreach,
    MentalHealthReferral,
    CareerCounseling,
    NotificationAcknowledged,
    Other,
}

impl InterventionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionKind::AcademicSupport => "Academic Support",
            InterventionKind::FinancialAid => "Financial Aid",
            InterventionKind::AttendanceOutreach => "Attendance Outreach",
            InterventionKind::MentalHealthReferral => "Mental Health Referral",
            InterventionKind::CareerCounseling => "Career Counseling",
            InterventionKind::NotificationAcknowledged => "Notification Acknowledged",
            InterventionKind::Other => "Other",
        }
    }
}

impl fmt::Display for InterventionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionLogEntry {
    pub kind: InterventionKind,
    pub advisor: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

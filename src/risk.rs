use crate::models::{RiskAssessment, RiskFlag, RiskFlags, RiskLevel, Severity, StudentSnapshot};
use crate::rules;

const ACADEMIC_WEIGHT: f64 = 0.4;
const FINANCIAL_WEIGHT: f64 = 0.3;
const ENGAGEMENT_WEIGHT: f64 = 0.3;

const FEES_CEILING: f64 = 500.0;
const CREDITS_TARGET: f64 = 120.0;
const DELAYED_AID_RISK: f64 = 50.0;
const NO_COUNSELING_RISK: f64 = 50.0;

/// `min(100, max(0, x))`
pub fn clamp_pct(value: f64) -> f64 {
    value.max(0.0).min(100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn academic_score(snapshot: &StudentSnapshot) -> f64 {
    let gpa_risk = clamp_pct((4.0 - snapshot.gpa) / 4.0 * 100.0);
    let credits_risk = clamp_pct((CREDITS_TARGET - snapshot.credits as f64) / CREDITS_TARGET * 100.0);
    let warnings_risk = (snapshot.warnings_count as f64 * 50.0).min(100.0);
    0.5 * gpa_risk + 0.3 * credits_risk + 0.2 * warnings_risk
}

pub fn financial_score(snapshot: &StudentSnapshot) -> f64 {
    let fees_risk = clamp_pct(snapshot.unpaid_fees / FEES_CEILING * 100.0);
    let aid_risk = if snapshot.financial_aid_status.is_delayed() {
        DELAYED_AID_RISK
    } else {
        0.0
    };
    0.6 * fees_risk + 0.4 * aid_risk
}

pub fn engagement_score(snapshot: &StudentSnapshot) -> f64 {
    let attendance_risk = clamp_pct(100.0 - snapshot.attendance_pct);
    let counseling_risk = if snapshot.counseling_visits < rules::COUNSELING_VISITS_MIN {
        NO_COUNSELING_RISK
    } else {
        0.0
    };
    let engagement_risk = clamp_pct(100.0 - snapshot.engagement_score);
    0.4 * attendance_risk + 0.3 * counseling_risk + 0.3 * engagement_risk
}

pub fn risk_flags(snapshot: &StudentSnapshot) -> RiskFlags {
    let checks = [
        (snapshot.gpa < rules::GPA_CRITICAL, RiskFlag::AcademicHighRisk),
        (snapshot.attendance_pct < rules::ATTENDANCE_WARNING, RiskFlag::AttendanceAlert),
        (snapshot.unpaid_fees > rules::FEES_CRITICAL, RiskFlag::FinancialRisk),
        (snapshot.credits < rules::CREDITS_FRESHMAN, RiskFlag::DropoutRisk),
        (
            snapshot.counseling_visits == 0 || snapshot.engagement_score < rules::ENGAGEMENT_LOW,
            RiskFlag::LowEngagement,
        ),
        (
            snapshot.warnings_count >= rules::WARNINGS_CRITICAL,
            RiskFlag::HighAttritionWarnings,
        ),
        (snapshot.financial_aid_status.is_delayed(), RiskFlag::StopOutRisk),
    ];

    checks
        .into_iter()
        .filter(|(raised, _)| *raised)
        .map(|(_, flag)| flag)
        .collect()
}

/// Scores one student. Pure: the result depends only on the snapshot.
pub fn assess(snapshot: &StudentSnapshot) -> RiskAssessment {
    let academic = academic_score(snapshot);
    let financial = financial_score(snapshot);
    let engagement = engagement_score(snapshot);
    let overall = round2(
        ACADEMIC_WEIGHT * academic + FINANCIAL_WEIGHT * financial + ENGAGEMENT_WEIGHT * engagement,
    );

    let alerts = rules::evaluate(snapshot);
    let critical_alert_count = alerts
        .iter()
        .filter(|alert| alert.severity == Severity::Critical)
        .count();
    let warning_alert_count = alerts
        .iter()
        .filter(|alert| alert.severity == Severity::Warning)
        .count();

    RiskAssessment {
        overall_score: overall,
        risk_level: RiskLevel::from_score(overall),
        academic_score: round2(academic),
        financial_score: round2(financial),
        engagement_score: round2(engagement),
        alerts,
        flags: risk_flags(snapshot),
        critical_alert_count,
        warning_alert_count,
    }
}

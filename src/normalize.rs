use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

use crate::models::{FinancialAidStatus, StudentSnapshot};

const ID_COLUMNS: &[&str] = &["id", "student_id"];
const GPA_COLUMNS: &[&str] = &["gpa"];
const CREDITS_COLUMNS: &[&str] = &["credits"];
const WARNINGS_COLUMNS: &[&str] = &["warningsCount", "warnings_count", "warnings"];
const FEES_COLUMNS: &[&str] = &["unpaidFees", "unpaid_fees"];
const AID_COLUMNS: &[&str] = &["financialAidStatus", "financial_aid_status"];
const ATTENDANCE_COLUMNS: &[&str] = &["attendancePct", "attendance_pct", "attendance"];
const COUNSELING_COLUMNS: &[&str] = &["counselingVisits", "counseling_visits"];
const ENGAGEMENT_COLUMNS: &[&str] = &["engagementScore", "engagement_score"];

/// A loosely-typed student row: column name to raw cell text.
#[derive(Debug, Clone, Default)]
pub struct RawStudentRecord {
    fields: HashMap<String, String>,
}

impl RawStudentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        self.fields.insert(column.trim().to_string(), value.into());
    }

    /// First non-blank value among the accepted spellings of a column.
    fn lookup(&self, columns: &[&str]) -> Option<&str> {
        columns
            .iter()
            .filter_map(|column| self.fields.get(*column))
            .map(|value| value.trim())
            .find(|value| !value.is_empty() && !is_null_marker(value))
    }
}

fn is_null_marker(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "null" | "none" | "nan" | "n/a" | "na"
    )
}

fn parse_real(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn real_in(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    parse_real(raw).map_or(default, |value| value.clamp(min, max))
}

fn count(raw: Option<&str>, default: u32) -> u32 {
    match parse_real(raw) {
        Some(value) if value <= 0.0 => 0,
        Some(value) if value >= u32::MAX as f64 => u32::MAX,
        Some(value) => value.trunc() as u32,
        None => default,
    }
}

/// Builds a snapshot from a raw row. Never fails: every malformed or
/// missing field falls back to its default, and every numeric field is
/// clamped into its domain.
pub fn normalize(record: &RawStudentRecord, position: usize) -> StudentSnapshot {
    let id = record
        .lookup(ID_COLUMNS)
        .map(str::to_string)
        .unwrap_or_else(|| format!("row-{position}"));

    StudentSnapshot {
        name: record.lookup(&["name"]).map(str::to_string),
        advisor: record.lookup(&["advisor"]).map(str::to_string),
        gpa: real_in(record.lookup(GPA_COLUMNS), StudentSnapshot::DEFAULT_GPA, 0.0, 4.0),
        credits: count(record.lookup(CREDITS_COLUMNS), StudentSnapshot::DEFAULT_CREDITS),
        warnings_count: count(record.lookup(WARNINGS_COLUMNS), 0),
        unpaid_fees: real_in(record.lookup(FEES_COLUMNS), 0.0, 0.0, f64::MAX),
        financial_aid_status: record
            .lookup(AID_COLUMNS)
            .map(FinancialAidStatus::parse)
            .unwrap_or_default(),
        attendance_pct: real_in(
            record.lookup(ATTENDANCE_COLUMNS),
            StudentSnapshot::DEFAULT_ATTENDANCE,
            0.0,
            100.0,
        ),
        counseling_visits: count(record.lookup(COUNSELING_COLUMNS), 0),
        engagement_score: real_in(
            record.lookup(ENGAGEMENT_COLUMNS),
            StudentSnapshot::DEFAULT_ENGAGEMENT,
            0.0,
            100.0,
        ),
        ..StudentSnapshot::with_defaults(id)
    }
}

pub fn normalize_all(records: &[RawStudentRecord]) -> Vec<StudentSnapshot> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| normalize(record, index + 1))
        .collect()
}

/// Reads every row of a headered CSV file. Cells that are not valid UTF-8
/// are decoded lossily so the affected field falls back to its default.
/// Rows the CSV reader cannot split are skipped with a warning.
pub fn read_csv(csv_path: &Path) -> anyhow::Result<Vec<RawStudentRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let headers: Vec<String> = reader
        .byte_headers()
        .with_context(|| format!("failed to read headers of {}", csv_path.display()))?
        .iter()
        .map(|column| String::from_utf8_lossy(column).into_owned())
        .collect();

    let mut records = Vec::new();
    for (line, result) in reader.byte_records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!("skipping unreadable row {} of {}: {err}", line + 2, csv_path.display());
                continue;
            }
        };

        let mut record = RawStudentRecord::new();
        for (column, value) in headers.iter().zip(row.iter()) {
            record.insert(column, String::from_utf8_lossy(value));
        }
        records.push(record);
    }

    tracing::debug!("read {} student rows from {}", records.len(), csv_path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_record_uses_documented_defaults() {
        let snapshot = normalize(&RawStudentRecord::new().with("id", "S001"), 1);
        let expected = StudentSnapshot::with_defaults("S001");
        assert_eq!(snapshot, expected);
    }

    #[test]
    fn malformed_values_degrade_to_defaults() {
        let record = RawStudentRecord::new()
            .with("id", "S002")
            .with("gpa", "three")
            .with("credits", "lots")
            .with("attendancePct", "NaN")
            .with("engagementScore", "")
            .with("unpaidFees", "inf")
            .with("counselingVisits", "null");
        let snapshot = normalize(&record, 1);

        assert_eq!(snapshot.gpa, 3.0);
        assert_eq!(snapshot.credits, 60);
        assert_eq!(snapshot.attendance_pct, 90.0);
        assert_eq!(snapshot.engagement_score, 70.0);
        assert_eq!(snapshot.unpaid_fees, 0.0);
        assert_eq!(snapshot.counseling_visits, 0);
    }

    #[test]
    fn values_are_clamped_into_their_domains() {
        let record = RawStudentRecord::new()
            .with("id", "S003")
            .with("gpa", "5.2")
            .with("attendancePct", "130")
            .with("engagementScore", "-4")
            .with("unpaidFees", "-20")
            .with("warningsCount", "-1")
            .with("credits", "45.7");
        let snapshot = normalize(&record, 1);

        assert_eq!(snapshot.gpa, 4.0);
        assert_eq!(snapshot.attendance_pct, 100.0);
        assert_eq!(snapshot.engagement_score, 0.0);
        assert_eq!(snapshot.unpaid_fees, 0.0);
        assert_eq!(snapshot.warnings_count, 0);
        assert_eq!(snapshot.credits, 45);
    }

    #[test]
    fn snake_case_aliases_are_accepted() {
        let record = RawStudentRecord::new()
            .with("student_id", "S004")
            .with("warnings", "2")
            .with("attendance", "71.5")
            .with("unpaid_fees", "250")
            .with("financial_aid_status", "Delayed")
            .with("counseling_visits", "3")
            .with("engagement_score", "48");
        let snapshot = normalize(&record, 1);

        assert_eq!(snapshot.id, "S004");
        assert_eq!(snapshot.warnings_count, 2);
        assert_eq!(snapshot.attendance_pct, 71.5);
        assert_eq!(snapshot.unpaid_fees, 250.0);
        assert_eq!(snapshot.financial_aid_status, FinancialAidStatus::Delayed);
        assert_eq!(snapshot.counseling_visits, 3);
        assert_eq!(snapshot.engagement_score, 48.0);
    }

    #[test]
    fn missing_id_gets_positional_fallback() {
        let snapshots = normalize_all(&[RawStudentRecord::new(), RawStudentRecord::new()]);
        assert_eq!(snapshots[0].id, "row-1");
        assert_eq!(snapshots[1].id, "row-2");
    }

    #[test]
    fn reads_csv_with_partial_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "student_id,name,gpa,credits").unwrap();
        writeln!(file, "S010,Avery Lee,1.8,25").unwrap();
        writeln!(file, "S011,Jules Moreno,,").unwrap();

        let records = read_csv(file.path()).unwrap();
        let snapshots = normalize_all(&records);

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name.as_deref(), Some("Avery Lee"));
        assert_eq!(snapshots[0].gpa, 1.8);
        assert_eq!(snapshots[0].credits, 25);
        assert_eq!(snapshots[1].gpa, 3.0);
        assert_eq!(snapshots[1].credits, 60);
        assert_eq!(snapshots[1].attendance_pct, 90.0);
    }

    #[test]
    fn non_utf8_cells_keep_the_student() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"student_id,name,gpa,credits\nS1,Ana,1.5,40\nS2,Jos\xe9,1.2,\xff\n")
            .unwrap();

        let snapshots = normalize_all(&read_csv(file.path()).unwrap());
        let ids: Vec<&str> = snapshots.iter().map(|s| s.id.as_str()).collect();

        assert_eq!(ids, vec!["S1", "S2"]);
        assert_eq!(snapshots[1].gpa, 1.2);
        assert_eq!(snapshots[1].credits, 60);
        assert!(snapshots[1].name.as_deref().unwrap().starts_with("Jos"));
    }
}

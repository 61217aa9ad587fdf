use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AlertRecord, AlertType, CohortAlerts, InterventionKind, InterventionLogEntry, Notification,
    Severity,
};

/// Identity of an alert for notification purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub student_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
}

impl DedupKey {
    pub fn new(student_id: &str, alert: &AlertRecord) -> Self {
        Self {
            student_id: student_id.to_string(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            message: alert.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub digest: HashSet<DedupKey>,
    #[serde(default)]
    pub notifications: BTreeMap<String, Vec<Notification>>,
    #[serde(default)]
    pub acknowledged: BTreeSet<String>,
    #[serde(default)]
    pub interventions: BTreeMap<String, Vec<InterventionLogEntry>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            digest: HashSet::new(),
            notifications: BTreeMap::new(),
            acknowledged: BTreeSet::new(),
            interventions: BTreeMap::new(),
        }
    }
}

/// Session-scoped notification inbox, de-dup digest and intervention log.
///
/// All mutation goes through one mutex, so the "already notified" check and
/// the insert that follows it are a single step even when several threads
/// ingest alerts for the same student.
#[derive(Debug)]
pub struct SessionStore {
    state: Mutex<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn from_state(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Loads a saved session, or starts a new one when `path` does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let store = Self::new();
            tracing::info!(
                "no session at {}, starting session {}",
                path.display(),
                store.session_id()
            );
            return Ok(store);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session {}", path.display()))?;
        let state: SessionState = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse session {}", path.display()))?;
        tracing::debug!("resumed session {} from {}", state.session_id, path.display());
        Ok(Self::from_state(state))
    }

    /// Writes the session beside `path` first and renames it into place, so
    /// an interrupted save never leaves a truncated session behind.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(&*self.state())?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to stage session in {}", dir.display()))?;
        staged
            .write_all(contents.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .with_context(|| format!("failed to write session {}", path.display()))?;
        staged
            .persist(path)
            .with_context(|| format!("failed to replace session {}", path.display()))?;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_id(&self) -> Uuid {
        self.state().session_id
    }

    /// Enqueues a notification for `alert` unless the same
    /// (student, type, severity, message) was already issued this session.
    pub fn ingest_alert(
        &self,
        student_id: &str,
        alert: &AlertRecord,
        issued_by: &str,
    ) -> Option<Notification> {
        if alert.severity == Severity::None {
            return None;
        }

        let mut state = self.state();
        if !state.digest.insert(DedupKey::new(student_id, alert)) {
            tracing::debug!("suppressed repeat {} alert for {student_id}", alert.alert_type);
            return None;
        }

        let notification = Notification {
            student_id: student_id.to_string(),
            subject: alert.subject(),
            message: alert.message.clone(),
            issued_by: issued_by.to_string(),
            timestamp: Utc::now(),
            acknowledged: false,
        };
        state
            .notifications
            .entry(student_id.to_string())
            .or_default()
            .push(notification.clone());
        Some(notification)
    }

    /// Feeds every alert of a collected cohort through the de-dup filter and
    /// returns the notifications that were actually created.
    pub fn ingest_cohort(&self, cohort: &CohortAlerts, issued_by: &str) -> Vec<Notification> {
        let mut created = Vec::new();
        for student in &cohort.students {
            let issuer = student.advisor.as_deref().unwrap_or(issued_by);
            for alert in &student.assessment.alerts {
                if let Some(notification) = self.ingest_alert(&student.student_id, alert, issuer) {
                    created.push(notification);
                }
            }
        }
        created
    }

    /// Appends a notification directly, bypassing the de-dup digest.
    pub fn add_notification(
        &self,
        student_id: &str,
        subject: &str,
        message: &str,
        issued_by: &str,
    ) -> Notification {
        let notification = Notification {
            student_id: student_id.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            issued_by: issued_by.to_string(),
            timestamp: Utc::now(),
            acknowledged: false,
        };
        self.state()
            .notifications
            .entry(student_id.to_string())
            .or_default()
            .push(notification.clone());
        notification
    }

    pub fn notifications_for(&self, student_id: &str) -> Vec<Notification> {
        self.state()
            .notifications
            .get(student_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn notification(&self, student_id: &str, index: usize) -> Option<Notification> {
        self.state()
            .notifications
            .get(student_id)
            .and_then(|notes| notes.get(index))
            .cloned()
    }

    /// Every pending notification grouped by student, skipping empty inboxes.
    pub fn pending(&self) -> Vec<(String, Vec<Notification>)> {
        self.state()
            .notifications
            .iter()
            .filter(|(_, notes)| !notes.is_empty())
            .map(|(student_id, notes)| (student_id.clone(), notes.clone()))
            .collect()
    }

    /// Removes notification `index` for the student and records the
    /// acknowledgement in the intervention log. Returns `false` and changes
    /// nothing when the index is out of range.
    pub fn acknowledge(&self, student_id: &str, index: usize) -> bool {
        let mut state = self.state();
        let Some(notes) = state.notifications.get_mut(student_id) else {
            return false;
        };
        if index >= notes.len() {
            return false;
        }

        let mut note = notes.remove(index);
        note.acknowledged = true;
        state.acknowledged.insert(student_id.to_string());
        state
            .interventions
            .entry(student_id.to_string())
            .or_default()
            .push(InterventionLogEntry {
                kind: InterventionKind::NotificationAcknowledged,
                advisor: note.issued_by,
                notes: note.message,
                timestamp: Utc::now(),
            });
        true
    }

    pub fn is_acknowledged(&self, student_id: &str) -> bool {
        self.state().acknowledged.contains(student_id)
    }

    /// Appends an advisor-authored intervention. The log is append-only.
    pub fn record_intervention(
        &self,
        student_id: &str,
        kind: InterventionKind,
        advisor: &str,
        notes: &str,
    ) -> anyhow::Result<InterventionLogEntry> {
        let advisor = advisor.trim();
        if advisor.is_empty() {
            anyhow::bail!("advisor name is required to record an intervention");
        }

        let entry = InterventionLogEntry {
            kind,
            advisor: advisor.to_string(),
            notes: notes.to_string(),
            timestamp: Utc::now(),
        };
        self.state()
            .interventions
            .entry(student_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    pub fn interventions_for(&self, student_id: &str) -> Vec<InterventionLogEntry> {
        self.state()
            .interventions
            .get(student_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{collect_alerts, NoopAlertSink};
    use crate::models::StudentSnapshot;
    use std::sync::Arc;

    fn gpa_alert(message: &str) -> AlertRecord {
        AlertRecord {
            alert_type: AlertType::Gpa,
            severity: Severity::Critical,
            message: message.to_string(),
        }
    }

    fn at_risk(id: &str) -> StudentSnapshot {
        StudentSnapshot {
            gpa: 1.8,
            attendance_pct: 70.0,
            warnings_count: 2,
            ..StudentSnapshot::with_defaults(id)
        }
    }

    #[test]
    fn repeated_alert_is_not_renotified() {
        let store = SessionStore::new();
        let alert = gpa_alert("Critical GPA: 1.80");

        let first = store.ingest_alert("S1", &alert, "Advisor");
        assert!(first.is_some());
        assert_eq!(first.unwrap().subject, "GPA - CRITICAL");
        assert!(store.ingest_alert("S1", &alert, "Advisor").is_none());
        assert_eq!(store.notifications_for("S1").len(), 1);
    }

    #[test]
    fn changed_message_is_a_new_condition() {
        let store = SessionStore::new();
        store.ingest_alert("S1", &gpa_alert("Critical GPA: 1.80"), "Advisor");
        store.ingest_alert("S1", &gpa_alert("Critical GPA: 1.60"), "Advisor");
        store.ingest_alert("S2", &gpa_alert("Critical GPA: 1.80"), "Advisor");

        assert_eq!(store.notifications_for("S1").len(), 2);
        assert_eq!(store.notifications_for("S2").len(), 1);
    }

    #[test]
    fn rerunning_the_collector_is_idempotent() {
        let store = SessionStore::new();
        let students = vec![at_risk("S1"), at_risk("S2")];

        let first_pass = collect_alerts(&students, &NoopAlertSink);
        let created = store.ingest_cohort(&first_pass, "Advisor");
        assert_eq!(created.len(), first_pass.total_alerts);

        let second_pass = collect_alerts(&students, &NoopAlertSink);
        assert_eq!(first_pass, second_pass);
        assert!(store.ingest_cohort(&second_pass, "Advisor").is_empty());
    }

    #[test]
    fn acknowledging_out_of_range_index_fails_without_changes() {
        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Advisor");
        store.add_notification("S1", "Attendance - WARNING", "Attendance: 70.00%", "Advisor");
        let before = store.notifications_for("S1");

        assert!(!store.acknowledge("S1", 5));
        assert!(!store.acknowledge("S9", 0));
        assert_eq!(store.notifications_for("S1"), before);
        assert!(store.interventions_for("S1").is_empty());
    }

    #[test]
    fn acknowledging_moves_note_into_intervention_log() {
        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Dr. Ito");
        store.add_notification("S1", "Attendance - WARNING", "Attendance: 70.00%", "Dr. Ito");

        assert!(store.acknowledge("S1", 0));

        let remaining = store.notifications_for("S1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "Attendance: 70.00%");

        let log = store.interventions_for("S1");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, InterventionKind::NotificationAcknowledged);
        assert_eq!(log[0].kind.as_str(), "Notification Acknowledged");
        assert_eq!(log[0].advisor, "Dr. Ito");
        assert_eq!(log[0].notes, "Critical GPA: 1.80");
        assert!(store.is_acknowledged("S1"));
    }

    #[test]
    fn acknowledged_alert_stays_suppressed() {
        let store = SessionStore::new();
        let alert = gpa_alert("Critical GPA: 1.80");
        store.ingest_alert("S1", &alert, "Advisor");
        assert!(store.acknowledge("S1", 0));

        assert!(store.ingest_alert("S1", &alert, "Advisor").is_none());
        assert!(store.notifications_for("S1").is_empty());
    }

    #[test]
    fn blank_advisor_is_rejected() {
        let store = SessionStore::new();
        assert!(store
            .record_intervention("S1", InterventionKind::AcademicSupport, "  ", "tutoring")
            .is_err());
        assert!(store.interventions_for("S1").is_empty());

        let entry = store
            .record_intervention("S1", InterventionKind::AcademicSupport, "Dr. Ito", "tutoring")
            .unwrap();
        assert_eq!(entry.advisor, "Dr. Ito");
        assert_eq!(store.interventions_for("S1").len(), 1);
    }

    #[test]
    fn concurrent_ingest_notifies_once() {
        let store = Arc::new(SessionStore::new());
        let alert = gpa_alert("Critical GPA: 1.80");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let alert = alert.clone();
                std::thread::spawn(move || store.ingest_alert("S1", &alert, "Advisor").is_some())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(store.notifications_for("S1").len(), 1);
    }

    #[test]
    fn session_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = SessionStore::new();
        let alert = gpa_alert("Critical GPA: 1.80");
        store.ingest_alert("S1", &alert, "Advisor");
        store
            .record_intervention("S1", InterventionKind::FinancialAid, "Dr. Ito", "aid review")
            .unwrap();
        store.save(&path).unwrap();

        let resumed = SessionStore::load(&path).unwrap();
        assert_eq!(resumed.session_id(), store.session_id());
        assert_eq!(resumed.notifications_for("S1"), store.notifications_for("S1"));
        assert_eq!(resumed.interventions_for("S1").len(), 1);
        assert!(resumed.ingest_alert("S1", &alert, "Advisor").is_none());
    }

    #[test]
    fn saving_replaces_the_session_file_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{\"session_id\": trunc").unwrap();

        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Advisor");
        store.save(&path).unwrap();
        store.add_notification("S1", "Attendance - WARNING", "Attendance: 70.00%", "Advisor");
        store.save(&path).unwrap();

        let resumed = SessionStore::load(&path).unwrap();
        assert_eq!(resumed.notifications_for("S1").len(), 2);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("session.json")]);
    }

    #[test]
    fn missing_session_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.pending().is_empty());
    }
}

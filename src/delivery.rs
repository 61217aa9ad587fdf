use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionStore;

pub const DEFAULT_STUDENT_EMAIL_DOMAIN: &str = "example.edu";

const NOT_CONFIGURED: &str = "SMTP not configured. Set SMTP_HOST, SMTP_PORT, SMTP_USER, \
     SMTP_PASSWORD, EMAIL_FROM env vars to enable email sending.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

impl EmailSettings {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Missing or malformed settings are a normal outcome, returned as the
    /// reason delivery cannot happen.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (Some(host), Some(port), Some(user), Some(password), Some(from)) = (
            read("SMTP_HOST"),
            read("SMTP_PORT"),
            read("SMTP_USER"),
            read("SMTP_PASSWORD"),
            read("EMAIL_FROM"),
        ) else {
            return Err(NOT_CONFIGURED.to_string());
        };

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| "Invalid SMTP_PORT".to_string())?;

        Ok(Self {
            host,
            port,
            user,
            password,
            from,
        })
    }
}

pub fn student_email(student_id: &str, domain: &str) -> String {
    format!("{}@{domain}", student_id.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// `(success, reason)` for a delivery attempt. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub reason: String,
}

impl DeliveryReport {
    pub fn sent(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }
}

pub trait Mailer {
    fn deliver(&self, settings: &EmailSettings, email: &OutboundEmail) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct SpooledEmail<'a> {
    queued_at: DateTime<Utc>,
    smtp_host: &'a str,
    smtp_port: u16,
    #[serde(flatten)]
    email: &'a OutboundEmail,
}

/// Appends one JSON line per message to an outbox file for an external MTA
/// to relay.
#[derive(Debug, Clone)]
pub struct SpoolMailer {
    outbox: PathBuf,
}

impl SpoolMailer {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }
}

impl Mailer for SpoolMailer {
    fn deliver(&self, settings: &EmailSettings, email: &OutboundEmail) -> anyhow::Result<()> {
        let line = serde_json::to_string(&SpooledEmail {
            queued_at: Utc::now(),
            smtp_host: &settings.host,
            smtp_port: settings.port,
            email,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .with_context(|| format!("failed to open outbox {}", self.outbox.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.outbox.display()))?;
        Ok(())
    }
}

/// Re-sends a pending notification to the student's derived address.
pub fn resend(
    store: &SessionStore,
    student_id: &str,
    index: usize,
    settings: Result<&EmailSettings, &str>,
    domain: &str,
    mailer: &dyn Mailer,
) -> DeliveryReport {
    let Some(notification) = store.notification(student_id, index) else {
        return DeliveryReport::failed(format!("No notification at index {index}"));
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(reason) => return DeliveryReport::failed(reason),
    };

    let email = OutboundEmail {
        from: settings.from.clone(),
        to: student_email(student_id, domain),
        subject: notification.subject,
        body: notification.message,
    };

    match mailer.deliver(settings, &email) {
        Ok(()) => {
            tracing::info!("queued email for {} ({})", student_id, email.to);
            DeliveryReport::sent(format!("Email sent to {}", email.to))
        }
        Err(err) => {
            tracing::warn!("email delivery for {student_id} failed: {err:#}");
            DeliveryReport::failed(format!("Email error: {err:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("SMTP_HOST", "smtp.example.edu".to_string()),
            ("SMTP_PORT", "465".to_string()),
            ("SMTP_USER", "alerts".to_string()),
            ("SMTP_PASSWORD", "secret".to_string()),
            ("EMAIL_FROM", "alerts@example.edu".to_string()),
        ])
    }

    fn settings() -> EmailSettings {
        let env = full_env();
        EmailSettings::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    struct RefusingMailer;

    impl Mailer for RefusingMailer {
        fn deliver(&self, _: &EmailSettings, _: &OutboundEmail) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn missing_settings_are_reported_not_raised() {
        let mut env = full_env();
        env.remove("SMTP_PASSWORD");
        let result = EmailSettings::from_lookup(|key| env.get(key).cloned());
        assert!(result.unwrap_err().starts_with("SMTP not configured"));
    }

    #[test]
    fn invalid_port_is_reported() {
        let mut env = full_env();
        env.insert("SMTP_PORT", "smtp".to_string());
        let result = EmailSettings::from_lookup(|key| env.get(key).cloned());
        assert_eq!(result.unwrap_err(), "Invalid SMTP_PORT");
    }

    #[test]
    fn student_address_is_lowercased() {
        assert_eq!(student_email("S001", "example.edu"), "s001@example.edu");
    }

    #[test]
    fn resend_without_configuration_fails_softly() {
        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Advisor");
        let dir = tempfile::tempdir().unwrap();
        let mailer = SpoolMailer::new(dir.path().join("outbox.jsonl"));

        let report = resend(&store, "S1", 0, Err(NOT_CONFIGURED), "example.edu", &mailer);
        assert!(!report.success);
        assert!(report.reason.starts_with("SMTP not configured"));
        assert!(!mailer.outbox().exists());
    }

    #[test]
    fn resend_unknown_index_fails() {
        let store = SessionStore::new();
        let settings = settings();
        let report = resend(&store, "S1", 3, Ok(&settings), "example.edu", &RefusingMailer);
        assert_eq!(report, DeliveryReport::failed("No notification at index 3"));
    }

    #[test]
    fn resend_spools_message() {
        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Advisor");
        let dir = tempfile::tempdir().unwrap();
        let mailer = SpoolMailer::new(dir.path().join("outbox.jsonl"));
        let settings = settings();

        let report = resend(&store, "S1", 0, Ok(&settings), "example.edu", &mailer);
        assert!(report.success);
        assert_eq!(report.reason, "Email sent to s1@example.edu");

        let spooled = std::fs::read_to_string(mailer.outbox()).unwrap();
        let line: serde_json::Value = serde_json::from_str(spooled.trim()).unwrap();
        assert_eq!(line["to"], "s1@example.edu");
        assert_eq!(line["subject"], "GPA - CRITICAL");
        assert_eq!(line["smtp_port"], 465);
        // resending leaves the notification pending
        assert_eq!(store.notifications_for("S1").len(), 1);
    }

    #[test]
    fn mailer_errors_become_failed_reports() {
        let store = SessionStore::new();
        store.add_notification("S1", "GPA - CRITICAL", "Critical GPA: 1.80", "Advisor");
        let settings = settings();

        let report = resend(&store, "S1", 0, Ok(&settings), "example.edu", &RefusingMailer);
        assert!(!report.success);
        assert_eq!(report.reason, "Email error: connection refused");
    }
}

//! Email summary of a finished run.
//!
//! The harness builds the message; delivery belongs to a [`Mailer`]. The
//! bundled [`LogMailer`] only records the message through `tracing`.

use crate::config::{ConfigKey, ConfigRegistry};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use crate::reporter::SuiteReport;
use std::path::PathBuf;
use tracing::info;

/// SMTP settings and recipients.
#[derive(Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    password: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("cc", &self.cc)
            .finish_non_exhaustive()
    }
}

impl EmailSettings {
    /// `None` unless `send_email` is `yes`; then every email key but the Cc
    /// list is required.
    pub fn from_config(config: &ConfigRegistry) -> Result<Option<Self>> {
        if !config.optional_flag(ConfigKey::SendEmail) {
            return Ok(None);
        }
        let port_raw = config.get(ConfigKey::EmailPort)?;
        let port = port_raw.parse::<u16>().map_err(|_| {
            HarnessError::MissingConfig(format!("email_port is not a port number: '{}'", port_raw))
        })?;
        let to = split_recipients(config.get(ConfigKey::EmailToRecipients)?);
        if to.is_empty() {
            return Err(HarnessError::MissingConfig(
                "email_to_recipients lists no address".to_string(),
            ));
        }
        Ok(Some(Self {
            host: config.get(ConfigKey::EmailHost)?.to_string(),
            port,
            username: config.get(ConfigKey::EmailUsername)?.to_string(),
            password: config.get(ConfigKey::EmailPassword)?.to_string(),
            from: config.get(ConfigKey::EmailFrom)?.to_string(),
            to,
            cc: config
                .get_optional(ConfigKey::EmailCcRecipients)
                .map(split_recipients)
                .unwrap_or_default(),
            subject: config.get(ConfigKey::EmailSubject)?.to_string(),
        }))
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

fn split_recipients(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A composed summary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSummary {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<PathBuf>,
}

impl EmailSummary {
    pub fn build(
        settings: &EmailSettings,
        report: &SuiteReport,
        ctx: &RunContext,
        attachments: Vec<PathBuf>,
    ) -> Self {
        let subject = format!("{} - {}", settings.subject, ctx.timestamp_label());
        let rows = [
            ("Environment", ctx.environment.clone()),
            ("Run manager", ctx.run_manager.clone()),
            ("Service", ctx.service_name.clone()),
            ("Total", report.total().to_string()),
            ("Passed", report.passed().to_string()),
            ("Failed", report.failed().to_string()),
            ("Skipped", report.skipped().to_string()),
        ];

        let mut text_body = format!("Execution summary for {}\n\n", report.name);
        for (label, value) in &rows {
            text_body.push_str(&format!("{:<12} {}\n", format!("{}:", label), value));
        }
        let failed = report.failed_only();
        if !failed.cases.is_empty() {
            text_body.push_str("\nFailed:\n");
            for case in &failed.cases {
                text_body.push_str(&format!("  - {}\n", case.label));
            }
        }

        let mut html_body = String::from(
            "<html><body><h3>Execution summary</h3><table border=\"1\" cellpadding=\"4\">",
        );
        for (label, value) in &rows {
            html_body.push_str(&format!(
                "<tr><th align=\"left\">{}</th><td>{}</td></tr>",
                label, value
            ));
        }
        html_body.push_str("</table>");
        if !attachments.is_empty() {
            html_body.push_str("<p>The detailed report is attached.</p>");
        }
        html_body.push_str("</body></html>");

        Self {
            from: settings.from.clone(),
            to: settings.to.clone(),
            cc: settings.cc.clone(),
            subject,
            text_body,
            html_body,
            attachments,
        }
    }
}

/// Delivers a summary message.
pub trait Mailer: Send + Sync {
    fn send(&self, settings: &EmailSettings, summary: &EmailSummary) -> Result<()>;
}

/// Mailer that records the message in the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, settings: &EmailSettings, summary: &EmailSummary) -> Result<()> {
        info!(
            host = %settings.host,
            port = settings.port,
            to = %summary.to.join(", "),
            cc = %summary.cc.join(", "),
            subject = %summary.subject,
            attachments = summary.attachments.len(),
            "Email summary prepared"
        );
        Ok(())
    }
}

//! Callback sending an email for permanently failed batches

use std::env;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use tracing::{debug, error};

use crate::core::errors::{SinkError, SinkResult};
use crate::sink::DispatchReport;
use crate::utils::format_timestamp;

use super::PostRequestCallback;

pub const NAME: &str = "email";

/// SMTP settings for failure notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub to_email: String,
}

impl EmailConfig {
    /// Read the settings from `EMAIL_*` environment variables
    pub fn from_env() -> SinkResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> SinkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key).ok_or_else(|| {
                SinkError::callback(NAME, format!("{} environment variable is missing", key))
            })
        };

        let smtp_port = var("EMAIL_SMTP_PORT")?
            .parse::<u16>()
            .map_err(|_| SinkError::callback(NAME, "EMAIL_SMTP_PORT must be a valid port number"))?;

        Ok(Self {
            smtp_host: var("EMAIL_SMTP_HOST")?,
            smtp_port,
            smtp_username: var("EMAIL_SMTP_USERNAME")?,
            smtp_password: var("EMAIL_SMTP_PASSWORD")?,
            from_email: var("EMAIL_FROM")?,
            to_email: var("EMAIL_TO")?,
        })
    }
}

/// Sends one email per permanently failed batch
pub struct EmailCallback {
    from: Mailbox,
    to: Mailbox,
    mailer: SmtpTransport,
}

impl EmailCallback {
    /// Validates both addresses up front
    pub fn new(config: EmailConfig) -> SinkResult<Self> {
        let from = parse_address("EMAIL_FROM", &config.from_email)?;
        let to = parse_address("EMAIL_TO", &config.to_email)?;
        let mailer = SmtpTransport::builder_dangerous(config.smtp_host.as_str())
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        Ok(Self {
            from: from.into(),
            to: to.into(),
            mailer,
        })
    }

    fn compose(&self, report: &DispatchReport) -> SinkResult<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("HTTP sink: batch {} failed", report.batch_id))
            .body(notification_body(report))
            .map_err(|e| SinkError::callback(NAME, format!("Failed to build email: {}", e)))
    }
}

fn parse_address(variable: &str, value: &str) -> SinkResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| SinkError::callback(NAME, format!("{} is not a valid address: {}", variable, e)))
}

fn notification_body(report: &DispatchReport) -> String {
    let status = report
        .status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Batch {} could not be delivered.\n\n\
         Records: {}\n\
         Attempts: {}\n\
         Last status: {}\n\
         Error: {}\n\
         Submitted: {}\n\
         Completed: {}\n",
        report.batch_id,
        report.records.len(),
        report.attempts,
        status,
        report.error.as_deref().unwrap_or("unknown error"),
        format_timestamp(report.submitted_at),
        format_timestamp(report.completed_at),
    )
}

#[async_trait]
impl PostRequestCallback for EmailCallback {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_complete(&self, report: &DispatchReport) {
        if report.is_success() {
            return;
        }

        let email = match self.compose(report) {
            Ok(email) => email,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        // SmtpTransport blocks
        let mailer = self.mailer.clone();
        match tokio::task::spawn_blocking(move || mailer.send(&email)).await {
            Ok(Ok(_)) => debug!("Failure notification sent for batch {}", report.batch_id),
            Ok(Err(e)) => error!("Failed to send email notification: {}", e),
            Err(e) => error!("Email notification task failed: {}", e),
        }
    }
}

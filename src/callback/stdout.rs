//! Callback writing outcomes to standard output, one JSON line each

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::sink::{DispatchReport, OutcomeKind};
use crate::tracing_context::CorrelationId;
use crate::utils::format_timestamp;

use super::PostRequestCallback;

pub const NAME: &str = "stdout";

#[derive(Serialize)]
struct OutcomeLine<'a> {
    batch_id: &'a CorrelationId,
    outcome: OutcomeKind,
    attempts: u32,
    status: Option<u16>,
    error: Option<&'a str>,
    records: usize,
    completed_at: String,
}

pub struct StdoutCallback {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutCallback {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write_line(&self, report: &DispatchReport) -> io::Result<()> {
        let line = OutcomeLine {
            batch_id: &report.batch_id,
            outcome: report.outcome,
            attempts: report.attempts,
            status: report.status(),
            error: report.error.as_deref(),
            records: report.records.len(),
            completed_at: format_timestamp(report.completed_at),
        };
        let json = serde_json::to_string(&line)?;

        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(out, "{}", json)?;
        out.flush()
    }
}

impl Default for StdoutCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostRequestCallback for StdoutCallback {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_complete(&self, report: &DispatchReport) {
        if let Err(e) = self.write_line(report) {
            warn!("Failed to write outcome to stdout: {}", e);
        }
    }
}

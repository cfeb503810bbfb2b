//! Callback that logs outcomes

use async_trait::async_trait;
use tracing::{error, info};

use crate::sink::DispatchReport;

use super::PostRequestCallback;

pub const NAME: &str = "logger";

/// Logs every outcome through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerCallback;

#[async_trait]
impl PostRequestCallback for LoggerCallback {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_complete(&self, report: &DispatchReport) {
        let elapsed = (report.completed_at - report.submitted_at)
            .to_std()
            .unwrap_or_default();
        if report.is_success() {
            info!(
                batch_id = %report.batch_id,
                records = report.records.len(),
                attempts = report.attempts,
                status = report.status(),
                "Batch delivered in {:?}",
                elapsed
            );
        } else {
            error!(
                batch_id = %report.batch_id,
                records = report.records.len(),
                attempts = report.attempts,
                status = report.status(),
                "Batch failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

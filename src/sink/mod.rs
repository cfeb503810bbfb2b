//! Asynchronous batch dispatch
//!
//! [`AsyncHttpSink`] admits sealed batches into a bounded number of in-flight slots,
//! sends each one as a single HTTP request, retries it according to the
//! [`RetryPolicy`] and reports the terminal outcome to the post-request callback.
//!
//! A slot is held from admission until the callback has returned, retries included,
//! so `max_in_flight` bounds concurrent work and outstanding memory. [`AsyncHttpSink::drain`]
//! returns only once every admitted batch has been reported.

pub mod outcome;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::batch::Batch;
use crate::callback::PostRequestCallback;
use crate::core::config::SinkConfig;
use crate::core::errors::{SinkError, SubmitError};
use crate::encoding::Record;
use crate::retry::RetryPolicy;
use crate::tracing_context::{CorrelationId, TracingContext};

pub use outcome::{Classification, DispatchReport, HttpResponse, OutcomeKind, classify};
pub use stats::{SinkStats, SinkStatsSnapshot};
pub use transport::{BodyLayout, HttpRequest, HttpTransport, ReqwestTransport, TransportError};

/// Dispatch settings derived from [`SinkConfig`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_in_flight: usize,
    /// How long `submit` waits for a free slot; zero means fail immediately
    pub admission_timeout: Duration,
    pub request_timeout: Duration,
    pub layout: BodyLayout,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl DispatchSettings {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            admission_timeout: config.admission_timeout,
            request_timeout: config.request_timeout,
            layout: BodyLayout::for_config(config.format, config.request_mode),
            retryable_status_codes: config.retryable_status_codes.clone(),
        }
    }
}

struct SinkInner {
    settings: DispatchSettings,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    callback: Arc<dyn PostRequestCallback>,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    stats: Arc<SinkStats>,
}

/// Bounded, retrying dispatcher for sealed batches
#[derive(Clone)]
pub struct AsyncHttpSink {
    inner: Arc<SinkInner>,
}

impl AsyncHttpSink {
    /// Create a sink from validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated sink configuration
    /// * `transport` - HTTP client used for every attempt
    /// * `callback` - Receives exactly one report per admitted batch
    pub fn new(
        config: &SinkConfig,
        transport: Arc<dyn HttpTransport>,
        callback: Arc<dyn PostRequestCallback>,
    ) -> Self {
        Self::with_settings(
            DispatchSettings::from_config(config),
            RetryPolicy::new(config.retry.clone()),
            transport,
            callback,
        )
    }

    pub fn with_settings(
        settings: DispatchSettings,
        retry: RetryPolicy,
        transport: Arc<dyn HttpTransport>,
        callback: Arc<dyn PostRequestCallback>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_in_flight));
        Self {
            inner: Arc::new(SinkInner {
                settings,
                transport,
                retry,
                callback,
                slots,
                closed: AtomicBool::new(false),
                stats: Arc::new(SinkStats::new()),
            }),
        }
    }

    /// Admit a batch for dispatch
    ///
    /// Waits up to the admission timeout for a free slot. On rejection the batch is
    /// handed back inside the error, unchanged, so the caller can resubmit it.
    ///
    /// # Arguments
    ///
    /// * `batch` - Sealed batch to send
    ///
    /// # Returns
    ///
    /// `Ok(())` once the batch holds a slot and its dispatch task is running.
    /// `SinkError::CapacityExceeded` when no slot freed up in time, `SinkError::Closed`
    /// after [`AsyncHttpSink::close`].
    pub async fn submit(&self, batch: Batch) -> Result<(), SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::new(batch, SinkError::Closed));
        }

        let started = Instant::now();
        let timeout = self.inner.settings.admission_timeout;
        let permit = if timeout.is_zero() {
            self.inner.slots.clone().try_acquire_owned().ok()
        } else {
            match tokio::time::timeout(timeout, self.inner.slots.clone().acquire_owned()).await {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(_)) => return Err(SubmitError::new(batch, SinkError::Closed)),
                Err(_) => None,
            }
        };

        match permit {
            Some(permit) => self.admit(batch, permit),
            None => {
                self.inner.stats.record_rejection();
                let in_flight = self.in_flight();
                debug!(
                    "Rejected batch {}: {} batches in flight after {:?}",
                    batch.id(),
                    in_flight,
                    started.elapsed()
                );
                Err(SubmitError::new(
                    batch,
                    SinkError::CapacityExceeded {
                        in_flight,
                        waited: started.elapsed(),
                    },
                ))
            }
        }
    }

    /// Admit a batch, waiting as long as needed for a slot
    ///
    /// Only fails when the sink is closed.
    pub async fn submit_wait(&self, batch: Batch) -> Result<(), SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::new(batch, SinkError::Closed));
        }
        match self.inner.slots.clone().acquire_owned().await {
            Ok(permit) => self.admit(batch, permit),
            Err(_) => Err(SubmitError::new(batch, SinkError::Closed)),
        }
    }

    fn admit(&self, batch: Batch, permit: OwnedSemaphorePermit) -> Result<(), SubmitError> {
        // close() may have run while we waited for the slot
        if self.is_closed() {
            drop(permit);
            return Err(SubmitError::new(batch, SinkError::Closed));
        }

        self.inner.stats.batch_started();
        let context = TracingContext::with_correlation_id(batch.id().clone());
        let span = context.span.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.dispatch(batch, context, permit).await }.instrument(span));
        Ok(())
    }

    /// Stop admitting new batches; in-flight batches keep running
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("HTTP sink closed, {} batches in flight", self.in_flight());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until every admitted batch has reached a terminal outcome
    pub async fn drain(&self) {
        let slots = self.inner.settings.max_in_flight as u32;
        match self.inner.slots.acquire_many(slots).await {
            Ok(_all) => debug!("HTTP sink drained"),
            Err(e) => warn!("Failed to drain HTTP sink: {}", e),
        }
    }

    /// Batches currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.inner.stats.in_flight()
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Report a record that never became a request
    pub async fn report_encoding_failure(&self, record: Record, error: &SinkError) {
        self.inner.stats.record_encoding_failure();
        let now = Utc::now();
        let report = DispatchReport {
            batch_id: CorrelationId::new(),
            outcome: OutcomeKind::PermanentFailure,
            attempts: 0,
            records: vec![record],
            response: None,
            error: Some(error.to_string()),
            submitted_at: now,
            completed_at: now,
        };
        warn!("Record could not be encoded: {}", error);
        self.inner.callback.on_complete(&report).await;
    }

    /// Report a sealed batch that could not be admitted at shutdown
    pub async fn report_undelivered(&self, batch: Batch, error: &SinkError) {
        let records = batch.into_records();
        self.inner.stats.record_failure(records.len());
        let now = Utc::now();
        let report = DispatchReport {
            batch_id: CorrelationId::new(),
            outcome: OutcomeKind::PermanentFailure,
            attempts: 0,
            records,
            response: None,
            error: Some(error.to_string()),
            submitted_at: now,
            completed_at: now,
        };
        error!(
            "Batch {} with {} records was not delivered: {}",
            report.batch_id,
            report.records.len(),
            error
        );
        self.inner.callback.on_complete(&report).await;
    }
}

impl SinkInner {
    async fn dispatch(&self, batch: Batch, context: TracingContext, permit: OwnedSemaphorePermit) {
        let submitted_at = Utc::now();
        let started = Instant::now();
        let request = HttpRequest::from_batch(
            &batch,
            self.settings.layout,
            self.settings.request_timeout,
        );
        let record_count = batch.len();

        let mut attempt: u32 = 1;
        let (outcome, response, error) = loop {
            let attempt_context = context.child_context("dispatch");
            attempt_context
                .record("attempt", attempt)
                .record("records", record_count);

            let result = self
                .transport
                .send(&request)
                .instrument(attempt_context.span.clone())
                .await;

            match classify(&result, &self.settings.retryable_status_codes) {
                Classification::Success => break (OutcomeKind::Success, result.ok(), None),
                Classification::Permanent { reason } => {
                    break (OutcomeKind::PermanentFailure, result.ok(), Some(reason));
                }
                Classification::Retryable { failure, reason } => {
                    match self.retry.should_retry(attempt, &failure) {
                        Some(delay) => {
                            warn!(
                                "Attempt {} for batch {} failed ({}), retrying in {:?}",
                                attempt,
                                context.correlation_id,
                                reason,
                                delay
                            );
                            self.stats.record_retry();
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            break (
                                OutcomeKind::PermanentFailure,
                                result.ok(),
                                Some(format!("gave up after {} attempts: {}", attempt, reason)),
                            );
                        }
                    }
                }
            }
        };

        match outcome {
            OutcomeKind::Success => {
                self.stats.record_success(record_count, request.body.len());
                info!(
                    "Delivered batch {} ({} records) in {:?} after {} attempt(s)",
                    context.correlation_id,
                    record_count,
                    started.elapsed(),
                    attempt
                );
            }
            OutcomeKind::PermanentFailure => {
                self.stats.record_failure(record_count);
                error!(
                    "Batch {} ({} records) failed permanently: {}",
                    context.correlation_id,
                    record_count,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        let report = DispatchReport {
            batch_id: context.correlation_id.clone(),
            outcome,
            attempts: attempt,
            records: batch.into_records(),
            response,
            error,
            submitted_at,
            completed_at: Utc::now(),
        };
        self.callback.on_complete(&report).await;

        self.stats.batch_finished();
        drop(permit);
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingCallback, ScriptedTransport, batch_of, settings};
    use super::*;
    use crate::retry::RetryConfig;
    use std::sync::Mutex;

    fn retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
            jitter_seed: None,
        })
    }

    fn sink(
        settings: DispatchSettings,
        max_retries: u32,
        transport: &Arc<ScriptedTransport>,
        callback: &Arc<RecordingCallback>,
    ) -> AsyncHttpSink {
        AsyncHttpSink::with_settings(
            settings,
            retry(max_retries),
            transport.clone(),
            callback.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_limit() {
        let transport = Arc::new(ScriptedTransport::ok().with_delay(Duration::from_millis(50)));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(3, Duration::from_secs(60)), 0, &transport, &callback);

        let mut handles = Vec::new();
        for n in 0..20 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.submit_wait(batch_of(&[n])).await.is_ok()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        sink.drain().await;

        assert_eq!(callback.reports().len(), 20);
        assert!(transport.max_concurrent() <= 3);
        assert_eq!(transport.max_concurrent(), 3);
        assert!(sink.stats().peak_in_flight() <= 3);
        assert_eq!(sink.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_retried_until_budget_is_spent() {
        let transport = Arc::new(ScriptedTransport::always(500));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(2, Duration::ZERO), 3, &transport, &callback);

        sink.submit(batch_of(&[1, 2])).await.unwrap();
        sink.drain().await;

        let reports = callback.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, OutcomeKind::PermanentFailure);
        assert_eq!(reports[0].attempts, 4);
        assert_eq!(reports[0].status(), Some(500));
        assert_eq!(reports[0].records.len(), 2);

        let gaps = transport.gaps();
        assert_eq!(gaps.len(), 3);
        for (gap, expected) in gaps.iter().zip([100u64, 200, 400]) {
            let expected = Duration::from_millis(expected);
            assert!(*gap >= expected && *gap < expected + Duration::from_millis(5));
        }
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sink.stats().snapshot().retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_status_is_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::script(vec![429, 429, 200]));
        let callback = Arc::new(RecordingCallback::new());
        let mut settings = settings(2, Duration::ZERO);
        settings.retryable_status_codes.insert(429);
        let sink = sink(settings, 3, &transport, &callback);

        sink.submit(batch_of(&[7])).await.unwrap();
        sink.drain().await;

        let reports = callback.reports();
        assert_eq!(reports[0].outcome, OutcomeKind::Success);
        assert_eq!(reports[0].attempts, 3);
        assert_eq!(transport.calls(), 3);
        assert_eq!(sink.stats().snapshot().records_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport::always(400));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(2, Duration::ZERO), 5, &transport, &callback);

        sink.submit(batch_of(&[1])).await.unwrap();
        sink.drain().await;

        let reports = callback.reports();
        assert_eq!(reports[0].outcome, OutcomeKind::PermanentFailure);
        assert_eq!(reports[0].attempts, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_retried() {
        let transport = Arc::new(ScriptedTransport::with_results(vec![
            Err(TransportError::Connect("connection refused".to_string())),
            Err(TransportError::Timeout),
            Ok(HttpResponse::new(204)),
        ]));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(1, Duration::ZERO), 3, &transport, &callback);

        sink.submit(batch_of(&[1])).await.unwrap();
        sink.drain().await;

        let reports = callback.reports();
        assert!(reports[0].is_success());
        assert_eq!(reports[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_batch_is_returned_intact() {
        let transport = Arc::new(ScriptedTransport::ok().with_delay(Duration::from_secs(1)));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(1, Duration::from_millis(10)), 0, &transport, &callback);

        sink.submit(batch_of(&[1])).await.unwrap();

        let second = batch_of(&[2, 3]);
        let id = second.id().clone();
        let err = sink.submit(second).await.unwrap_err();
        assert!(matches!(
            err.reason,
            SinkError::CapacityExceeded { in_flight: 1, .. }
        ));
        let returned = err.into_batch();
        assert_eq!(returned.id(), &id);
        assert_eq!(returned.len(), 2);

        sink.drain().await;
        sink.submit(returned).await.unwrap();
        sink.drain().await;

        assert_eq!(callback.reports().len(), 2);
        assert_eq!(sink.stats().snapshot().capacity_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_admission_timeout_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::ok().with_delay(Duration::from_secs(1)));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(1, Duration::ZERO), 0, &transport, &callback);

        sink.submit(batch_of(&[1])).await.unwrap();
        let err = sink.submit(batch_of(&[2])).await.unwrap_err();
        match err.reason {
            SinkError::CapacityExceeded { waited, .. } => assert_eq!(waited, Duration::ZERO),
            other => panic!("unexpected error: {other}"),
        }
        sink.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_sink_rejects_and_drains() {
        let transport = Arc::new(ScriptedTransport::ok().with_delay(Duration::from_millis(200)));
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(4, Duration::ZERO), 0, &transport, &callback);

        sink.submit(batch_of(&[1])).await.unwrap();
        sink.submit(batch_of(&[2])).await.unwrap();
        sink.close();

        let err = sink.submit(batch_of(&[3])).await.unwrap_err();
        assert!(matches!(err.reason, SinkError::Closed));
        let err = sink.submit_wait(batch_of(&[4])).await.unwrap_err();
        assert!(matches!(err.reason, SinkError::Closed));

        sink.drain().await;
        assert_eq!(callback.reports().len(), 2);
        assert!(callback.reports().iter().all(|r| r.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_runs_before_slot_is_released() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(
            ScriptedTransport::ok()
                .with_delay(Duration::from_millis(10))
                .with_log(log.clone()),
        );
        let callback = Arc::new(RecordingCallback::new().with_log(log.clone()));
        let sink = sink(settings(1, Duration::from_secs(60)), 0, &transport, &callback);

        for n in 1..=3 {
            sink.submit(batch_of(&[n])).await.unwrap();
        }
        sink.drain().await;

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["send 1", "report 1", "send 2", "report 2", "send 3", "report 3"]
        );
    }

    #[tokio::test]
    async fn test_encoding_failure_is_reported() {
        let transport = Arc::new(ScriptedTransport::ok());
        let callback = Arc::new(RecordingCallback::new());
        let sink = sink(settings(1, Duration::ZERO), 0, &transport, &callback);

        let record = Record::new(serde_json::json!({ "n": 1 }));
        sink.report_encoding_failure(record.clone(), &SinkError::encoding("not a string"))
            .await;

        let reports = callback.reports();
        assert_eq!(reports[0].attempts, 0);
        assert_eq!(reports[0].records, vec![record]);
        assert_eq!(transport.calls(), 0);
        assert_eq!(sink.stats().snapshot().encoding_failures, 1);
    }
}

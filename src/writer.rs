//! Upstream-facing writer
//!
//! [`HttpSinkWriter`] accepts records one at a time, encodes them, groups them with the
//! [`Batcher`] and submits sealed batches to the [`AsyncHttpSink`]. A background task
//! seals batches whose linger time has elapsed.
//!
//! Sealed batches that could not be admitted yet are parked in order. While any batch
//! is parked, `write` refuses new records with `CapacityExceeded`, which is how
//! backpressure reaches the caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchConfig, Batcher};
use crate::callback::PostRequestCallback;
use crate::core::config::SinkConfig;
use crate::core::errors::{SinkError, SinkResult};
use crate::encoding::{Record, RequestEncoder};
use crate::sink::{AsyncHttpSink, HttpTransport, SinkStatsSnapshot};

/// Shortest sleep of the linger task
const MIN_LINGER_TICK: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct WriterState {
    batcher: Batcher,
    parked: VecDeque<Batch>,
}

/// Accepts records and delivers them in batches
pub struct HttpSinkWriter {
    encoder: RequestEncoder,
    sink: AsyncHttpSink,
    state: Arc<Mutex<WriterState>>,
    stop: Arc<Notify>,
    linger_task: Option<JoinHandle<()>>,
}

impl HttpSinkWriter {
    /// Build a writer from configuration
    ///
    /// Must be called inside a tokio runtime; the linger task is spawned here.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated sink configuration
    /// * `transport` - HTTP client used for every attempt
    /// * `callback` - Receives one report per batch and per unencodable record
    ///
    /// # Returns
    ///
    /// The writer, or a configuration error when the encryption key material is invalid
    pub fn new(
        config: &SinkConfig,
        transport: Arc<dyn HttpTransport>,
        callback: Arc<dyn PostRequestCallback>,
    ) -> SinkResult<Self> {
        let encoder = RequestEncoder::new(config)?;
        let sink = AsyncHttpSink::new(config, transport, callback);
        Ok(Self::from_parts(encoder, sink, config.batch))
    }

    pub fn from_parts(encoder: RequestEncoder, sink: AsyncHttpSink, batch: BatchConfig) -> Self {
        let state = Arc::new(Mutex::new(WriterState {
            batcher: Batcher::new(batch),
            parked: VecDeque::new(),
        }));
        let stop = Arc::new(Notify::new());
        let linger_task = tokio::spawn(linger_loop(
            Arc::clone(&state),
            sink.clone(),
            Arc::clone(&stop),
            batch.linger,
        ));

        info!(
            "HTTP sink writer started (batch size {}, {} bytes, linger {}, encryption {})",
            batch.max_count,
            batch.max_bytes,
            humantime::format_duration(batch.linger),
            encoder.encryption_mode()
        );

        Self {
            encoder,
            sink,
            state,
            stop,
            linger_task: Some(linger_task),
        }
    }

    pub fn sink(&self) -> &AsyncHttpSink {
        &self.sink
    }

    /// Accept one record
    ///
    /// Returns `CapacityExceeded` without taking the record when earlier batches are
    /// still waiting for a slot; the caller retries the same record later. Records that
    /// cannot be encoded are reported to the callback and do not fail the call.
    pub async fn write(&self, record: Record) -> SinkResult<()> {
        if self.sink.is_closed() {
            return Err(SinkError::Closed);
        }

        let mut state = self.state.lock().await;
        submit_parked(&self.sink, &mut state).await?;

        let request = match self.encoder.encode(&record) {
            Ok(request) => request,
            Err(e) => {
                drop(state);
                self.sink.report_encoding_failure(record, &e).await;
                return Ok(());
            }
        };

        if let Some(batch) = state.batcher.offer(request) {
            state.parked.push_back(batch);
        }
        // a request over the byte limit seals on its own right after a byte overflow
        if let Some(batch) = state.batcher.poll() {
            state.parked.push_back(batch);
        }

        match submit_parked(&self.sink, &mut state).await {
            Err(e) if e.is_transient() => Ok(()),
            other => other,
        }
    }

    /// Seal the open batch and try to submit everything parked
    pub async fn flush(&self) -> SinkResult<()> {
        let mut state = self.state.lock().await;
        if let Some(batch) = state.batcher.flush() {
            state.parked.push_back(batch);
        }
        submit_parked(&self.sink, &mut state).await
    }

    /// Seal, submit and wait until every batch so far has a terminal outcome
    pub async fn flush_and_wait(&self) -> SinkResult<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(batch) = state.batcher.flush() {
                state.parked.push_back(batch);
            }
            while let Some(batch) = state.parked.pop_front() {
                if let Err(e) = self.sink.submit_wait(batch).await {
                    state.parked.push_front(e.batch);
                    return Err(e.reason);
                }
            }
        }
        self.sink.drain().await;
        Ok(())
    }

    /// Deliver everything accepted so far, then shut the sink down
    ///
    /// Batches that can no longer be admitted are reported as failed, so every
    /// accepted record still gets exactly one outcome.
    ///
    /// # Returns
    ///
    /// Final statistics of the sink
    pub async fn close(mut self) -> SinkResult<SinkStatsSnapshot> {
        self.stop.notify_one();
        if let Some(task) = self.linger_task.take() {
            task.await?;
        }

        let mut state = self.state.lock().await;
        if let Some(batch) = state.batcher.flush() {
            state.parked.push_back(batch);
        }
        while let Some(batch) = state.parked.pop_front() {
            if let Err(e) = self.sink.submit_wait(batch).await {
                self.sink.report_undelivered(e.batch, &e.reason).await;
            }
        }
        drop(state);

        self.sink.close();
        self.sink.drain().await;

        let stats = self.sink.stats().snapshot();
        info!(
            "HTTP sink writer closed: {} batches delivered, {} failed, {} records delivered, {} records failed, {} retries, peak in-flight {}",
            stats.batches_succeeded,
            stats.batches_failed,
            stats.records_delivered,
            stats.records_failed,
            stats.retries,
            stats.peak_in_flight
        );
        Ok(stats)
    }
}

impl Drop for HttpSinkWriter {
    fn drop(&mut self) {
        if let Some(task) = self.linger_task.take() {
            task.abort();
        }
    }
}

/// Submit parked batches in order, stopping at the first one that is refused
async fn submit_parked(sink: &AsyncHttpSink, state: &mut WriterState) -> SinkResult<()> {
    while let Some(batch) = state.parked.pop_front() {
        if let Err(e) = sink.submit(batch).await {
            debug!("Parking batch {}: {}", e.batch.id(), e.reason);
            state.parked.push_front(e.batch);
            return Err(e.reason);
        }
    }
    Ok(())
}

async fn linger_loop(
    state: Arc<Mutex<WriterState>>,
    sink: AsyncHttpSink,
    stop: Arc<Notify>,
    linger: Duration,
) {
    loop {
        let wait = {
            let state = state.lock().await;
            state
                .batcher
                .linger_remaining(Instant::now())
                .unwrap_or(linger)
                .max(MIN_LINGER_TICK)
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.notified() => break,
        }

        let mut state = state.lock().await;
        if let Some(batch) = state.batcher.poll() {
            state.parked.push_back(batch);
        }
        match submit_parked(&sink, &mut state).await {
            Ok(()) => {}
            Err(SinkError::Closed) => break,
            Err(e) if e.is_transient() => {}
            Err(e) => warn!("Linger flush failed: {}", e),
        }
    }
    debug!("Linger task stopped");
}

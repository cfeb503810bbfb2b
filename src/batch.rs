//! Batching of encoded requests
//!
//! The [`Batcher`] keeps one open batch and seals it when the record count, the
//! cumulative body size or the linger time since its first member reaches the
//! configured limit. A sealed [`Batch`] is immutable and is handed to the sink.
//!
//! Every offered request ends up in exactly one batch, in arrival order.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::encoding::{EncodedRequest, Record};
use crate::tracing_context::CorrelationId;

/// Thresholds for sealing a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of requests per batch
    pub max_count: usize,
    /// Maximum size of the joined request body in bytes, separators included
    pub max_bytes: usize,
    /// Maximum time a partially filled batch stays open
    pub linger: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_count: 500,
            max_bytes: 5 * 1024 * 1024,
            linger: Duration::from_secs(5),
        }
    }
}

/// Bytes a body layout adds around the members (`[` and `]`)
const FRAME_BYTES: usize = 2;

/// Bytes a body layout adds per member beyond the first (`,` or `\n`)
const SEPARATOR_BYTES: usize = 1;

/// Why a batch was sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    Count,
    Bytes,
    Linger,
    Flush,
}

/// A sealed, ordered group of encoded requests
#[derive(Debug)]
pub struct Batch {
    id: CorrelationId,
    requests: Vec<EncodedRequest>,
    size_bytes: usize,
    reason: SealReason,
}

impl Batch {
    fn seal(requests: Vec<EncodedRequest>, size_bytes: usize, reason: SealReason) -> Self {
        Self {
            id: CorrelationId::new_uuid(),
            requests,
            size_bytes,
            reason,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn requests(&self) -> &[EncodedRequest] {
        &self.requests
    }

    /// Member records in batch order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.requests.iter().map(|r| &r.record)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Sum of member body sizes, without layout separators
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn seal_reason(&self) -> SealReason {
        self.reason
    }

    pub fn into_records(self) -> Vec<Record> {
        self.requests.into_iter().map(|r| r.record).collect()
    }
}

/// Accumulates encoded requests into batches
#[derive(Debug)]
pub struct Batcher {
    config: BatchConfig,
    open: Vec<EncodedRequest>,
    open_bytes: usize,
    opened_at: Option<Instant>,
}

impl Batcher {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            open: Vec::with_capacity(config.max_count.min(1024)),
            open_bytes: 0,
            opened_at: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Number of requests in the open batch
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Offer a request, returning a sealed batch if a threshold was reached
    pub fn offer(&mut self, request: EncodedRequest) -> Option<Batch> {
        self.offer_at(request, Instant::now())
    }

    /// Same as [`Batcher::offer`] with an explicit clock reading
    ///
    /// If the request would push a non-empty open batch over the byte limit, the open
    /// batch is sealed and returned and the request starts the next one. A request
    /// larger than the limit on its own forms a batch by itself.
    ///
    /// The limit applies to the joined body, so array brackets and separators count.
    pub fn offer_at(&mut self, request: EncodedRequest, now: Instant) -> Option<Batch> {
        let size = request.size();

        if !self.open.is_empty()
            && self.framed_bytes() + SEPARATOR_BYTES + size > self.config.max_bytes
        {
            let sealed = self.seal(SealReason::Bytes);
            self.push(request, size, now);
            return sealed;
        }

        self.push(request, size, now);
        self.poll_at(now)
    }

    /// Seal the open batch if any threshold is already met
    pub fn poll(&mut self) -> Option<Batch> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<Batch> {
        let reason = self.ready_reason(now)?;
        self.seal(reason)
    }

    /// Force sealing of a partially filled batch
    pub fn flush(&mut self) -> Option<Batch> {
        self.seal(SealReason::Flush)
    }

    /// Time left before the open batch must be sealed for lingering
    pub fn linger_remaining(&self, now: Instant) -> Option<Duration> {
        self.opened_at
            .map(|opened| self.config.linger.saturating_sub(now.duration_since(opened)))
    }

    fn ready_reason(&self, now: Instant) -> Option<SealReason> {
        if self.open.is_empty() {
            return None;
        }
        if self.open.len() >= self.config.max_count {
            Some(SealReason::Count)
        } else if self.framed_bytes() >= self.config.max_bytes {
            Some(SealReason::Bytes)
        } else if self.linger_remaining(now) == Some(Duration::ZERO) {
            Some(SealReason::Linger)
        } else {
            None
        }
    }

    /// Upper bound of the joined body size of the open batch in any layout
    fn framed_bytes(&self) -> usize {
        if self.open.is_empty() {
            return 0;
        }
        self.open_bytes + FRAME_BYTES + (self.open.len() - 1) * SEPARATOR_BYTES
    }

    fn push(&mut self, request: EncodedRequest, size: usize, now: Instant) {
        if self.open.is_empty() {
            self.opened_at = Some(now);
        }
        self.open_bytes += size;
        self.open.push(request);
    }

    fn seal(&mut self, reason: SealReason) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        let requests = std::mem::take(&mut self.open);
        let size_bytes = std::mem::replace(&mut self.open_bytes, 0);
        self.opened_at = None;

        let batch = Batch::seal(requests, size_bytes, reason);
        debug!(
            "Sealed batch {} with {} records ({} bytes, reason {:?})",
            batch.id(),
            batch.len(),
            batch.size_bytes(),
            reason
        );
        Some(batch)
    }
}

//! Test doubles for the transport and the callback

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::batch::{Batch, BatchConfig, Batcher};
use crate::callback::PostRequestCallback;
use crate::core::config::HttpMethod;
use crate::encoding::{EncodedRequest, Record};

use super::{BodyLayout, DispatchReport, DispatchSettings, HttpRequest, HttpResponse};
use super::{HttpTransport, TransportError};

pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

/// Encoded request whose body and record are both `{"n": n}`
pub(crate) fn encoded(n: u64) -> EncodedRequest {
    let value = json!({ "n": n });
    EncodedRequest {
        method: HttpMethod::Post,
        url: "http://localhost/ingest".to_string(),
        headers: BTreeMap::new(),
        body: serde_json::to_vec(&value).unwrap(),
        record: Record::new(value),
    }
}

pub(crate) fn batch_of(numbers: &[u64]) -> Batch {
    let mut batcher = Batcher::new(BatchConfig::default());
    for n in numbers {
        assert!(batcher.offer(encoded(*n)).is_none());
    }
    batcher.flush().unwrap()
}

pub(crate) fn settings(max_in_flight: usize, admission_timeout: Duration) -> DispatchSettings {
    DispatchSettings {
        max_in_flight,
        admission_timeout,
        request_timeout: Duration::from_secs(30),
        layout: BodyLayout::JsonArray,
        retryable_status_codes: BTreeSet::new(),
    }
}

/// `n` values carried by a request body, for JSON arrays and single objects
pub(crate) fn numbers_in_body(body: &[u8]) -> Vec<u64> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => items.iter().filter_map(|v| v["n"].as_u64()).collect(),
        Ok(value) => value["n"].as_u64().into_iter().collect(),
        Err(_) => Vec::new(),
    }
}

fn join(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Transport answering from a script, then with a fallback
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    fallback: Result<HttpResponse, TransportError>,
    delay: Duration,
    sent: Mutex<Vec<(Instant, HttpRequest)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    log: Option<EventLog>,
}

impl ScriptedTransport {
    pub(crate) fn with_results(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(HttpResponse::new(200)),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            log: None,
        }
    }

    pub(crate) fn ok() -> Self {
        Self::with_results(Vec::new())
    }

    pub(crate) fn always(status: u16) -> Self {
        let mut transport = Self::ok();
        transport.fallback = Ok(HttpResponse::new(status));
        transport
    }

    pub(crate) fn script(statuses: Vec<u16>) -> Self {
        Self::with_results(
            statuses
                .into_iter()
                .map(|s| Ok(HttpResponse::new(s)))
                .collect(),
        )
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Time between consecutive sends
    pub(crate) fn gaps(&self) -> Vec<Duration> {
        let sent = self.sent.lock().unwrap();
        sent.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Every `n` delivered, in send order
    pub(crate) fn delivered(&self) -> Vec<u64> {
        self.requests()
            .iter()
            .flat_map(|r| numbers_in_body(&r.body))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        if let Some(log) = &self.log {
            log.lock()
                .unwrap()
                .push(format!("send {}", join(&numbers_in_body(&request.body))));
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Callback keeping every report it receives
#[derive(Default)]
pub(crate) struct RecordingCallback {
    reports: Mutex<Vec<DispatchReport>>,
    log: Option<EventLog>,
}

impl RecordingCallback {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn reports(&self) -> Vec<DispatchReport> {
        self.reports.lock().unwrap().clone()
    }

    /// Every `n` reported, in report order
    pub(crate) fn reported(&self) -> Vec<u64> {
        self.reports()
            .iter()
            .flat_map(|r| r.records.iter().filter_map(|rec| rec.value["n"].as_u64()))
            .collect()
    }
}

#[async_trait]
impl PostRequestCallback for RecordingCallback {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_complete(&self, report: &DispatchReport) {
        if let Some(log) = &self.log {
            let numbers: Vec<u64> = report
                .records
                .iter()
                .filter_map(|r| r.value["n"].as_u64())
                .collect();
            log.lock()
                .unwrap()
                .push(format!("report {}", join(&numbers)));
        }
        self.reports.lock().unwrap().push(report.clone());
    }
}

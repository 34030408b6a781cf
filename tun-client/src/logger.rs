//! Request logger backing the observability feed.
//!
//! Each inbound request is recorded under a fresh correlation id. When its
//! response arrives (forwarded or synthesized by the gate) the exchange is
//! classified, logged, and published to feed subscribers.

use crate::gate::{ResponseLog, REQUEST_ID_HEADER};
use crate::plugins::{ClassificationEngine, PluginData};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tun_core::protocol::{HttpRequestData, HttpResponseData, RequestId};

/// Default number of exchanges kept in memory.
pub const DEFAULT_MAX_LOGGED_REQUESTS: usize = 100;

const FEED_CAPACITY: usize = 64;

/// One request/response exchange.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedRequest {
    pub id: String,
    pub request: HttpRequestData,
    pub response: Option<HttpResponseData>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub plugin_data: Option<PluginData>,
}

impl LoggedRequest {
    pub fn new(id: impl Into<String>, request: HttpRequestData) -> Self {
        Self {
            id: id.into(),
            request,
            response: None,
            started_at: Utc::now(),
            duration_ms: None,
            plugin_data: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }
}

/// Bounded in-memory log of recent exchanges.
pub struct RequestLogger {
    entries: DashMap<String, LoggedRequest>,
    order: Mutex<VecDeque<String>>,
    max_entries: usize,
    engine: ClassificationEngine,
    feed: broadcast::Sender<LoggedRequest>,
}

impl RequestLogger {
    pub fn new(engine: ClassificationEngine, max_entries: usize) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
            engine,
            feed,
        }
    }

    /// Record an inbound request and stamp its correlation id header.
    pub fn log_request(&self, request: &mut HttpRequestData) -> String {
        let id = RequestId::new().to_string();
        request.set_header(REQUEST_ID_HEADER, id.clone());

        debug!("Request {} {} {}", id, request.method, request.uri);
        self.entries
            .insert(id.clone(), LoggedRequest::new(id.clone(), request.clone()));

        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back(id.clone());
        while order.len() > self.max_entries {
            if let Some(evicted) = order.pop_front() {
                self.entries.remove(&evicted);
            }
        }

        id
    }

    /// Attach the response for `id`, classify the exchange and publish it.
    pub fn log_response(&self, id: &str, response: HttpResponseData) {
        let completed = {
            let Some(mut entry) = self.entries.get_mut(id) else {
                debug!("Ignoring response for unknown request {}", id);
                return;
            };

            entry.duration_ms = Some((Utc::now() - entry.started_at).num_milliseconds());
            entry.response = Some(response);
            entry.plugin_data = self.engine.classify(&entry);
            entry.clone()
        };

        let status = completed.response.as_ref().map(|r| r.status).unwrap_or_default();
        info!(
            request_id = %completed.id,
            method = %completed.request.method,
            uri = %completed.request.uri,
            status,
            duration_ms = completed.duration_ms.unwrap_or_default(),
            plugin = completed.plugin_data.as_ref().map(PluginData::plugin).unwrap_or("-"),
            label = completed
                .plugin_data
                .as_ref()
                .and_then(PluginData::label)
                .unwrap_or("-"),
            "Request completed"
        );

        // No subscribers is fine.
        let _ = self.feed.send(completed);
    }

    pub fn get(&self, id: &str) -> Option<LoggedRequest> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    /// Logged exchanges, newest first.
    pub fn recent(&self) -> Vec<LoggedRequest> {
        let order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order
            .iter()
            .rev()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.clear();
        self.entries.clear();
    }

    /// Completed exchanges as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<LoggedRequest> {
        self.feed.subscribe()
    }

    pub fn engine(&self) -> &ClassificationEngine {
        &self.engine
    }
}

impl ResponseLog for RequestLogger {
    fn log_response_by_id(&self, request_id: &str, raw_response: &[u8]) {
        match HttpResponseData::from_raw(raw_response) {
            Ok(response) => self.log_response(request_id, response),
            Err(e) => warn!("Unparseable response for request {}: {}", request_id, e),
        }
    }
}

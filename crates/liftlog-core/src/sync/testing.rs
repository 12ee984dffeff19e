//! In-process transports for sync tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::Notify;

use super::{token_provider, SyncEndpoint, SyncError, SyncResult, SyncTransport, TokenProvider, TransportResponse};
use crate::db::{MemoryPersistence, SyncPersistence};
use crate::models::Document;
use crate::state::LocalState;
use crate::Result;

pub fn respond(status: u16, body: &Value) -> SyncResult<TransportResponse> {
    Ok(TransportResponse {
        status,
        body: body.to_string(),
    })
}

/// A token provider handing out `token` and counting its calls.
pub fn counting_provider(token: &'static str, calls: &Arc<AtomicUsize>) -> TokenProvider {
    let calls = Arc::clone(calls);
    token_provider(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(token.to_string()) }
    })
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: SyncEndpoint,
    pub token: String,
    pub body: Value,
}

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<SyncResult<TransportResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    push_gate: Option<Arc<Notify>>,
    pub push_started: Arc<Notify>,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = SyncResult<TransportResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Pushes wait on `gate` before answering.
    pub fn gated(
        responses: impl IntoIterator<Item = SyncResult<TransportResponse>>,
        gate: Arc<Notify>,
    ) -> Self {
        Self {
            push_gate: Some(gate),
            ..Self::new(responses)
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SyncTransport for ScriptedTransport {
    async fn post(
        &self,
        endpoint: SyncEndpoint,
        bearer_token: &str,
        body: &Value,
    ) -> SyncResult<TransportResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            endpoint,
            token: bearer_token.to_string(),
            body: body.clone(),
        });
        if endpoint == SyncEndpoint::Push {
            self.push_started.notify_one();
            if let Some(gate) = &self.push_gate {
                gate.notified().await;
            }
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Network("no scripted response left".to_string())))
    }
}

#[derive(Default)]
struct ServerRecord {
    version: u64,
    doc: Document,
    deleted: bool,
}

#[derive(Default)]
struct ServerState {
    records: HashMap<(String, String), ServerRecord>,
    log: Vec<Value>,
    applied_ops: HashSet<String>,
}

/// A tiny sync authority: version checks on push, an ordered change log for
/// pull, cursors are log offsets.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    offline: AtomicBool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate a write from another device.
    pub fn remote_upsert(&self, entity: &str, entity_id: &str, fields: &Value) {
        let mut state = self.state.lock().unwrap();
        let Value::Object(fields) = fields.clone() else {
            panic!("fields must be an object");
        };
        record_upsert(&mut state, entity, entity_id, fields);
    }

    pub fn version(&self, entity: &str, entity_id: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(entity.to_string(), entity_id.to_string()))
            .map_or(0, |record| record.version)
    }

    fn push(&self, body: &Value) -> Value {
        let mut state = self.state.lock().unwrap();
        let mut acknowledged = Vec::new();
        let mut conflicts = Vec::new();
        let mut failed = Vec::new();

        for mutation in body["mutations"].as_array().cloned().unwrap_or_default() {
            let op_id = mutation["opId"].as_str().unwrap_or_default().to_string();
            if state.applied_ops.contains(&op_id) {
                acknowledged.push(json!(op_id));
                continue;
            }
            let entity = mutation["entity"].as_str().unwrap_or_default().to_string();
            let entity_id = mutation["entityId"].as_str().unwrap_or_default().to_string();
            if mutation["payload"]["reject"] == json!(true) {
                failed.push(json!({"opId": op_id, "reason": "invalid_payload", "message": "rejected by test"}));
                continue;
            }

            let key = (entity.clone(), entity_id.clone());
            let current = state.records.get(&key).map_or(0, |record| record.version);
            if mutation["baseVersion"].as_u64() != Some(current) {
                let server_doc = state.records.get(&key).map(|record| {
                    let mut doc = record.doc.clone();
                    doc.insert("version".to_string(), json!(record.version));
                    Value::Object(doc)
                });
                conflicts.push(json!({
                    "opId": op_id,
                    "entity": entity,
                    "entityId": entity_id,
                    "serverVersion": current,
                    "reason": "version_mismatch",
                    "serverDoc": server_doc,
                }));
                continue;
            }

            if mutation["type"] == json!("delete") {
                let record = state.records.entry(key).or_default();
                record.version += 1;
                record.deleted = true;
                let version = record.version;
                state.log.push(json!({
                    "type": "delete",
                    "entity": entity,
                    "entityId": entity_id,
                    "version": version,
                }));
            } else {
                let Value::Object(payload) = mutation["payload"].clone() else {
                    panic!("upsert without payload");
                };
                record_upsert(&mut state, &entity, &entity_id, payload);
            }
            state.applied_ops.insert(op_id.clone());
            acknowledged.push(json!(op_id));
        }

        json!({
            "acknowledgedOpIds": acknowledged,
            "conflicts": conflicts,
            "failed": failed,
        })
    }

    fn pull(&self, body: &Value) -> Value {
        let state = self.state.lock().unwrap();
        let from = body["cursor"]
            .as_str()
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0)
            .min(state.log.len());
        let mut changes = state.log[from..].to_vec();

        for key in body["refetch"].as_array().cloned().unwrap_or_default() {
            let entity = key["entity"].as_str().unwrap_or_default().to_string();
            let entity_id = key["entityId"].as_str().unwrap_or_default().to_string();
            if let Some(record) = state.records.get(&(entity.clone(), entity_id.clone())) {
                let mut doc = record.doc.clone();
                doc.insert("version".to_string(), json!(record.version));
                doc.insert("is_deleted".to_string(), json!(record.deleted));
                changes.push(json!({
                    "type": "upsert",
                    "entity": entity,
                    "entityId": entity_id,
                    "doc": doc,
                }));
            }
        }

        json!({
            "changes": changes,
            "newCursor": state.log.len().to_string(),
        })
    }
}

fn record_upsert(state: &mut ServerState, entity: &str, entity_id: &str, fields: Document) {
    let record = state
        .records
        .entry((entity.to_string(), entity_id.to_string()))
        .or_default();
    record.version += 1;
    record.deleted = false;
    record.doc.extend(fields);
    record.doc.insert("id".to_string(), json!(entity_id));

    let mut doc = record.doc.clone();
    doc.insert("version".to_string(), json!(record.version));
    state.log.push(json!({
        "type": "upsert",
        "entity": entity,
        "entityId": entity_id,
        "doc": doc,
    }));
}

impl SyncTransport for FakeServer {
    async fn post(
        &self,
        endpoint: SyncEndpoint,
        _bearer_token: &str,
        body: &Value,
    ) -> SyncResult<TransportResponse> {
        tokio::task::yield_now().await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Timeout);
        }
        let response = match endpoint {
            SyncEndpoint::Push => self.push(body),
            SyncEndpoint::Pull => self.pull(body),
        };
        respond(200, &response)
    }
}

/// Memory persistence whose saves can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    failing: Arc<AtomicBool>,
}

impl FlakyPersistence {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SyncPersistence for FlakyPersistence {
    fn load(&self) -> Result<Option<LocalState>> {
        self.inner.load()
    }

    fn save(&self, state: &LocalState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(crate::Error::Database("disk full".to_string()));
        }
        self.inner.save(state)
    }
}

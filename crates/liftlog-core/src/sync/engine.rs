//! Sync orchestrator
//!
//! Owns the device's [`LocalState`] and runs push→pull→apply cycles, one at a
//! time. Every change to the state is computed on a copy, saved through
//! [`SyncPersistence`], and only then made visible, so a failed save leaves
//! both memory and disk at their previous values.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use super::client::{PullOutcome, PushOutcome, SyncApiClient};
use super::resolver::{self, ConflictChoice, Resolution};
use super::transport::{HttpTransport, SyncTransport};
use super::wire::{PullRequest, PushRequest, RejectedMutation};
use super::{SyncError, SyncErrorKind, SyncResult};
use crate::db::{MemoryPersistence, SyncPersistence};
use crate::error::Error;
use crate::models::{Conflict, Document, EntityKind, Mutation, RefetchKey, Record};
use crate::queue::QueuedMutation;
use crate::state::{LocalState, SyncState};
use crate::store::ApplySummary;
use crate::util::{value_to_identifier, UNKNOWN_IDENTIFIER};

const PHASE_IDLE: u8 = 0;
const PHASE_PUSHING: u8 = 1;
const PHASE_PULLING: u8 = 2;

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Mutations sent in the push
    pub pushed: usize,
    pub acknowledged: Vec<String>,
    pub rejected: Vec<RejectedMutation>,
    pub conflicts: Vec<Conflict>,
    pub applied_changes: ApplySummary,
    /// Cursor after the cycle
    pub cursor: Option<String>,
    /// The request was folded into a cycle that was already pushing
    pub coalesced: bool,
}

impl SyncReport {
    fn coalesced(cursor: Option<String>) -> Self {
        Self {
            cursor,
            coalesced: true,
            ..Self::default()
        }
    }
}

pub struct SyncEngine<T = HttpTransport> {
    client: Option<SyncApiClient<T>>,
    persistence: Arc<dyn SyncPersistence>,
    local: Mutex<LocalState>,
    cycle: tokio::sync::Mutex<()>,
    phase: AtomicU8,
    status: Mutex<SyncState>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Load the saved state, or start a fresh one and save it.
    ///
    /// A pinned `device_id` replaces the stored one; otherwise a fresh
    /// install gets a new UUID v7.
    pub fn open(
        persistence: Arc<dyn SyncPersistence>,
        device_id: Option<String>,
    ) -> SyncResult<Self> {
        let state = match persistence.load()? {
            Some(mut state) => {
                if let Some(device_id) = device_id.filter(|id| *id != state.device_id) {
                    tracing::info!(%device_id, "Using configured device id");
                    state.device_id = device_id;
                    persistence.save(&state)?;
                }
                state
            }
            None => {
                let state = LocalState::new(device_id.unwrap_or_else(new_device_id));
                tracing::info!(device_id = %state.device_id, "Initialized sync state");
                persistence.save(&state)?;
                state
            }
        };
        Ok(Self::from_state(persistence, state))
    }

    /// An engine backed by process memory only.
    pub fn in_memory() -> Self {
        Self::from_state(
            Arc::new(MemoryPersistence::new()),
            LocalState::new(new_device_id()),
        )
    }

    fn from_state(persistence: Arc<dyn SyncPersistence>, state: LocalState) -> Self {
        Self {
            client: None,
            persistence,
            local: Mutex::new(state),
            cycle: tokio::sync::Mutex::new(()),
            phase: AtomicU8::new(PHASE_IDLE),
            status: Mutex::new(SyncState::Idle),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: SyncApiClient<T>) -> Self {
        self.client = Some(client);
        self
    }

    pub const fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub fn device_id(&self) -> String {
        self.lock_local().device_id.clone()
    }

    pub fn cursor(&self) -> Option<String> {
        self.lock_local().cursor.clone()
    }

    pub fn state(&self) -> SyncState {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the whole local state.
    pub fn snapshot(&self) -> LocalState {
        self.lock_local().clone()
    }

    pub fn record(&self, kind: EntityKind, id: &str) -> Option<Record> {
        self.lock_local().store.get(kind, id).cloned()
    }

    pub fn active(&self, kind: EntityKind) -> Vec<Record> {
        self.lock_local()
            .store
            .active(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn all(&self, kind: EntityKind) -> Vec<Record> {
        self.lock_local()
            .store
            .all(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Queued mutations, blocked ones included.
    pub fn queued(&self) -> Vec<QueuedMutation> {
        self.lock_local().queue.iter().cloned().collect()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.lock_local().conflicts.clone()
    }

    /// Create or edit a record locally and queue the write.
    ///
    /// A document without an `id` gets a fresh UUID v7. `version` and
    /// `is_deleted` are server-owned and dropped from the payload.
    pub fn upsert(&self, kind: EntityKind, mut doc: Document) -> SyncResult<Record> {
        doc.remove("version");
        doc.remove("is_deleted");
        let id = doc
            .remove("id")
            .as_ref()
            .and_then(value_to_identifier)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        self.update_local(|state| {
            let mutation = Mutation::upsert(kind, id.clone(), state.store.version(kind, &id), doc);
            state.store.apply_mutation(&mutation)?;
            state.queue.push(mutation);
            tracing::debug!(entity = %kind, %id, "Queued local upsert");
            stored_record(state, kind, &id)
        })
    }

    /// Tombstone a record locally and queue the delete.
    pub fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<Record> {
        self.update_local(|state| {
            let Some(record) = state.store.get(kind, id) else {
                return Err(Error::NotFound(format!("{kind} {id}")).into());
            };
            let mutation = Mutation::delete(kind, id, record.version);
            state.store.apply_mutation(&mutation)?;
            state.queue.push(mutation);
            tracing::debug!(entity = %kind, %id, "Queued local delete");
            stored_record(state, kind, id)
        })
    }

    /// Resolve one open conflict.
    pub fn resolve(&self, op_id: &str, choice: ConflictChoice) -> SyncResult<Resolution> {
        self.update_local(|state| resolver::resolve(state, op_id, choice))
    }

    /// Resolve a conflict and run a cycle so the decision reaches the server.
    pub async fn resolve_and_sync(
        &self,
        op_id: &str,
        choice: ConflictChoice,
    ) -> SyncResult<(Resolution, SyncReport)> {
        let resolution = self.resolve(op_id, choice)?;
        let report = self.sync().await?;
        Ok((resolution, report))
    }

    /// Forget all synced data; the device id survives.
    pub fn reset(&self) -> SyncResult<()> {
        self.update_local(|state| {
            state.reset();
            Ok(())
        })
    }

    /// Run one push→pull→apply cycle.
    ///
    /// A call made while another cycle is still pushing returns a coalesced
    /// report at once; a call made while a cycle is pulling waits for it and
    /// then runs its own.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let Some(client) = &self.client else {
            return Err(SyncError::NotConfigured);
        };
        if self.phase.load(Ordering::SeqCst) == PHASE_PUSHING {
            tracing::debug!("Sync already pushing, coalescing request");
            return Ok(SyncReport::coalesced(self.cursor()));
        }

        let _cycle = self.cycle.lock().await;
        let _phase = PhaseReset(&self.phase);
        self.set_status(SyncState::Syncing);
        let result = self.run_cycle(client).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    pushed = report.pushed,
                    acknowledged = report.acknowledged.len(),
                    conflicts = report.conflicts.len(),
                    rejected = report.rejected.len(),
                    applied = report.applied_changes.applied,
                    "Sync cycle finished"
                );
                self.set_status(SyncState::Synced);
            }
            Err(error) if error.kind() == SyncErrorKind::Unauthorized => {
                tracing::warn!("Sync cycle needs re-authentication: {error}");
                self.set_status(SyncState::NeedsAuth);
            }
            Err(error) => {
                tracing::warn!("Sync cycle failed: {error}");
                self.set_status(SyncState::Error);
            }
        }
        result
    }

    async fn run_cycle(&self, client: &SyncApiClient<T>) -> SyncResult<SyncReport> {
        let (device_id, cursor, mutations, refetch) = {
            let state = self.lock_local();
            (
                state.device_id.clone(),
                state.cursor.clone(),
                state.queue.snapshot(),
                state.refetch.clone(),
            )
        };

        self.phase.store(PHASE_PUSHING, Ordering::SeqCst);
        let push = if mutations.is_empty() {
            None
        } else {
            let request = PushRequest {
                device_id: device_id.clone(),
                base_cursor: cursor.clone(),
                mutations,
            };
            let outcome = client.push(&request).await?;
            Some((request.mutations.len(), outcome))
        };

        self.phase.store(PHASE_PULLING, Ordering::SeqCst);
        let pull_cursor = push
            .as_ref()
            .and_then(|(_, outcome)| outcome.new_cursor.clone())
            .or(cursor);
        let pull = client
            .pull(&PullRequest {
                device_id,
                cursor: pull_cursor.clone(),
                refetch: refetch.clone(),
            })
            .await?;

        self.update_local(|state| commit_cycle(state, push, pull, pull_cursor, &refetch))
    }

    fn update_local<R>(&self, apply: impl FnOnce(&mut LocalState) -> SyncResult<R>) -> SyncResult<R> {
        let mut current = self.lock_local();
        let mut next = current.clone();
        let result = apply(&mut next)?;
        self.persistence.save(&next)?;
        *current = next;
        Ok(result)
    }

    fn lock_local(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SyncState) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

/// Puts the phase back to idle when a cycle ends or its future is dropped.
struct PhaseReset<'a>(&'a AtomicU8);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.store(PHASE_IDLE, Ordering::SeqCst);
    }
}

/// Fold one cycle's server answers into the state.
fn commit_cycle(
    state: &mut LocalState,
    push: Option<(usize, PushOutcome)>,
    pull: PullOutcome,
    pull_cursor: Option<String>,
    refetch_sent: &[RefetchKey],
) -> SyncResult<SyncReport> {
    let mut report = SyncReport::default();

    if let Some((pushed, outcome)) = push {
        report.pushed = pushed;

        for op_id in outcome.acknowledged_op_ids {
            if let Some(mutation) = state.queue.remove(&op_id) {
                state.confirmed.apply_mutation(&mutation)?;
                report.acknowledged.push(op_id);
            }
        }

        for mut rejected in outcome.failed {
            if let Some(mutation) = state.queue.remove(&rejected.op_id) {
                state.restore_confirmed(mutation.entity, &mutation.entity_id);
                rejected.entity = Some(mutation.entity);
                rejected.entity_id = Some(mutation.entity_id);
            }
            tracing::warn!(
                op_id = %rejected.op_id,
                reason = rejected.reason.as_deref().unwrap_or("unspecified"),
                "Server rejected mutation"
            );
            report.rejected.push(rejected);
        }

        for conflict in outcome.conflicts {
            if !state.queue.block(&conflict.op_id) {
                tracing::debug!(op_id = %conflict.op_id, "Conflict for a mutation no longer queued");
            }
            match state
                .conflicts
                .iter_mut()
                .find(|existing| same_conflict(existing, &conflict))
            {
                Some(existing) => *existing = conflict.clone(),
                None => state.conflicts.push(conflict.clone()),
            }
            report.conflicts.push(conflict);
        }
    }

    state.confirmed.apply_pull_changes(&pull.changes);
    report.applied_changes = state.store.apply_pull_changes(&pull.changes);
    let pending = state.queue.snapshot();
    for mutation in &pending {
        state.store.apply_mutation(mutation)?;
    }

    state.refetch.retain(|key| !refetch_sent.contains(key));
    state.cursor = pull.new_cursor.or(pull_cursor);
    report.cursor.clone_from(&state.cursor);
    Ok(report)
}

/// Conflicts are keyed by op id; entries whose op id was missing on the
/// wire share the placeholder and are told apart by their entity key.
fn same_conflict(existing: &Conflict, incoming: &Conflict) -> bool {
    existing.op_id == incoming.op_id
        && (incoming.op_id != UNKNOWN_IDENTIFIER
            || (existing.entity == incoming.entity && existing.entity_id == incoming.entity_id))
}

fn stored_record(state: &LocalState, kind: EntityKind, id: &str) -> SyncResult<Record> {
    state
        .store
        .get(kind, id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("{kind} {id}")).into())
}

fn new_device_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::sync::testing::{
        counting_provider, respond, FakeServer, FlakyPersistence, ScriptedTransport,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn client<T: SyncTransport>(transport: T) -> SyncApiClient<T> {
        SyncApiClient::new(transport, counting_provider("token", &Arc::new(AtomicUsize::new(0))))
    }

    fn engine_on(server: &Arc<FakeServer>) -> SyncEngine<Arc<FakeServer>> {
        SyncEngine::in_memory().with_client(client(Arc::clone(server)))
    }

    #[tokio::test]
    async fn sync_without_client_is_not_configured() {
        let engine = SyncEngine::<HttpTransport>::in_memory();
        let error = engine.sync().await.unwrap_err();
        assert!(matches!(error, SyncError::NotConfigured));
        assert_eq!(engine.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn local_edit_round_trips_through_server() {
        let server = Arc::new(FakeServer::new());
        let engine = engine_on(&server);

        let created = engine
            .upsert(EntityKind::Exercises, doc(json!({"id": "e1", "name": "Squat"})))
            .unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(engine.queued().len(), 1);

        let report = engine.sync().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(report.acknowledged.len(), 1);
        assert_eq!(report.cursor.as_deref(), Some("1"));
        assert!(engine.queued().is_empty());
        assert_eq!(engine.record(EntityKind::Exercises, "e1").unwrap().version, 1);
        assert_eq!(server.version("exercises", "e1"), 1);
        assert_eq!(engine.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn upsert_assigns_id_and_strips_server_fields() {
        let engine = SyncEngine::<HttpTransport>::in_memory();
        let record = engine
            .upsert(
                EntityKind::Plans,
                doc(json!({"name": "Push", "version": 99, "is_deleted": true})),
            )
            .unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.version, 0);
        assert!(!record.is_deleted);
        let queued = engine.queued();
        assert_eq!(queued[0].mutation.entity_id, record.id);
        assert_eq!(queued[0].mutation.base_version, 0);
    }

    #[test]
    fn delete_requires_existing_record() {
        let engine = SyncEngine::<HttpTransport>::in_memory();
        let error = engine.delete(EntityKind::Plans, "missing").unwrap_err();
        assert!(matches!(error, SyncError::Store(Error::NotFound(_))));
        assert!(engine.queued().is_empty());
    }

    #[tokio::test]
    async fn remote_changes_are_pulled_and_deletes_tombstone() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "Upper"}));
        let engine = engine_on(&server);

        engine.sync().await.unwrap();
        assert_eq!(engine.active(EntityKind::Plans).len(), 1);

        engine.delete(EntityKind::Plans, "p1").unwrap();
        assert!(engine.active(EntityKind::Plans).is_empty());
        engine.sync().await.unwrap();

        let record = engine.record(EntityKind::Plans, "p1").unwrap();
        assert!(record.is_deleted);
        assert_eq!(record.version, 2);
        assert_eq!(engine.all(EntityKind::Plans).len(), 1);
    }

    #[tokio::test]
    async fn conflicting_edit_blocks_until_keep_mine() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "Original"}));
        let engine = engine_on(&server);
        engine.sync().await.unwrap();

        server.remote_upsert("plans", "p1", &json!({"name": "Theirs"}));
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1", "name": "Mine"})))
            .unwrap();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        let op_id = report.conflicts[0].op_id.clone();
        assert_eq!(engine.conflicts().len(), 1);
        assert!(engine.queued()[0].blocked);
        assert_eq!(
            engine.record(EntityKind::Plans, "p1").unwrap().fields["name"],
            json!("Theirs")
        );

        let (resolution, report) = engine
            .resolve_and_sync(&op_id, ConflictChoice::KeepMine)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Reissued {
                op_id,
                base_version: 2
            }
        );
        assert_eq!(report.acknowledged.len(), 1);
        assert!(engine.conflicts().is_empty());
        assert!(engine.queued().is_empty());

        let record = engine.record(EntityKind::Plans, "p1").unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.fields["name"], json!("Mine"));
    }

    #[tokio::test]
    async fn keep_server_drops_local_edit() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "Original"}));
        let engine = engine_on(&server);
        engine.sync().await.unwrap();

        server.remote_upsert("plans", "p1", &json!({"name": "Theirs"}));
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1", "name": "Mine"})))
            .unwrap();
        let report = engine.sync().await.unwrap();
        let op_id = report.conflicts[0].op_id.clone();

        let resolution = engine.resolve(&op_id, ConflictChoice::KeepServer).unwrap();
        assert_eq!(
            resolution,
            Resolution::Discarded {
                op_id: op_id.clone(),
                server_doc_applied: true
            }
        );
        assert!(engine.queued().is_empty());
        assert_eq!(
            engine.record(EntityKind::Plans, "p1").unwrap().fields["name"],
            json!("Theirs")
        );
        assert!(matches!(
            engine.resolve(&op_id, ConflictChoice::KeepServer),
            Err(SyncError::ConflictNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejected_mutations_leave_the_queue() {
        let server = Arc::new(FakeServer::new());
        let engine = engine_on(&server);
        engine
            .upsert(EntityKind::Sessions, doc(json!({"id": "s1", "reject": true})))
            .unwrap();

        let report = engine.sync().await.unwrap();

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].entity, Some(EntityKind::Sessions));
        assert_eq!(report.rejected[0].entity_id.as_deref(), Some("s1"));
        assert_eq!(report.rejected[0].reason.as_deref(), Some("invalid_payload"));
        assert!(engine.queued().is_empty());
        assert!(engine.record(EntityKind::Sessions, "s1").is_none());
        assert!(engine.active(EntityKind::Sessions).is_empty());
    }

    #[tokio::test]
    async fn rejected_edit_restores_server_copy() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "Server"}));
        let engine = engine_on(&server);
        engine.sync().await.unwrap();

        engine
            .upsert(
                EntityKind::Plans,
                doc(json!({"id": "p1", "name": "Bad", "reject": true})),
            )
            .unwrap();
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p2", "name": "Kept"})))
            .unwrap();
        let report = engine.sync().await.unwrap();

        assert_eq!(report.rejected.len(), 1);
        let record = engine.record(EntityKind::Plans, "p1").unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.fields["name"], json!("Server"));
        assert!(!record.fields.contains_key("reject"));
        assert_eq!(
            engine.record(EntityKind::Plans, "p2").unwrap().fields["name"],
            json!("Kept")
        );
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.store, snapshot.confirmed);
    }

    #[test]
    fn conflicts_without_op_id_are_kept_per_entity() {
        let placeholder = |entity_id: &str| Conflict {
            op_id: UNKNOWN_IDENTIFIER.to_string(),
            entity: Some(EntityKind::Plans),
            entity_id: entity_id.to_string(),
            server_version: Some(2),
            reason: crate::models::ConflictReason::VersionMismatch,
            server_doc: None,
        };
        let push = PushOutcome {
            conflicts: vec![placeholder("p1"), placeholder("p2")],
            ..PushOutcome::default()
        };
        let mut state = LocalState::new("device");

        for _ in 0..2 {
            commit_cycle(
                &mut state,
                Some((0, push.clone())),
                PullOutcome::default(),
                None,
                &[],
            )
            .unwrap();
        }

        let ids = state
            .conflicts
            .iter()
            .map(|conflict| conflict.entity_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn transport_error_keeps_queue_and_cursor() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "A"}));
        let engine = engine_on(&server);
        engine.sync().await.unwrap();
        let cursor = engine.cursor();

        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p2", "name": "B"})))
            .unwrap();
        server.set_offline(true);
        let error = engine.sync().await.unwrap_err();

        assert!(error.is_retryable());
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(engine.cursor(), cursor);
        assert_eq!(engine.queued().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_cycle_needs_auth_and_keeps_queue() {
        let transport = ScriptedTransport::new([respond(401, &json!({}))]);
        let engine = SyncEngine::in_memory().with_client(client(transport));
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1"})))
            .unwrap();

        let error = engine.sync().await.unwrap_err();

        assert!(matches!(error, SyncError::Unauthorized(_)));
        assert_eq!(engine.state(), SyncState::NeedsAuth);
        assert_eq!(engine.queued().len(), 1);
        assert_eq!(engine.cursor(), None);
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_state_and_rerun_converges() {
        fn seed(server: &FakeServer) {
            server.remote_upsert("plans", "p1", &json!({"name": "A"}));
            server.remote_upsert("exercises", "e1", &json!({"name": "Row"}));
        }

        let reference_server = Arc::new(FakeServer::new());
        seed(&reference_server);
        let reference = engine_on(&reference_server);
        reference
            .upsert(EntityKind::Plans, doc(json!({"id": "p2", "name": "B"})))
            .unwrap();
        reference.sync().await.unwrap();

        let server = Arc::new(FakeServer::new());
        seed(&server);
        let persistence = FlakyPersistence::default();
        let engine = SyncEngine::open(Arc::new(persistence.clone()), Some("device".to_string()))
            .unwrap()
            .with_client(client(Arc::clone(&server)));
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p2", "name": "B"})))
            .unwrap();

        persistence.set_failing(true);
        let error = engine.sync().await.unwrap_err();
        assert!(matches!(error, SyncError::Store(_)));
        assert_eq!(engine.cursor(), None);
        assert_eq!(engine.queued().len(), 1);
        assert_eq!(persistence.load().unwrap().unwrap().cursor, None);

        persistence.set_failing(false);
        engine.sync().await.unwrap();

        let recovered = engine.snapshot();
        let expected = reference.snapshot();
        assert_eq!(recovered.store, expected.store);
        assert_eq!(recovered.cursor, expected.cursor);
        assert!(recovered.queue.is_empty());
        assert_eq!(persistence.load().unwrap().unwrap(), recovered);
    }

    #[tokio::test]
    async fn edits_made_during_a_cycle_wait_for_the_next_one() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::gated(
            [
                respond(200, &json!({"acknowledgedOpIds": []})),
                respond(200, &json!({"changes": [], "newCursor": "c1"})),
            ],
            Arc::clone(&gate),
        ));
        let engine = SyncEngine::in_memory().with_client(client(Arc::clone(&transport)));
        let first = engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1"})))
            .unwrap();

        let edit_mid_cycle = async {
            transport.push_started.notified().await;
            engine
                .upsert(EntityKind::Plans, doc(json!({"id": "p2"})))
                .unwrap();
            gate.notify_one();
        };
        let (report, ()) = tokio::join!(engine.sync(), edit_mid_cycle);

        let report = report.unwrap();
        assert_eq!(report.pushed, 1);
        let pushed = &transport.requests()[0].body["mutations"];
        assert_eq!(pushed.as_array().unwrap().len(), 1);
        assert_eq!(pushed[0]["entityId"], json!("p1"));
        assert_eq!(engine.queued().len(), 2);
        assert!(engine.record(EntityKind::Plans, "p2").is_some());
        assert_eq!(first.id, "p1");
    }

    #[tokio::test]
    async fn sync_requested_while_pushing_is_coalesced() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::gated(
            [
                respond(200, &json!({"acknowledgedOpIds": []})),
                respond(200, &json!({"changes": [], "newCursor": "c1"})),
            ],
            Arc::clone(&gate),
        ));
        let engine = SyncEngine::in_memory().with_client(client(Arc::clone(&transport)));
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1"})))
            .unwrap();

        let second = async {
            transport.push_started.notified().await;
            let report = engine.sync().await;
            gate.notify_one();
            report
        };
        let (first, second) = tokio::join!(engine.sync(), second);

        assert!(!first.unwrap().coalesced);
        assert!(second.unwrap().coalesced);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(engine.cursor().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn refetch_hint_is_sent_once_and_restores_server_copy() {
        let server = Arc::new(FakeServer::new());
        server.remote_upsert("plans", "p1", &json!({"name": "Server"}));
        let engine = engine_on(&server);
        engine.sync().await.unwrap();

        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1", "name": "Local"})))
            .unwrap();
        let op_id = engine.queued()[0].mutation.op_id.clone();
        engine
            .update_local(|state| {
                state.queue.block(&op_id);
                state.conflicts.push(Conflict {
                    op_id: op_id.clone(),
                    entity: Some(EntityKind::Plans),
                    entity_id: "p1".to_string(),
                    server_version: Some(1),
                    reason: crate::models::ConflictReason::UpdateFailed,
                    server_doc: None,
                });
                Ok(())
            })
            .unwrap();

        engine.resolve(&op_id, ConflictChoice::KeepServer).unwrap();
        assert_eq!(engine.snapshot().refetch.len(), 1);
        assert_eq!(
            engine.record(EntityKind::Plans, "p1").unwrap().fields["name"],
            json!("Local")
        );

        engine.sync().await.unwrap();
        assert!(engine.snapshot().refetch.is_empty());
        assert_eq!(
            engine.record(EntityKind::Plans, "p1").unwrap().fields["name"],
            json!("Server")
        );
    }

    #[test]
    fn open_reuses_saved_device_id() {
        let persistence: Arc<dyn SyncPersistence> = Arc::new(MemoryPersistence::new());
        let first = SyncEngine::<HttpTransport>::open(Arc::clone(&persistence), None).unwrap();
        let device_id = first.device_id();
        first
            .upsert(EntityKind::Plans, doc(json!({"id": "p1"})))
            .unwrap();

        let reopened = SyncEngine::<HttpTransport>::open(persistence, None).unwrap();
        assert_eq!(reopened.device_id(), device_id);
        assert_eq!(reopened.queued().len(), 1);
    }

    #[test]
    fn reset_keeps_device_id() {
        let engine = SyncEngine::<HttpTransport>::in_memory();
        let device_id = engine.device_id();
        engine
            .upsert(EntityKind::Plans, doc(json!({"id": "p1"})))
            .unwrap();

        engine.reset().unwrap();

        assert_eq!(engine.device_id(), device_id);
        assert!(engine.snapshot().store.is_empty());
        assert!(engine.queued().is_empty());
    }
}

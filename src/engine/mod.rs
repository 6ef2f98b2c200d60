mod alternatives;
mod booking;
mod catalog;
mod conflict;
mod error;
mod lifecycle;
mod queries;

pub use alternatives::rank_alternatives;
pub use conflict::{conflict_count, conflicts_in};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::audit::{AuditEntry, AuditLog, TracingAuditLog};
use crate::model::*;
use crate::notify::{DispatchError, Notifier, NotifyHub};
use crate::observability;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// fsyncs once for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so a partial batch never leaks into the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// In-memory booking state for every resource, made durable through the WAL.
///
/// Each resource sits behind its own `RwLock`. Anything that checks for
/// conflicts and then writes holds that resource's write lock for the whole
/// check-append-apply sequence, so two overlapping bookings on one resource
/// can never both pass the check.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// LISTEN/NOTIFY hub; also the default [`Notifier`].
    pub notify: Arc<NotifyHub>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) audit: Arc<dyn AuditLog>,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can slip between its snapshot and the file swap.
    pub(super) commit_gate: RwLock<()>,
    /// Last creation stamp handed out. Stamps strictly increase so that
    /// "most recently created" is a total order.
    last_stamp: AtomicI64,
}

/// Apply an event to a ResourceState. The caller holds its lock.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated { resource } => {
            rs.resource = resource.clone();
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.resource_id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            rs.set_status(*id, *status);
        }
        Event::ReservationRescheduled { id, span, .. } => {
            if let Some(mut reservation) = rs.remove_reservation(*id) {
                reservation.span = *span;
                rs.insert_reservation(reservation);
            }
        }
        // Creation and deletion change the resource map itself, not one resource.
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
    }
}

/// Resource an event belongs to (for events applied inside one resource).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceUpdated { resource } => Some(resource.id),
        Event::ReservationCreated { reservation } => Some(reservation.resource_id),
        Event::ReservationStatusChanged { resource_id, .. }
        | Event::ReservationRescheduled { resource_id, .. } => Some(*resource_id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}

impl Engine {
    /// Open the engine over the WAL at `wal_path`, notifying through `notify`
    /// and auditing through `tracing`.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let notifier: Arc<dyn Notifier> = notify.clone();
        Self::with_sinks(wal_path, notify, notifier, Arc::new(TracingAuditLog))
    }

    /// Like [`Engine::new`] with explicit notification and audit collaborators.
    pub fn with_sinks(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
    ) -> io::Result<Self> {
        let (wal, replayed) = Wal::open_with_replay(&wal_path)?;
        let events = replayed.events;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            notifier,
            audit,
            reservation_to_resource: DashMap::new(),
            commit_gate: RwLock::new(()),
            last_stamp: AtomicI64::new(0),
        };
        engine.replay(&events);
        tracing::debug!(
            "engine replayed {} events, {} resources",
            events.len(),
            engine.state.len()
        );
        Ok(engine)
    }

    /// Rebuild state from replayed events. We are the sole owner of every Arc
    /// here, so `try_write` never contends; never block, since this may run
    /// inside an async context.
    fn replay(&self, events: &[Event]) {
        let mut max_stamp = 0;
        for event in events {
            match event {
                Event::ResourceCreated { resource } => {
                    max_stamp = max_stamp.max(resource.created_at);
                    let rs = ResourceState::new(resource.clone());
                    self.state.insert(resource.id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, rs)) = self.state.remove(id)
                        && let Ok(guard) = rs.try_read()
                    {
                        for r in &guard.reservations {
                            self.reservation_to_resource.remove(&r.id);
                        }
                    }
                }
                other => {
                    if let Event::ReservationCreated { reservation } = other {
                        max_stamp = max_stamp.max(reservation.created_at);
                    }
                    let Some(resource_id) = event_resource_id(other) else {
                        continue;
                    };
                    let Some(rs) = self.resource_state(&resource_id) else {
                        continue;
                    };
                    if let Ok(mut guard) = rs.try_write() {
                        apply_to_resource(&mut guard, other, &self.reservation_to_resource);
                    }
                }
            }
        }
        self.last_stamp.store(max_stamp, Ordering::SeqCst);
    }

    /// Next creation timestamp: wall clock, bumped to stay strictly increasing.
    pub(super) fn next_stamp(&self) -> Ms {
        let now = now_ms();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub(super) fn resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every resource's shared state. DashMap guards are released
    /// before returning, so callers may await on the locks.
    pub(super) fn all_resource_states(&self) -> Vec<SharedResourceState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// Acquire a resource's write lock, failing if the resource was deleted
    /// while we waited for it.
    pub(super) async fn lock_resource(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let guard = rs.clone().write_owned().await;
        match self.resource_state(&id) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(EngineError::ResourceNotFound(id)),
        }
    }

    /// Lookup reservation → resource, then acquire that resource's write lock.
    pub(super) async fn lock_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .reservation_to_resource
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        self.lock_resource(resource_id).await.map_err(|e| match e {
            EngineError::ResourceNotFound(_) => EngineError::ReservationNotFound(reservation_id),
            other => other,
        })
    }

    /// WAL-append then apply, under the caller's resource lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.reservation_to_resource);
        Ok(())
    }

    /// Swallow a collaborator failure: log it, count it, carry on.
    pub(super) fn dispatched(&self, sink: &'static str, result: Result<(), DispatchError>) {
        if let Err(e) = result {
            tracing::warn!("{sink} dispatch failed: {e}");
            metrics::counter!(observability::DISPATCH_FAILURES_TOTAL, "sink" => sink).increment(1);
        }
    }

    pub(super) fn audit(&self, entry: AuditEntry) {
        let result = self.audit.log_action(entry);
        self.dispatched("audit", result);
    }

    /// Compact the WAL down to the events that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut states = Vec::new();
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            states.push((guard.resource.clone(), guard.reservations.clone()));
        }
        // Replaying in creation order keeps `last_stamp` recovery trivial.
        states.sort_by_key(|(resource, _)| (resource.created_at, resource.id));

        let mut events = Vec::new();
        for (resource, reservations) in states {
            events.push(Event::ResourceCreated { resource });
            for reservation in reservations {
                events.push(Event::ReservationCreated { reservation });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

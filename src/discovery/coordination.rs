// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The coordination layer (§4.1): `DiscoveryService` owns the four worker
//! tasks, the completion barrier, the config semaphore, and start/stop of
//! individual methods. A single owned value constructed by `init` and
//! consumed by `fini` — there is no global mutable state here (§9b).

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, Notify, Semaphore, mpsc};
use tracing::Instrument;

use crate::discovery::{
    bootstrap,
    collaborators::{EventSink, HbaOps, IsnsClient, PersistentStore, SendTargetsIoctl},
    error::DiscoveryInitError,
    reconciler,
    registry::SessionRegistry,
    scn,
    types::{DiscoveryMethod, DiscoveryMethodKind, EventPhase},
    workers::{
        DiscoveryWorkerBody, IsnsWorker, SendTargetsWorker, SlpWorker, StaticWorker, WorkerCtx,
    },
};

/// The shared completion-bitmap + in-progress flag (§5 "Discovery-events
/// bitmap + in-progress flag"), paired with a [`Notify`] that fires every
/// time a bit is accumulated, replacing the original's polled one-second
/// sleep (§9b) while preserving the same observable contract.
struct EventsState {
    inner: Mutex<DiscoveryEventsState>,
    notify: Notify,
}

struct DiscoveryEventsState {
    events: DiscoveryMethod,
    in_progress: bool,
}

impl EventsState {
    fn new() -> Self {
        EventsState {
            inner: Mutex::new(DiscoveryEventsState {
                events: DiscoveryMethod::empty(),
                in_progress: false,
            }),
            notify: Notify::new(),
        }
    }

    async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.events = DiscoveryMethod::empty();
        state.in_progress = true;
    }

    async fn mark_done(&self, kind: DiscoveryMethodKind) {
        let mut state = self.inner.lock().await;
        state.events.insert(kind.bit());
        if state.events == DiscoveryMethod::all() {
            state.in_progress = false;
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Blocks until the completion bitmap equals the full four-method mask.
    async fn wait_for_full_mask(&self) {
        loop {
            {
                let state = self.inner.lock().await;
                if state.events == DiscoveryMethod::all() {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }
}

struct WorkerSlot {
    kind: DiscoveryMethodKind,
    wake_tx: mpsc::Sender<()>,
    started: AtomicBool,
    handle: tokio::task::JoinHandle<()>,
}

/// Coordinates the four discovery workers, the reconciler, and the
/// completion barrier. Constructed by [`DiscoveryService::init`], consumed
/// by [`DiscoveryService::fini`].
pub struct DiscoveryService {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn PersistentStore>,
    hba: Arc<dyn HbaOps>,
    isns: Arc<dyn IsnsClient>,
    events: Arc<dyn EventSink>,
    ctx: Arc<WorkerCtx>,
    workers: [WorkerSlot; 4],
    events_state: Arc<EventsState>,
    config_semaphore: Semaphore,
    last_storm_poke: Mutex<Option<Instant>>,
    storm_delay: Duration,
}

/// Minimum interval between storm-protection-triggered pokes, matching the
/// original's `hba_config_storm_delay` default of 60s.
const HBA_CONFIG_STORM_DELAY: Duration = Duration::from_secs(60);

impl DiscoveryService {
    /// Opens/reloads the persistent store, runs bootstrap (§4.5), creates
    /// the four workers, starts the enabled ones. On *any* failure this
    /// still emits synthetic START+END events for every method in the
    /// fixed order `{Static, SLP, iSNS, SendTargets}` (the original's
    /// `for_failure` table, §9b), because an external caller blocks on
    /// those events.
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        store: Arc<dyn PersistentStore>,
        hba: Arc<dyn HbaOps>,
        isns: Arc<dyn IsnsClient>,
        sendtargets: Arc<dyn SendTargetsIoctl>,
        events: Arc<dyn EventSink>,
        restart: bool,
    ) -> Result<Arc<DiscoveryService>, DiscoveryInitError> {
        let registry = Arc::new(SessionRegistry::new());

        let identity = match bootstrap::run(store.as_ref(), hba.as_ref()).await {
            Ok(identity) => identity,
            Err(err) => {
                emit_for_failure(events.as_ref());
                return Err(err);
            },
        };

        let ctx = Arc::new(WorkerCtx {
            registry: registry.clone(),
            store: store.clone(),
            hba: hba.clone(),
            isns: isns.clone(),
            sendtargets,
            events: events.clone(),
            identity,
            hba_sendtgts_semaphore: Semaphore::new(1),
        });

        let events_state = Arc::new(EventsState::new());
        let workers = spawn_workers(ctx.clone(), events_state.clone());

        let _ = restart; // workers are always (re)spawned fresh here; a real restart
        // path would instead keep existing JoinHandles — not reachable in this
        // in-process service (see DESIGN.md).

        let enabled_mask = store.disc_meth_get().await;
        for slot in &workers {
            if enabled_mask.contains(slot.kind.bit()) {
                slot.started.store(true, Ordering::SeqCst);
            } else {
                slot.started.store(false, Ordering::SeqCst);
            }
        }

        Ok(Arc::new(DiscoveryService {
            registry,
            store,
            hba,
            isns,
            events,
            ctx,
            workers,
            events_state,
            config_semaphore: Semaphore::new(1),
            last_storm_poke: Mutex::new(None),
            storm_delay: HBA_CONFIG_STORM_DELAY,
        }))
    }

    /// Stop every worker task and drop the collaborator handles.
    pub async fn fini(self: Arc<Self>) {
        let this = match Arc::try_unwrap(self) {
            Ok(this) => this,
            Err(shared) => {
                tracing::warn!(
                    target: "iscsi::discovery",
                    "fini called while other Arc<DiscoveryService> handles remain live"
                );
                for slot in &shared.workers {
                    slot.started.store(false, Ordering::SeqCst);
                }
                return;
            },
        };
        for slot in this.workers {
            slot.started.store(false, Ordering::SeqCst);
            drop(slot.wake_tx);
            let _ = slot.handle.await;
        }
    }

    /// Start the workers for every bit in `methods`; if `poke` is set,
    /// also wake them immediately.
    pub async fn enable(&self, methods: DiscoveryMethod, poke: bool) -> Result<(), String> {
        for slot in &self.workers {
            if methods.contains(slot.kind.bit()) {
                slot.started.store(true, Ordering::SeqCst);
                if poke {
                    let _ = slot.wake_tx.send(()).await;
                }
            }
        }
        Ok(())
    }

    /// For each bit in `methods`: emit START, `reconcile_del` every
    /// session attributed to that method, stop the worker, emit END. On a
    /// reconcile-delete failure the loop aborts (matching the original's
    /// early `break`) but END is still emitted for the method that failed.
    pub async fn disable(&self, methods: DiscoveryMethod) -> Result<(), String> {
        for kind in DiscoveryMethodKind::ALL {
            if !methods.contains(kind.bit()) {
                continue;
            }
            self.events.emit(kind, EventPhase::Start);
            let ok = reconciler::del(&self.registry, self.hba.as_ref(), None, kind, None).await;
            if let Some(slot) = self.workers.iter().find(|s| s.kind == kind) {
                slot.started.store(false, Ordering::SeqCst);
            }
            self.events.emit(kind, EventPhase::End);
            if !ok {
                return Err(format!("reconcile_del failed while disabling {kind}"));
            }
        }
        Ok(())
    }

    /// Reset the completion bitmap, wake either every started worker
    /// (`None`) or the one named (`Some`), short-circuiting any worker
    /// that is not currently started — or not targeted by this poke — with
    /// synthetic START+END events, then block until the bitmap reaches the
    /// full four-method mask. A method outside `method`'s mask still has
    /// its bit folded into the barrier, otherwise the barrier would never
    /// close (§4.1).
    pub async fn poke(&self, method: Option<DiscoveryMethod>) {
        self.events_state.reset().await;

        for slot in &self.workers {
            let should_wake = match method {
                None => true,
                Some(mask) => mask.contains(slot.kind.bit()),
            };
            if should_wake && slot.started.load(Ordering::SeqCst) {
                let _ = slot.wake_tx.send(()).await;
            } else {
                self.events.emit(slot.kind, EventPhase::Start);
                self.events.emit(slot.kind, EventPhase::End);
                self.events_state.mark_done(slot.kind).await;
            }
        }

        self.events_state.wait_for_full_mask().await;
    }

    /// Drive a full login attempt for `name`; on failure, if storm
    /// protection allows (at least `storm_delay` since the last
    /// configure-triggered poke), `poke(None)` and retry.
    pub async fn config_one(&self, name: &str, storm_protect: bool) -> Result<bool, String> {
        if reconciler::login_tgt(&self.registry, self.hba.as_ref(), Some(name), None, None).await
        {
            return Ok(true);
        }
        if storm_protect && !self.storm_window_elapsed().await {
            return Ok(false);
        }
        self.note_storm_poke().await;
        self.poke(None).await;
        Ok(reconciler::login_tgt(&self.registry, self.hba.as_ref(), Some(name), None, None).await)
    }

    pub async fn config_all(&self, storm_protect: bool) -> Result<bool, String> {
        if reconciler::login_tgt(&self.registry, self.hba.as_ref(), None, None, None).await {
            return Ok(true);
        }
        if storm_protect && !self.storm_window_elapsed().await {
            return Ok(false);
        }
        self.note_storm_poke().await;
        self.poke(None).await;
        Ok(reconciler::login_tgt(&self.registry, self.hba.as_ref(), None, None, None).await)
    }

    /// External callers must acquire this across any `config_one` /
    /// `config_all` call; the core does not acquire it on their behalf
    /// (matching the original's documented caller-responsibility
    /// contract).
    pub fn config_semaphore(&self) -> &Semaphore {
        &self.config_semaphore
    }

    /// Deliver an iSNS SCN event to the handler (§4.4).
    pub async fn handle_scn(&self, event: crate::discovery::types::ScnEvent) {
        scn::handle(self, event).await;
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn hba(&self) -> &dyn HbaOps {
        self.hba.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn PersistentStore {
        self.store.as_ref()
    }

    pub(crate) fn isns(&self) -> &dyn IsnsClient {
        self.isns.as_ref()
    }

    pub(crate) fn identity(&self) -> &crate::discovery::types::InitiatorIdentity {
        &self.ctx.identity
    }

    async fn storm_window_elapsed(&self) -> bool {
        let last = self.last_storm_poke.lock().await;
        match *last {
            None => true,
            Some(t) => t.elapsed() >= self.storm_delay,
        }
    }

    async fn note_storm_poke(&self) {
        *self.last_storm_poke.lock().await = Some(Instant::now());
    }
}

/// Emit synthetic START+END for every method in the fixed `for_failure`
/// order (Static, SLP, iSNS, SendTargets) — preserved verbatim from the
/// original as a documented ordering quirk (§9b).
fn emit_for_failure(events: &dyn EventSink) {
    for kind in DiscoveryMethodKind::FAILURE_ORDER {
        events.emit(kind, EventPhase::Start);
        events.emit(kind, EventPhase::End);
    }
}

fn spawn_workers(ctx: Arc<WorkerCtx>, events_state: Arc<EventsState>) -> [WorkerSlot; 4] {
    let static_slot = spawn_one(ctx.clone(), events_state.clone(), Box::new(StaticWorker));
    let send_targets_slot =
        spawn_one(ctx.clone(), events_state.clone(), Box::new(SendTargetsWorker));
    let isns_slot = spawn_one(ctx.clone(), events_state.clone(), Box::new(IsnsWorker));
    let slp_slot = spawn_one(ctx, events_state, Box::new(SlpWorker));
    [static_slot, send_targets_slot, isns_slot, slp_slot]
}

fn spawn_one(
    ctx: Arc<WorkerCtx>,
    events_state: Arc<EventsState>,
    body: Box<dyn DiscoveryWorkerBody>,
) -> WorkerSlot {
    let kind = body.kind();
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(
        async move {
            while wake_rx.recv().await.is_some() {
                ctx.events.emit(kind, EventPhase::Start);

                let enabled_mask = ctx.store.disc_meth_get().await;
                if !enabled_mask.contains(kind.bit()) {
                    tracing::debug!(
                        target: "iscsi::discovery",
                        method = %kind,
                        "worker woke but method is not enabled in the store; skipping"
                    );
                } else {
                    body.run_once(&ctx).await;
                }

                ctx.events.emit(kind, EventPhase::End);
                events_state.mark_done(kind).await;
            }

            if kind == DiscoveryMethodKind::Isns {
                ctx.isns.deregister(&ctx.identity).await;
            }
        }
        .instrument(tracing::info_span!("discovery_cycle", method = %kind)),
    );

    WorkerSlot {
        kind,
        wake_tx,
        started: AtomicBool::new(false),
        handle,
    }
}

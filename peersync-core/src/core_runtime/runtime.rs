/*
  SyncRuntime

  Holds one peer's copy of the state tree and keeps it in step with the host.

  Host:
    - applies local and inbound actions, and direct mutations
    - every sync_interval diffs state against the snapshot, broadcasts the
      patches (full state when the root itself changed) and re-snapshots
    - sends the snapshot as full state to every peer that joins or sends
      host_query

  Mirror:
    - broadcasts host_query at start so a running host sends its snapshot
    - never applies its own actions; forwards them to the host
    - replaces its tree on state_sync{fullState}, applies state_sync{patches}
      in arrival order

  Both:
    - route event{eventName, payload} to on_event listeners
    - pass transport errors to subscribe_errors()

  Notes:
  The snapshot only moves in the sync cycle, so observer notification after
  an action costs one diff at most and only when a patch observer exists.
*/

use super::context::{ActionContext, SetupContext};
use super::definition::{ActionFn, Definition};
use super::errors::{RuntimeError, RuntimeResult};
use super::observers::{panic_message, Observers, Subscription};
use crate::config::SyncConfig;
use crate::core_diff::{apply_patch, deep_clone, generate_diff, Patch, Value};
use crate::core_random::DeterministicRandom;
use crate::core_transport::{
    EventBroadcaster, Message, PeerId, PeerTransport, StateSyncPayload, TransportError,
    TransportEvent,
};
use crate::metrics::{
    record_counter, Timer, ACTIONS_APPLIED, ACTIONS_REJECTED, SYNC_CYCLES, SYNC_CYCLE_DURATION,
    SYNC_PATCHES_BROADCAST, SYNC_PATCHES_FAILED,
};
use crate::shutdown::TaskGroup;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info_span, trace, warn, Instrument, Span};

struct Core {
    state: Value,
    snapshot: Value,
    next_seed: u64,
}

struct Shared {
    definition: Definition,
    transport: Arc<dyn PeerTransport>,
    me: PeerId,
    is_host: bool,
    strict: bool,
    core: Mutex<Core>,
    observers: Observers,
    errors: EventBroadcaster<TransportError>,
    span: Span,
}

/// One peer's synchronized state
pub struct SyncRuntime {
    shared: Arc<Shared>,
    tasks: TaskGroup,
}

fn run_action(
    action: &ActionFn,
    state: &mut Value,
    ctx: &mut ActionContext,
    input: &Value,
) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| action(state, ctx, input))) {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
    }
}

impl SyncRuntime {
    /// Build the initial state and start the runtime.
    ///
    /// Every peer runs the setup routine with the same seed, so all copies
    /// start identical without the host sending anything. Must be called
    /// inside a tokio runtime.
    pub fn start(
        definition: Definition,
        transport: Arc<dyn PeerTransport>,
        is_host: bool,
        config: &SyncConfig,
    ) -> RuntimeResult<Self> {
        let me = transport.player_id();
        let span = info_span!("sync_runtime", peer_id = %me, is_host);

        let mut player_ids = transport.peer_ids();
        player_ids.push(me.clone());
        player_ids.sort();
        player_ids.dedup();
        let mut setup = SetupContext { player_ids, random: DeterministicRandom::new(config.setup_seed) };
        let state = panic::catch_unwind(AssertUnwindSafe(|| definition.initial_state(&mut setup)))
            .map_err(|panic| RuntimeError::SetupFailed(panic_message(&*panic)))?;

        let rx = transport.subscribe();
        let shared = Arc::new(Shared {
            definition,
            transport,
            me: me.clone(),
            is_host,
            strict: config.strict_mode,
            core: Mutex::new(Core {
                snapshot: deep_clone(&state),
                state,
                next_seed: config.first_action_seed,
            }),
            observers: Observers::default(),
            errors: EventBroadcaster::new(),
            span: span.clone(),
        });

        let tasks = TaskGroup::new(format!("runtime:{}", me));
        tasks.spawn(pump(shared.clone(), rx).instrument(span.clone()));

        if is_host {
            let cycle = shared.clone();
            let cycle_span = span.clone();
            tasks.spawn_periodic(config.sync_interval, move || {
                let shared = cycle.clone();
                async move {
                    shared.sync_cycle().await;
                }
                .instrument(cycle_span.clone())
            });

            if !shared.transport.peer_ids().is_empty() {
                let greeting = shared.clone();
                tasks.spawn(
                    async move {
                        greeting.send_snapshot(None).await;
                    }
                    .instrument(span.clone()),
                );
            }
        } else {
            // a host already running never sees our join; ask it for the tree
            if let Err(e) = shared.transport.send(Message::HostQuery, None) {
                span.in_scope(|| shared.transport_failed(e));
            }
        }

        span.in_scope(|| {
            debug!(actions = ?shared.definition.action_names(), interval = ?config.sync_interval, "sync runtime started")
        });
        Ok(Self { shared, tasks })
    }

    /// Submit a named action.
    ///
    /// On the host it is applied right away. It is always sent to the peers,
    /// so a mirror's action reaches the host and is applied there with the
    /// same seed. A mirror sees the effect once the host's patches arrive.
    pub async fn submit_action(
        &self,
        name: &str,
        input: Value,
        target_id: Option<PeerId>,
    ) -> RuntimeResult<()> {
        self.shared
            .submit_action(name, input, target_id)
            .instrument(self.shared.span.clone())
            .await
    }

    /// Mutate the host's state outside any action. The next sync cycle
    /// picks the change up.
    pub async fn mutate<F>(&self, f: F) -> RuntimeResult<()>
    where
        F: FnOnce(&mut Value),
    {
        let shared = &self.shared;
        if !shared.is_host {
            return shared.reject(RuntimeError::HostOnly("mutate state"));
        }
        let mut core = shared.core.lock().await;
        f(&mut core.state);
        shared.notify(&core, None);
        Ok(())
    }

    /// Send an application event to every peer and to local listeners
    pub fn broadcast_event(&self, name: &str, payload: Value) -> RuntimeResult<()> {
        let message = Message::Event { event_name: name.to_string(), payload: payload.clone() };
        let sent = self.shared.transport.send(message, None);
        self.shared.observers.dispatch_event(name, &self.shared.me, &payload);
        sent.map_err(|e| self.shared.transport_failed(e))
    }

    /// Run one sync cycle now. Returns the number of patches found; always
    /// zero on a mirror.
    pub async fn sync_now(&self) -> usize {
        if !self.shared.is_host {
            return 0;
        }
        self.shared.sync_cycle().instrument(self.shared.span.clone()).await
    }

    /// Observe the whole state after every change
    pub fn on_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.observers.on_change(f)
    }

    /// Observe non-empty patch lists
    pub fn on_patch<F>(&self, f: F) -> Subscription
    where
        F: Fn(&[Patch]) + Send + Sync + 'static,
    {
        self.shared.observers.on_patch(f)
    }

    /// Observe application events named `name`; the handler gets the sender
    pub fn on_event<F>(&self, name: impl Into<String>, f: F) -> Subscription
    where
        F: Fn(&PeerId, &Value) + Send + Sync + 'static,
    {
        self.shared.observers.on_event(name.into(), f)
    }

    /// Copy of the current state
    pub async fn state(&self) -> Value {
        self.shared.core.lock().await.state.clone()
    }

    pub fn is_host(&self) -> bool {
        self.shared.is_host
    }

    pub fn my_player_id(&self) -> PeerId {
        self.shared.me.clone()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.shared.definition.action_names()
    }

    /// Transport errors, passed through as reported
    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<TransportError> {
        self.shared.errors.subscribe()
    }

    /// Stop the sync cycle and the event loop, and drop every observer.
    /// The transport is left connected.
    pub async fn destroy(&self) {
        self.tasks.shutdown().await;
        self.shared.observers.clear();
        self.shared.errors.close();
        self.shared.span.in_scope(|| debug!("sync runtime destroyed"));
    }
}

impl Shared {
    /// Apply strict mode to a validation failure
    fn reject(&self, err: RuntimeError) -> RuntimeResult<()> {
        record_counter(ACTIONS_REJECTED, 1);
        if self.strict {
            Err(err)
        } else {
            warn!("{}", err);
            Ok(())
        }
    }

    fn transport_failed(&self, e: TransportError) -> RuntimeError {
        warn!(error = %e, "send failed");
        self.errors.emit(e.clone());
        RuntimeError::Transport(e)
    }

    async fn submit_action(
        &self,
        name: &str,
        input: Value,
        target_id: Option<PeerId>,
    ) -> RuntimeResult<()> {
        let action = match self.definition.get_action(name) {
            Some(action) => action,
            None => {
                return self.reject(RuntimeError::unknown_action(name, self.definition.action_names()))
            }
        };

        let mut core = self.core.lock().await;
        let seed = core.next_seed;
        core.next_seed += 1;
        let mut ctx = ActionContext::new(self.me.clone(), target_id, self.is_host, seed);
        let wire = ctx.to_wire();

        let outcome = if self.is_host {
            let outcome = self.apply(&mut core, name, &*action, &mut ctx, &input);
            self.notify(&core, None);
            outcome
        } else {
            Ok(())
        };
        drop(core);

        trace!(action = name, seed, "sending action");
        let message = Message::Action { action_name: name.to_string(), input, context: wire, action_seed: seed };
        self.transport.send(message, None).map_err(|e| self.transport_failed(e))?;
        outcome
    }

    fn apply(
        &self,
        core: &mut Core,
        name: &str,
        action: &ActionFn,
        ctx: &mut ActionContext,
        input: &Value,
    ) -> RuntimeResult<()> {
        match run_action(action, &mut core.state, ctx, input) {
            Ok(()) => {
                record_counter(ACTIONS_APPLIED, 1);
                debug!(action = name, player = %ctx.player_id, target = %ctx.target_id, "action applied");
                Ok(())
            }
            Err(source) => {
                record_counter(ACTIONS_REJECTED, 1);
                error!(action = name, player = %ctx.player_id, "action failed: {:#}", source);
                Err(RuntimeError::ActionFailed { name: name.to_string(), source })
            }
        }
    }

    /// Tell observers about a change. Never touches the snapshot.
    ///
    /// A root replacement has no path, so it reaches change observers only.
    fn notify(&self, core: &Core, patches: Option<Vec<Patch>>) {
        if self.observers.has_patch_observers() {
            let mut patches = patches.unwrap_or_else(|| generate_diff(&core.snapshot, &core.state));
            patches.retain(|patch| !patch.is_root());
            if !patches.is_empty() {
                self.observers.notify_patches(&patches);
            }
        }
        self.observers.notify_change(&core.state);
    }

    async fn sync_cycle(&self) -> usize {
        let timer = Timer::new(SYNC_CYCLE_DURATION);
        let mut core = self.core.lock().await;
        let patches = generate_diff(&core.snapshot, &core.state);
        let count = patches.len();

        if !patches.is_empty() {
            let message = if patches.iter().any(Patch::is_root) {
                Message::full_state(core.state.clone())
            } else {
                Message::patches(patches.clone())
            };
            if let Err(e) = self.transport.send(message, None) {
                self.transport_failed(e);
            }
            record_counter(SYNC_PATCHES_BROADCAST, 1);
            trace!(patch_count = count, "broadcast state changes");
            self.notify(&core, Some(patches));
        }

        core.snapshot = deep_clone(&core.state);
        drop(core);
        record_counter(SYNC_CYCLES, 1);
        timer.stop();
        count
    }

    /// Send the last synced tree; the next cycle's patches apply on top of it
    async fn send_snapshot(&self, target: Option<&PeerId>) {
        let snapshot = self.core.lock().await.snapshot.clone();
        if let Err(e) = self.transport.send(Message::full_state(snapshot), target) {
            self.transport_failed(e);
        }
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, message } => self.on_message(from, message).await,
            TransportEvent::PeerJoined(id) => {
                debug!(peer = %id, "peer joined");
                if self.is_host {
                    self.send_snapshot(Some(&id)).await;
                }
            }
            TransportEvent::PeerLeft(id) => debug!(peer = %id, "peer left"),
            TransportEvent::ConnectionState(state) => debug!(?state, "connection state changed"),
            TransportEvent::Error(e) => {
                warn!(error = %e, "transport error");
                self.errors.emit(e);
            }
        }
    }

    async fn on_message(&self, from: PeerId, message: Message) {
        match message {
            Message::StateSync { payload } if !self.is_host => self.on_state_sync(payload).await,
            Message::StateSync { .. } => debug!(from = %from, "host ignores state sync"),
            Message::Action { action_name, input, context, action_seed } if self.is_host => {
                let Some(action) = self.definition.get_action(&action_name) else {
                    record_counter(ACTIONS_REJECTED, 1);
                    warn!("{} (sent by {})", RuntimeError::unknown_action(&action_name, self.definition.action_names()), from);
                    return;
                };
                let mut ctx = ActionContext::from_wire(context, action_seed);
                let mut core = self.core.lock().await;
                // failures are already logged; the submitter learns through the state
                let _ = self.apply(&mut core, &action_name, &*action, &mut ctx, &input);
                self.notify(&core, None);
            }
            Message::Action { .. } => {}
            Message::HostQuery if self.is_host => {
                debug!(from = %from, "sending snapshot on request");
                self.send_snapshot(Some(&from)).await;
            }
            Message::Event { event_name, payload } => {
                self.observers.dispatch_event(&event_name, &from, &payload);
            }
            _ => {}
        }
    }

    async fn on_state_sync(&self, payload: StateSyncPayload) {
        let mut core = self.core.lock().await;
        match payload {
            StateSyncPayload::FullState(state) => {
                let previous = std::mem::replace(&mut core.state, state);
                let patches = generate_diff(&previous, &core.state);
                debug!(patch_count = patches.len(), "full state received");
                self.notify(&core, Some(patches));
            }
            StateSyncPayload::Patches(patches) => {
                for patch in &patches {
                    if let Err(e) = apply_patch(&mut core.state, patch) {
                        record_counter(SYNC_PATCHES_FAILED, 1);
                        warn!(error = %e, "patch could not be applied");
                    }
                }
                trace!(patch_count = patches.len(), "patches applied");
                self.notify(&core, Some(patches));
            }
        }
    }
}

async fn pump(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        shared.handle(event).await;
    }
    debug!("runtime transport closed");
}

//! The preference engine: serialized event dispatch over path machines.
//!
//! Events for the same destination route are applied strictly in arrival
//! order and never concurrently: the route key is hashed (xxHash64) to one of
//! N worker shards, each draining an unbounded FIFO queue. Events for
//! unrelated routes proceed in parallel on different shards.
//!
//! Structural operations (path install/withdraw, dependency rebind) are
//! synchronous: they take the state write lock directly so bind-time
//! snapshots observe a consistent governor value. Signal-like operations
//! (traffic, remote assertions, administrative changes) are fire-and-forget
//! posts into the owning route's queue.
//!
//! Timer expiry is never applied inline. `advance_clock` collects due
//! deadlines from the registry and posts expiry events through the same
//! per-route queues, so a timer can never interleave with an in-flight event
//! for its route. Production drives `advance_clock` from a periodic tick
//! task; tests call it with synthetic ticks and use `drain` to wait for
//! queued work deterministically.

use std::collections::HashMap;
use std::hash::Hasher;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use twox_hash::XxHash64;

use crate::core::error::{AgentError, AgentResult};
use crate::core::time::Tick;
use crate::preference::backoff::BackoffConfig;
use crate::preference::dependency::{DependencyIndex, GoverningAddress};
use crate::preference::machine::{Outcome, PathEvent, PathPreferenceMachine, TimerOp};
use crate::preference::timer::TimerRegistry;
use crate::preference::value::{
    InterfaceId, MacAddress, PathId, PeerId, PreferenceValue, RouteKey, RouteTableKind, VrfId,
};

/// One local path's bookkeeping.
struct PathEntry {
    machine: PathPreferenceMachine,
    /// MAC the path was installed with; traffic must carry it to count as
    /// confirmation. The zero MAC matches any.
    mac: MacAddress,
    /// Install stamp. A queued traffic event carries the stamp it was
    /// resolved against; a withdraw+reinstall in between invalidates it, the
    /// same way timer generations invalidate queued expiries.
    incarnation: u64,
}

/// Shared mutable engine state.
#[derive(Default)]
struct CoreState {
    paths: HashMap<PathId, PathEntry>,
    /// Local paths per route, in install order.
    routes: HashMap<RouteKey, Vec<PathId>>,
    /// Last asserted remote value per (route, peer name). Kept only for
    /// routes that carry local paths; read back by the export collaborator.
    remotes: HashMap<RouteKey, HashMap<String, PreferenceValue>>,
    deps: DependencyIndex,
    timers: TimerRegistry,
    next_incarnation: u64,
}

impl CoreState {
    fn local_paths(&self, route: &RouteKey) -> &[PathId] {
        self.routes.get(route).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A message on one shard's queue.
enum ShardMessage {
    TrafficSeen {
        route: RouteKey,
        /// Matching paths with the incarnation each was resolved against.
        targets: Vec<(PathId, u64)>,
    },
    RemotePath {
        route: RouteKey,
        peer: String,
        value: Option<PreferenceValue>,
    },
    StaticPreference {
        path: PathId,
        value: u32,
    },
    EcmpChanged {
        path: PathId,
        enabled: bool,
    },
    BackoffExpired {
        path: PathId,
        generation: u64,
    },
    GoverningUpdate {
        path: PathId,
        value: PreferenceValue,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

impl ShardMessage {
    /// Route whose queue this message belongs on.
    fn route(&self) -> Option<&RouteKey> {
        match self {
            ShardMessage::TrafficSeen { route, .. } | ShardMessage::RemotePath { route, .. } => {
                Some(route)
            }
            ShardMessage::StaticPreference { path, .. }
            | ShardMessage::EcmpChanged { path, .. }
            | ShardMessage::BackoffExpired { path, .. }
            | ShardMessage::GoverningUpdate { path, .. } => Some(&path.route),
            ShardMessage::Flush { .. } => None,
        }
    }
}

struct Shared {
    state: RwLock<CoreState>,
    /// Last tick observed by `advance_clock`; `now` for queued events.
    clock: RwLock<Tick>,
    shards: Vec<mpsc::UnboundedSender<ShardMessage>>,
    backoff: BackoffConfig,
}

impl Shared {
    fn shard_of(&self, route: &RouteKey) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(route.to_string().as_bytes());
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn post(&self, message: ShardMessage) -> AgentResult<()> {
        let shard = match message.route() {
            Some(route) => self.shard_of(route),
            None => 0,
        };
        self.shards[shard]
            .send(message)
            .map_err(|_| AgentError::EngineStopped)
    }

    fn now(&self) -> Tick {
        *self.clock.read()
    }
}

/// The route-preference engine.
pub struct PreferenceEngine {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PreferenceEngine {
    /// Spawn an engine with `workers` shard tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(workers: usize, backoff: BackoffConfig) -> Self {
        let workers = workers.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut senders = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }

        let shared = Arc::new(Shared {
            state: RwLock::new(CoreState::default()),
            clock: RwLock::new(Tick::zero()),
            shards: senders,
            backoff,
        });

        let mut handles = Vec::with_capacity(workers);
        for (shard, rx) in receivers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(shard_worker(shard, shared, rx, shutdown)));
        }

        tracing::info!(workers, "preference engine started");
        Self {
            shared,
            shutdown_tx,
            workers: Mutex::new(handles),
        }
    }

    /// Install a local path and create its machine.
    ///
    /// Reinstalling an existing path recreates the machine: the sequence
    /// resets to 0 and the path waits for traffic again. When a governor is
    /// given, the dependency edge is built and the governor's current value
    /// is snapshotted verbatim, sequence included.
    pub fn install_local_path(
        &self,
        route: RouteKey,
        interface: InterfaceId,
        mac: MacAddress,
        ecmp: bool,
        static_preference: u32,
        governor: Option<GoverningAddress>,
    ) -> PathId {
        let path = PathId::new(route, PeerId::Interface(interface));
        let mut state = self.shared.state.write();

        let mut machine = PathPreferenceMachine::new(
            self.shared.backoff,
            ecmp,
            static_preference,
            governor.map(|g| g.address),
        );

        if let Some(governor) = governor {
            state.deps.bind(path.clone(), governor);
            if let Some(value) = governor_value(&state, governor) {
                machine.snapshot_from(value);
            }
        }

        state.timers.cancel(&path);
        state.next_incarnation += 1;
        let incarnation = state.next_incarnation;
        state.paths.insert(
            path.clone(),
            PathEntry {
                machine,
                mac,
                incarnation,
            },
        );
        let slot = state.routes.entry(route).or_default();
        if !slot.contains(&path) {
            slot.push(path.clone());
        }
        tracing::info!(path = %path, ecmp, static_preference, "local path installed");
        path
    }

    /// Withdraw a local path, destroying its machine and timers.
    ///
    /// Paths governed by the withdrawn path's address fall back to the
    /// self-governed default (LOW, waiting); their dependency edges stay in
    /// place for a future reinstall of the governor.
    pub fn withdraw_local_path(&self, path: &PathId) {
        let mut state = self.shared.state.write();
        if state.paths.remove(path).is_none() {
            return;
        }
        state.timers.cancel(path);
        state.deps.unbind(path);
        let route_empty = match state.routes.get_mut(&path.route) {
            Some(slot) => {
                slot.retain(|p| p != path);
                slot.is_empty()
            }
            None => false,
        };
        if route_empty {
            state.routes.remove(&path.route);
            state.remotes.remove(&path.route);
        }

        if let Some(governor) = governor_identity(&path.route) {
            for dependent in state.deps.dependents_of(governor) {
                if let Some(entry) = state.paths.get_mut(&dependent) {
                    entry.machine.reset_to_default();
                    tracing::debug!(path = %dependent, governor = %governor,
                        "governor withdrawn, dependent reset");
                }
            }
        }
        tracing::info!(path = %path, "local path withdrawn");
    }

    /// Rebind a path's governing address, or unbind it.
    ///
    /// The new governor's current value is snapshotted immediately;
    /// unbinding resets the path to the self-governed default.
    pub fn rebind(&self, path: &PathId, governor: Option<GoverningAddress>) -> AgentResult<()> {
        let mut state = self.shared.state.write();
        if !state.paths.contains_key(path) {
            return Err(AgentError::unknown_path(path.route));
        }

        match governor {
            Some(governor) => {
                state.deps.bind(path.clone(), governor);
                let snapshot = governor_value(&state, governor);
                if let Some(entry) = state.paths.get_mut(path) {
                    entry.machine.set_dependent_address(Some(governor.address));
                    match snapshot {
                        Some(value) => entry.machine.snapshot_from(value),
                        None => entry.machine.reset_to_default(),
                    }
                }
                tracing::debug!(path = %path, governor = %governor, "dependency rebound");
            }
            None => {
                state.deps.unbind(path);
                if let Some(entry) = state.paths.get_mut(path) {
                    entry.machine.set_dependent_address(None);
                    entry.machine.reset_to_default();
                }
                tracing::debug!(path = %path, "dependency unbound");
            }
        }
        Ok(())
    }

    /// Dataplane traffic notification. Fire-and-forget.
    ///
    /// A no-op when no local path on the route is owned by the given
    /// interface, or when the MAC does not match the owning path's. The
    /// matching paths are resolved here, so evidence observed before a
    /// withdraw+reinstall of the same path never promotes the fresh machine.
    pub fn notify_traffic_seen(
        &self,
        address: IpAddr,
        prefix_len: u8,
        interface: InterfaceId,
        vrf: VrfId,
        mac: MacAddress,
    ) {
        let route = RouteKey::inet(vrf, address, prefix_len);
        let targets: Vec<(PathId, u64)> = {
            let state = self.shared.state.read();
            state
                .local_paths(&route)
                .iter()
                .filter(|p| p.peer == PeerId::Interface(interface))
                .filter_map(|p| {
                    let entry = state.paths.get(p)?;
                    if entry.mac.is_zero() || entry.mac == mac {
                        Some((p.clone(), entry.incarnation))
                    } else {
                        tracing::debug!(path = %p, mac = %mac, "traffic mac mismatch");
                        None
                    }
                })
                .collect()
        };
        if targets.is_empty() {
            tracing::debug!(route = %route, interface = %interface,
                "traffic for route with no matching local path");
            return;
        }
        if self
            .shared
            .post(ShardMessage::TrafficSeen { route, targets })
            .is_err()
        {
            tracing::debug!(route = %route, "traffic notification dropped, engine stopped");
        }
    }

    /// Remote path assertion (`Some`) or withdrawal (`None`).
    ///
    /// A withdrawal never demotes local paths; it only clears the stored
    /// remote value.
    pub fn notify_remote_path(
        &self,
        route: RouteKey,
        peer: impl Into<String>,
        value: Option<PreferenceValue>,
    ) -> AgentResult<()> {
        self.shared.post(ShardMessage::RemotePath {
            route,
            peer: peer.into(),
            value,
        })
    }

    /// Administrative preference override; 0 clears.
    pub fn set_static_preference(&self, path: PathId, value: u32) -> AgentResult<()> {
        self.shared.post(ShardMessage::StaticPreference { path, value })
    }

    /// Toggle ECMP on a path.
    pub fn set_ecmp(&self, path: PathId, enabled: bool) -> AgentResult<()> {
        self.shared.post(ShardMessage::EcmpChanged { path, enabled })
    }

    /// Advance the engine clock and fire due backoff timers.
    ///
    /// Expiry is posted through the owning route's queue, so it is
    /// serialized against other events for the route.
    pub fn advance_clock(&self, tick: Tick) {
        *self.shared.clock.write() = tick;
        let due = self.shared.state.write().timers.pop_due(tick);
        for (path, generation) in due {
            if self
                .shared
                .post(ShardMessage::BackoffExpired { path, generation })
                .is_err()
            {
                return;
            }
        }
    }

    /// Wait until every event queued so far has been applied.
    ///
    /// Two flush rounds: the first covers directly posted events, the second
    /// covers governor-transition propagation they fanned out (propagation
    /// is one level deep, so two rounds suffice).
    pub async fn drain(&self) {
        for _ in 0..2 {
            let mut acks = Vec::with_capacity(self.shared.shards.len());
            for shard in &self.shared.shards {
                let (tx, rx) = oneshot::channel();
                if shard.send(ShardMessage::Flush { ack: tx }).is_ok() {
                    acks.push(rx);
                }
            }
            for ack in acks {
                let _ = ack.await;
            }
        }
    }

    /// Consistent copy of a path's current preference value.
    pub fn path_preference(&self, path: &PathId) -> Option<PreferenceValue> {
        self.shared
            .state
            .read()
            .paths
            .get(path)
            .map(|entry| entry.machine.value())
    }

    /// Snapshot of all local path values on a route.
    pub fn route_preferences(&self, route: &RouteKey) -> Vec<(PathId, PreferenceValue)> {
        let state = self.shared.state.read();
        state
            .local_paths(route)
            .iter()
            .filter_map(|path| {
                state
                    .paths
                    .get(path)
                    .map(|entry| (path.clone(), entry.machine.value()))
            })
            .collect()
    }

    /// Stored remote assertions on a route, per peer name.
    ///
    /// Populated only while the route carries local paths; a remote
    /// withdrawal or the last local withdrawal clears the stored values.
    pub fn remote_preferences(&self, route: &RouteKey) -> Vec<(String, PreferenceValue)> {
        self.shared
            .state
            .read()
            .remotes
            .get(route)
            .map(|peers| peers.iter().map(|(p, v)| (p.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// Number of installed local paths.
    pub fn path_count(&self) -> usize {
        self.shared.state.read().paths.len()
    }

    /// Last tick observed by `advance_clock`.
    pub fn clock(&self) -> Tick {
        self.shared.now()
    }

    /// Stop the shard workers and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("preference engine stopped");
    }
}

/// Governing identity a route's paths expose, if any.
///
/// Only host routes in the inet table can govern dependents.
fn governor_identity(route: &RouteKey) -> Option<GoverningAddress> {
    if route.table == RouteTableKind::Inet && route.is_host() {
        Some(GoverningAddress::new(route.vrf, route.prefix))
    } else {
        None
    }
}

/// Current value of the governor's path, if one is installed.
///
/// The governor is the interface-owned local path on the host route for the
/// governing address.
fn governor_value(state: &CoreState, governor: GoverningAddress) -> Option<PreferenceValue> {
    let route = RouteKey::host(governor.vrf, governor.address);
    state
        .local_paths(&route)
        .iter()
        .find(|p| matches!(p.peer, PeerId::Interface(_)))
        .and_then(|p| state.paths.get(p))
        .map(|entry| entry.machine.value())
}

/// Outgoing propagation produced while holding the state lock.
struct Propagation {
    path: PathId,
    value: PreferenceValue,
}

async fn shard_worker(
    shard: usize,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<ShardMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(shard, "shard worker started");
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        apply(&shared, message);
    }
    tracing::debug!(shard, "shard worker stopped");
}

/// Apply one message against the shared state.
fn apply(shared: &Shared, message: ShardMessage) {
    let now = shared.now();
    let mut fanout = Vec::new();

    {
        let mut state = shared.state.write();
        match message {
            ShardMessage::TrafficSeen { route: _, targets } => {
                for (path, incarnation) in targets {
                    let live = state
                        .paths
                        .get(&path)
                        .map(|entry| entry.incarnation == incarnation)
                        .unwrap_or(false);
                    if !live {
                        // The path was withdrawn (and possibly reinstalled)
                        // after the evidence was observed.
                        tracing::debug!(path = %path, "stale traffic evidence dropped");
                        continue;
                    }
                    apply_event(&mut state, &path, PathEvent::TrafficSeen, now, &mut fanout);
                }
            }
            ShardMessage::RemotePath { route, peer, value } => match value {
                Some(value) => {
                    let targets: Vec<PathId> = state.local_paths(&route).to_vec();
                    if targets.is_empty() {
                        // Routes the agent does not originate are not
                        // tracked; storing their assertions would grow
                        // without bound.
                        tracing::debug!(route = %route, peer = %peer,
                            "remote assertion for route with no local path");
                        return;
                    }
                    state
                        .remotes
                        .entry(route)
                        .or_default()
                        .insert(peer, value);
                    for path in targets {
                        apply_event(
                            &mut state,
                            &path,
                            PathEvent::RemoteCompetitor {
                                preference: value.preference,
                            },
                            now,
                            &mut fanout,
                        );
                    }
                }
                None => {
                    if let Some(peers) = state.remotes.get_mut(&route) {
                        peers.remove(&peer);
                        if peers.is_empty() {
                            state.remotes.remove(&route);
                        }
                    }
                }
            },
            ShardMessage::StaticPreference { path, value } => {
                apply_event(
                    &mut state,
                    &path,
                    PathEvent::StaticPreference { value },
                    now,
                    &mut fanout,
                );
            }
            ShardMessage::EcmpChanged { path, enabled } => {
                apply_event(
                    &mut state,
                    &path,
                    PathEvent::EcmpChanged { enabled },
                    now,
                    &mut fanout,
                );
            }
            ShardMessage::BackoffExpired { path, generation } => {
                // A stale generation means the timer was re-armed or
                // cancelled after this expiry was posted.
                if state.timers.consume(&path, generation) {
                    apply_event(&mut state, &path, PathEvent::BackoffExpired, now, &mut fanout);
                }
            }
            ShardMessage::GoverningUpdate { path, value } => {
                // Terminal by construction: a governed path never fans out.
                let Some(entry) = state.paths.get_mut(&path) else {
                    return;
                };
                let outcome = entry
                    .machine
                    .process(PathEvent::GoverningUpdate { value }, now);
                if outcome.transitioned {
                    tracing::debug!(path = %path, value = %entry.machine.value(),
                        "governed path updated");
                }
            }
            ShardMessage::Flush { ack } => {
                drop(state);
                let _ = ack.send(());
                return;
            }
        }
    }

    for Propagation { path, value } in fanout {
        if shared
            .post(ShardMessage::GoverningUpdate { path, value })
            .is_err()
        {
            return;
        }
    }
}

/// Run one event through a path's machine, then service the timer op and
/// collect dependency fan-out.
fn apply_event(
    state: &mut CoreState,
    path: &PathId,
    event: PathEvent,
    now: Tick,
    fanout: &mut Vec<Propagation>,
) {
    let Some(entry) = state.paths.get_mut(path) else {
        // Expected race with concurrent withdrawal.
        tracing::debug!(path = %path, "event for unknown path dropped");
        return;
    };
    let outcome: Outcome = entry.machine.process(event, now);
    let value = entry.machine.value();

    match outcome.timer {
        TimerOp::Arm(deadline) => {
            state.timers.arm(path.clone(), deadline);
        }
        TimerOp::Cancel => {
            state.timers.cancel(path);
        }
        TimerOp::Keep => {}
    }

    if !outcome.transitioned {
        return;
    }
    tracing::debug!(path = %path, value = %value, "path transitioned");

    if let Some(governor) = governor_identity(&path.route) {
        for dependent in state.deps.dependents_of(governor) {
            fanout.push(Propagation {
                path: dependent,
                value,
            });
        }
    }
}

//! Bounded pool of active workers.
//!
//! At most one worker per integration name and at most `max_active` workers
//! overall. Workers are spawned on first use; when the pool is full the least
//! recently used one is killed to make room, and a background reaper kills
//! workers that have been idle for too long.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{WorkerCatalog, WorkerDescriptor};
use crate::internal::supervisor::{ActiveWorker, Supervisor, WorkerExit};
use crate::types::{BrokerConfig, BrokerError, Result, WorkerStats};

type SpawnFuture = Shared<BoxFuture<'static, Result<Arc<ActiveWorker>>>>;

struct PoolEntry {
    worker: Arc<ActiveWorker>,
    last_used: Instant,
    /// Insertion order, breaks ties between equal `last_used` values.
    seq: u64,
}

struct PoolState {
    active: HashMap<String, PoolEntry>,
    /// One shared spawn per name; concurrent callers await the same future.
    spawning: HashMap<String, SpawnFuture>,
    next_seq: u64,
    closed: bool,
}

impl PoolState {
    /// Least recently used active entry.
    fn lru(&self) -> Option<String> {
        self.active
            .iter()
            .min_by_key(|(_, entry)| (entry.last_used, entry.seq))
            .map(|(name, _)| name.clone())
    }

    fn occupied(&self) -> usize {
        self.active.len() + self.spawning.len()
    }
}

enum Admission {
    /// Await this spawn; its outcome is ours.
    Join(SpawnFuture),
    /// Every slot is held by an in-flight spawn; wait for one and retry.
    Retry(SpawnFuture),
}

struct PoolShared {
    catalog: Arc<WorkerCatalog>,
    supervisor: Supervisor,
    config: BrokerConfig,
    state: Mutex<PoolState>,
    /// Stops the reaper and aborts spawns in progress.
    shutdown: CancellationToken,
}

/// Pool manager. Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create the pool and start its reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(catalog: Arc<WorkerCatalog>, config: BrokerConfig) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let shared = Arc::new(PoolShared {
            catalog,
            supervisor: Supervisor::new(config.call_timeout, exit_tx, shutdown.clone()),
            config,
            state: Mutex::new(PoolState {
                active: HashMap::new(),
                spawning: HashMap::new(),
                next_seq: 0,
                closed: false,
            }),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_housekeeping(
            Arc::downgrade(&shared),
            exit_rx,
            shared.config.reap_interval,
            shutdown,
        ));

        Self { shared }
    }

    /// Return the live worker for `name`, spawning it if needed.
    pub async fn ensure(&self, name: &str) -> Result<Arc<ActiveWorker>> {
        loop {
            let admission = {
                let mut state = self.shared.state.lock().await;
                if state.closed {
                    return Err(BrokerError::ShuttingDown);
                }

                if let Some(entry) = state.active.get_mut(name) {
                    if entry.worker.is_alive() {
                        entry.last_used = Instant::now();
                        return Ok(Arc::clone(&entry.worker));
                    }
                    // Died, exit event not processed yet.
                    debug!(server = %name, "Replacing dead worker");
                    if let Some(dead) = state.active.remove(name) {
                        dead.worker.kill();
                    }
                }

                if let Some(spawn) = state.spawning.get(name) {
                    Admission::Join(spawn.clone())
                } else {
                    let descriptor = self.shared.catalog.lookup(name)?.clone();
                    match self.shared.make_room(&mut state) {
                        Some(busy) => Admission::Retry(busy),
                        None => {
                            let spawn = self.shared.start_spawn(descriptor);
                            state.spawning.insert(name.to_string(), spawn.clone());
                            Admission::Join(spawn)
                        }
                    }
                }
            };

            match admission {
                Admission::Join(spawn) => return spawn.await,
                Admission::Retry(busy) => {
                    debug!(server = %name, "Pool full of in-flight spawns, waiting");
                    let _ = busy.await;
                }
            }
        }
    }

    /// Kill every worker idle for longer than the configured threshold.
    /// Returns the evicted names.
    pub async fn evict_idle(&self) -> Vec<String> {
        self.shared.evict_idle().await
    }

    /// Spawn the given integrations ahead of time. Failures are logged only.
    pub async fn prewarm(&self, names: &[String]) {
        for name in names {
            match self.ensure(name).await {
                Ok(worker) => info!(server = %name, tools = worker.tools().len(), "Prewarmed worker"),
                Err(e) => warn!(server = %name, "Prewarm failed: {}", e),
            }
        }
    }

    /// Kill every worker, stop the reaper and refuse further work.
    ///
    /// Spawns still handshaking are aborted; returns once every child,
    /// pooled or in flight, has been reaped.
    pub async fn shutdown(&self) {
        let (workers, in_flight) = {
            let mut state = self.shared.state.lock().await;
            state.closed = true;
            let workers: Vec<Arc<ActiveWorker>> =
                state.active.drain().map(|(_, entry)| entry.worker).collect();
            let in_flight: Vec<SpawnFuture> = state.spawning.values().cloned().collect();
            (workers, in_flight)
        };
        self.shared.shutdown.cancel();

        info!(
            count = workers.len(),
            in_flight = in_flight.len(),
            "Shutting down worker pool"
        );
        for worker in &workers {
            worker.kill();
        }
        for spawn in in_flight {
            let _ = spawn.await;
        }
        for worker in &workers {
            worker.wait().await;
        }
    }

    /// Per-worker statistics, sorted by name.
    pub async fn worker_stats(&self) -> Vec<WorkerStats> {
        let state = self.shared.state.lock().await;
        let now = Instant::now();

        let mut stats: Vec<WorkerStats> = state
            .active
            .iter()
            .map(|(name, entry)| WorkerStats {
                name: name.clone(),
                idle_seconds: now.duration_since(entry.last_used).as_secs(),
                tool_count: entry.worker.tools().len(),
                pid: entry.worker.pid(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Names of active workers, sorted.
    pub async fn active_names(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut names: Vec<String> = state.active.keys().cloned().collect();
        names.sort();
        names
    }

    /// The active worker for `name`, without touching or spawning.
    pub async fn get(&self, name: &str) -> Option<Arc<ActiveWorker>> {
        let state = self.shared.state.lock().await;
        state.active.get(name).map(|entry| Arc::clone(&entry.worker))
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of processes started over the lifetime of the pool.
    pub fn spawn_count(&self) -> u64 {
        self.shared.supervisor.spawn_count()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }
}

impl PoolShared {
    /// Free a slot for a new spawn by evicting LRU workers.
    ///
    /// Returns an in-flight spawn to wait on when every slot is taken by
    /// spawns that cannot be evicted yet.
    fn make_room(&self, state: &mut PoolState) -> Option<SpawnFuture> {
        while state.occupied() >= self.config.max_active {
            match state.lru() {
                Some(victim) => {
                    if let Some(entry) = state.active.remove(&victim) {
                        info!(
                            server = %victim,
                            outstanding = entry.worker.outstanding(),
                            "Evicting LRU worker"
                        );
                        entry.worker.kill();
                    }
                }
                None => return state.spawning.values().next().cloned(),
            }
        }
        None
    }

    /// Run the spawn on its own task so it completes even if every caller
    /// waiting on it goes away.
    fn start_spawn(self: &Arc<Self>, descriptor: WorkerDescriptor) -> SpawnFuture {
        let shared = Arc::clone(self);
        let name = descriptor.name.clone();

        let task = tokio::spawn(async move {
            let result = shared.supervisor.spawn(&descriptor).await;

            let mut state = shared.state.lock().await;
            state.spawning.remove(&descriptor.name);

            let worker = match result {
                Ok(worker) => Arc::new(worker),
                Err(e) => return Err(e),
            };
            if state.closed {
                drop(state);
                worker.kill();
                worker.wait().await;
                return Err(BrokerError::ShuttingDown);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.active.insert(
                descriptor.name.clone(),
                PoolEntry {
                    worker: Arc::clone(&worker),
                    last_used: Instant::now(),
                    seq,
                },
            );
            debug!(server = %descriptor.name, active = state.active.len(), "Worker registered");
            Ok(worker)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(server = %name, "Spawn task failed: {}", e);
                    Err(BrokerError::spawn(name, std::io::Error::other(e.to_string())))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn evict_idle(&self) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout;
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let idle: Vec<String> = state
            .active
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) > idle_timeout)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &idle {
            if let Some(entry) = state.active.remove(name) {
                info!(server = %name, "Evicting idle worker");
                entry.worker.kill();
            }
        }
        idle
    }

    async fn handle_exit(&self, exit: WorkerExit) {
        let mut state = self.state.lock().await;
        let current = state
            .active
            .get(&exit.name)
            .is_some_and(|entry| entry.worker.instance() == exit.instance);

        if current {
            state.active.remove(&exit.name);
            warn!(server = %exit.name, status = ?exit.status, "Worker exited, removed from pool");
        } else {
            debug!(server = %exit.name, instance = %exit.instance, "Exit of a worker no longer pooled");
        }
    }
}

async fn run_housekeeping(
    shared: Weak<PoolShared>,
    mut exits: mpsc::UnboundedReceiver<WorkerExit>,
    reap_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + reap_interval, reap_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                let evicted = shared.evict_idle().await;
                if !evicted.is_empty() {
                    debug!(?evicted, "Reaper tick");
                }
            }
            Some(exit) = exits.recv() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.handle_exit(exit).await;
            }
        }
    }
    debug!("Pool housekeeping stopped");
}

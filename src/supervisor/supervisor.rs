use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};

use crate::configuration::load_configuration::discover;
use crate::configuration::server_config::ServerConfig;
use crate::configuration::worker_config::WorkerConfig;
use crate::core::operation_mode::OperationMode;
use crate::core::triggers::get_trigger_handler;
use crate::logging::syslog::{error, info, trace, warn};
use crate::network::port_manager::PortManager;
use crate::process::child::ChildProcess;
use crate::registry::registry::Registry;
use crate::registry::worker::{WorkerKind, WorkerStatus};
use crate::reload::broadcaster::Broadcaster;
use crate::supervisor::lifecycle::{self, SpawnedWorker};
use crate::supervisor::restart_policy::RestartPolicy;
use crate::watch::watcher::{self, ChangeKind, WatchEvent, WatchTarget};

const RECYCLE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// One child's exit, carrying the exact `ChildProcess` instance that died so
/// `handle_unexpected_exit` can tell a genuine crash from a stale report for
/// a generation that has already been superseded by a hot-swap/recycle/
/// SIGHUP-driven rebuild (see its doc comment).
struct ExitNotice {
    name: String,
    child: Arc<ChildProcess>,
}

/// The single serialized event loop of §5: one task owns every mutation of
/// worker state, draining `(discovery | file watch | SIGHUP | child exit |
/// recycle timer)` one event at a time. Concurrent `Registry::lookup`s from
/// the HTTP layer are unaffected — only writers ever wait on this loop.
pub struct Supervisor {
    workers_dir: PathBuf,
    config_path: PathBuf,
    server_config: Mutex<ServerConfig>,
    mode: OperationMode,
    registry: Arc<Registry>,
    reload: Arc<Broadcaster>,
    port_manager: &'static PortManager,
    shutting_down: Arc<AtomicBool>,

    children: Mutex<HashMap<String, Arc<ChildProcess>>>,
    configs: Mutex<HashMap<String, WorkerConfig>>,
    restart_policies: Mutex<HashMap<String, RestartPolicy>>,
}

impl Supervisor {
    pub fn new(workers_dir: PathBuf, config_path: PathBuf, server_config: ServerConfig, mode: OperationMode, registry: Arc<Registry>, reload: Arc<Broadcaster>, port_manager: &'static PortManager, shutting_down: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Supervisor {
            workers_dir,
            config_path,
            server_config: Mutex::new(server_config),
            mode,
            registry,
            reload,
            port_manager,
            shutting_down,
            children: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            restart_policies: Mutex::new(HashMap::new()),
        })
    }

    pub async fn run(self: Arc<Self>, worker_configs: Vec<WorkerConfig>) {
        self.startup(worker_configs).await;

        let mut watch_rx = if self.mode.is_dev() { self.start_watcher().await } else { None };

        let shutdown_token = get_trigger_handler().get_token("shutdown").await.expect("shutdown trigger is always registered");
        let sighup_token = get_trigger_handler().get_token("reload_configuration").await.expect("reload_configuration trigger is always registered");
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ExitNotice>();
        let mut recycle_ticker = tokio::time::interval(RECYCLE_SWEEP_INTERVAL);

        self.arm_exit_watchers(exit_tx.clone()).await;

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info("supervisor shutting down");
                    self.graceful_shutdown().await;
                    return;
                }
                _ = sighup_token.cancelled() => {
                    self.handle_sighup(exit_tx.clone()).await;
                }
                Some(event) = Self::recv_watch(&mut watch_rx) => {
                    self.handle_watch_event(event, exit_tx.clone()).await;
                }
                Some(notice) = exit_rx.recv() => {
                    self.handle_unexpected_exit(notice, exit_tx.clone()).await;
                }
                _ = recycle_ticker.tick() => {
                    self.recycle_sweep(exit_tx.clone()).await;
                }
            }
        }
    }

    async fn recv_watch(rx: &mut Option<mpsc::Receiver<WatchEvent>>) -> Option<WatchEvent> {
        match rx {
            Some(r) => r.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn startup(&self, worker_configs: Vec<WorkerConfig>) {
        let server_config = self.server_config.lock().await.clone();

        let spawned = join_all(worker_configs.into_iter().map(|config| {
            let workers_dir = self.workers_dir.clone();
            let server_config = server_config.clone();
            async move { lifecycle::bring_up(config.clone(), &workers_dir, &server_config, self.port_manager, self.mode, None).await }
        }))
        .await;

        for spawned in spawned {
            self.register_spawned(spawned).await;
        }
    }

    async fn register_spawned(&self, spawned: SpawnedWorker) {
        let name = spawned.worker.name.clone();
        let config = spawned.worker.config.clone();

        self.registry.put(spawned.worker.clone());
        self.configs.lock().await.insert(name.clone(), config);
        if let Some(child) = spawned.child {
            self.children.lock().await.insert(name.clone(), child);
        }
        self.restart_policies.lock().await.entry(name).or_insert_with(|| {
            let cfg = self.server_config.try_lock().map(|c| (c.backoff_initial_ms, c.backoff_multiplier, c.backoff_max_ms, c.max_restarts, c.restart_period_secs)).unwrap_or((250, 2.0, 30_000, 5, 60));
            RestartPolicy::new(cfg.0, cfg.1, cfg.2, cfg.3, cfg.4)
        });
    }

    /// Wires an exit watcher onto every currently-tracked native child so an
    /// unexpected exit reaches the event loop as `exit_tx` traffic.
    async fn arm_exit_watchers(&self, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        let children: Vec<(String, Arc<ChildProcess>)> = self.children.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (name, child) in children {
            self.arm_one_exit_watcher(name, child, exit_tx.clone());
        }
    }

    /// The notice carries this exact `child` instance so a stale report from
    /// a generation already superseded elsewhere (hot-swap, recycle, a
    /// SIGHUP-driven removal) can be told apart from a live one.
    fn arm_one_exit_watcher(&self, name: String, child: Arc<ChildProcess>, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        tokio::spawn(async move {
            let rx = child.clone().watch_exit();
            let _ = rx.await;
            let _ = exit_tx.send(ExitNotice { name, child });
        });
    }

    async fn start_watcher(&self) -> Option<mpsc::Receiver<WatchEvent>> {
        let configs = self.configs.lock().await;
        let targets: Vec<WatchTarget> = configs.keys().map(|name| WatchTarget { worker_name: name.clone(), root: self.workers_dir.join(name) }).collect();
        drop(configs);

        if targets.is_empty() {
            return None;
        }

        let debounce_ms = self.server_config.lock().await.debounce_ms;
        match watcher::start(targets, &watcher::default_ignore_patterns(), debounce_ms) {
            Ok((watcher_handle, rx)) => {
                // The watcher must outlive the loop; leaking it here is the
                // simplest way to keep it alive for the process lifetime
                // without threading another field through every call site.
                std::mem::forget(watcher_handle);
                Some(rx)
            }
            Err(e) => {
                error(format!("failed to start file watcher: {}", e));
                None
            }
        }
    }

    /// Hot-swap sequence: rebuild the one worker that changed, reusing its
    /// previous port, then atomically replace it in the registry. A config
    /// change forces a full re-read of `worker.yaml` rather than trusting
    /// the in-memory copy.
    async fn handle_watch_event(&self, event: WatchEvent, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        trace(format!("rebuild triggered for '{}' ({:?})", event.worker_name, event.kind));

        let config = if matches!(event.kind, ChangeKind::Config) {
            match self.reload_one_config(&event.worker_name).await {
                Some(c) => c,
                None => return,
            }
        } else {
            match self.configs.lock().await.get(&event.worker_name).cloned() {
                Some(c) => c,
                None => return,
            }
        };

        self.rebuild_and_swap(config, exit_tx).await;
        self.reload.notify_reload();
    }

    async fn reload_one_config(&self, name: &str) -> Option<WorkerConfig> {
        let worker_yaml = self.workers_dir.join(name).join("worker.yaml");
        let raw = match std::fs::read_to_string(&worker_yaml) {
            Ok(r) => r,
            Err(e) => {
                warn(format!("worker '{}': could not re-read worker.yaml: {}", name, e));
                return None;
            }
        };
        let mut config: WorkerConfig = match serde_yaml::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn(format!("worker '{}': worker.yaml failed to parse: {}", name, e));
                return None;
            }
        };
        config.name = name.to_string();
        if let Err(errs) = config.validate() {
            warn(format!("worker '{}': worker.yaml failed validation: {}", name, errs.join("; ")));
            return None;
        }
        Some(config)
    }

    /// Builds and health-checks the replacement before touching the old
    /// worker at all. Only a `Healthy` replacement gets to displace it
    /// (spec's build -> health-check -> swap -> drain sequence); a build or
    /// health-check failure leaves the last-known-good worker serving and
    /// just tears down whatever the failed attempt spawned.
    async fn rebuild_and_swap(&self, config: WorkerConfig, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        let name = config.name.clone();
        let preferred_port = self.registry.get_by_name(&name).and_then(|w| w.port());
        let server_config = self.server_config.lock().await.clone();

        let spawned = lifecycle::bring_up(config, &self.workers_dir, &server_config, self.port_manager, self.mode, preferred_port).await;

        if spawned.worker.status() != WorkerStatus::Healthy {
            error(format!("worker '{}': rebuild did not come up healthy, keeping previous instance in service", name));
            if let Some(child) = &spawned.child {
                if let Some(port) = spawned.worker.port() {
                    self.port_manager.release(port).await;
                }
                let _ = child.graceful_stop(Duration::from_secs(5)).await;
            }
            return;
        }

        self.stop_previous(&name).await;
        if let Some(child) = spawned.child.clone() {
            self.arm_one_exit_watcher(name.clone(), child.clone(), exit_tx);
        }
        self.register_spawned(spawned).await;
    }

    /// Drains and stops whatever is currently registered under `name`,
    /// releasing its port once the old child has actually exited so the
    /// range doesn't leak a slot on every swap/crash-restart/removal.
    async fn stop_previous(&self, name: &str) {
        if let Some(previous) = self.registry.get_by_name(name) {
            previous.state.lock().unwrap().transition(WorkerStatus::Draining);
            if let (WorkerKind::FastcgiPool, Some(pool)) = (previous.kind, previous.pool.clone()) {
                pool.stop().await;
            }
        }

        if let Some(child) = self.children.lock().await.remove(name) {
            if let Err(e) = child.graceful_stop(Duration::from_secs(5)).await {
                warn(format!("worker '{}': previous instance did not stop cleanly: {}", name, e));
            }
        }

        if let Some(previous) = self.registry.get_by_name(name) {
            if let Some(port) = previous.port() {
                self.port_manager.release(port).await;
            }
        }
    }

    /// SIGHUP (prod): re-reads `server.yaml` and every `worker.yaml`, diffs
    /// against the last-applied configuration, rebuilds changed workers,
    /// brings up new ones, and drains removed ones.
    async fn handle_sighup(&self, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        info("reload_configuration trigger received, re-reading configuration");

        let (new_server_config, new_workers) = match discover(&self.config_path) {
            Ok(result) => result,
            Err(e) => {
                error(format!("configuration reload failed, keeping previous: {}", e));
                return;
            }
        };

        *self.server_config.lock().await = new_server_config;

        let previous: HashMap<String, WorkerConfig> = self.configs.lock().await.clone();
        let mut seen = HashSet::new();

        for config in new_workers {
            seen.insert(config.name.clone());
            let changed = previous.get(&config.name).map(|old| !configs_equivalent(old, &config)).unwrap_or(true);
            if changed {
                trace(format!("worker '{}' config changed, rebuilding", config.name));
                self.rebuild_and_swap(config, exit_tx.clone()).await;
            }
        }

        for removed_name in previous.keys().filter(|name| !seen.contains(*name)) {
            info(format!("worker '{}' removed from configuration, draining", removed_name));
            self.stop_previous(removed_name).await;
            self.registry.delete(removed_name);
            self.configs.lock().await.remove(removed_name);
            self.restart_policies.lock().await.remove(removed_name);
        }

        self.reload.notify_reload();
    }

    /// Restart policy: an unannounced exit is a crash, *unless* the child
    /// that exited is no longer the one currently tracked for this name. A
    /// hot-swap, recycle, or SIGHUP-driven removal all run to completion
    /// (including registering/tracking the replacement, if any) before this
    /// loop ever gets back around to draining the old child's queued exit
    /// notification, so the only reliable way to tell a genuine crash from
    /// that stale report is to compare the exact `ChildProcess` instance
    /// rather than relying on a "currently draining" flag and its timing.
    async fn handle_unexpected_exit(&self, notice: ExitNotice, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        let name = notice.name;

        let still_current = self.children.lock().await.get(&name).map(|current| Arc::ptr_eq(current, &notice.child)).unwrap_or(false);
        if !still_current {
            trace(format!("worker '{}': exit of a superseded instance, ignoring", name));
            return;
        }

        warn(format!("worker '{}' exited unexpectedly", name));

        if let Some(worker) = self.registry.get_by_name(&name) {
            worker.state.lock().unwrap().transition(WorkerStatus::Unhealthy);
        }

        let delay = {
            let mut policies = self.restart_policies.lock().await;
            policies.entry(name.clone()).or_insert_with(|| RestartPolicy::new(250, 2.0, 30_000, 5, 60)).record_crash()
        };

        let Some(delay) = delay else {
            error(format!("worker '{}' exceeded its restart budget, giving up", name));
            if let Some(worker) = self.registry.get_by_name(&name) {
                worker.state.lock().unwrap().transition(WorkerStatus::Stopped);
            }
            return;
        };

        tokio::time::sleep(delay).await;

        let Some(config) = self.configs.lock().await.get(&name).cloned() else {
            return;
        };
        self.rebuild_and_swap(config, exit_tx).await;
    }

    /// Recycles every worker that has served `max_requests` requests since
    /// its last (re)start. Unlike a watch-triggered rebuild, this restarts
    /// the existing artifact rather than rebuilding from source.
    async fn recycle_sweep(&self, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
        let due: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| self.registry.get_by_name(name).map(|w| matches!(w.kind, WorkerKind::Native) && w.should_recycle()).unwrap_or(false))
            .collect();

        for name in due {
            trace(format!("worker '{}' reached its request budget, recycling", name));
            if let Some(config) = self.configs.lock().await.get(&name).cloned() {
                self.rebuild_and_swap(config, exit_tx.clone()).await;
            }
        }
    }

    /// Stop accepting (the HTTP listener already does this via the same
    /// `shutdown` trigger), SIGTERM every child concurrently, then SIGKILL
    /// whatever is left once `shutdown_grace_ms` elapses, then release every
    /// port. Already-accepted requests finish inside the grace window; the
    /// `shutting_down` flag makes new ones on kept-alive connections get 503.
    async fn graceful_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);

        let grace = Duration::from_secs_f64(self.server_config.lock().await.shutdown_grace_ms as f64 / 1000.0);

        let children: Vec<Arc<ChildProcess>> = self.children.lock().await.values().cloned().collect();
        join_all(children.iter().map(|child| child.graceful_stop(grace))).await;

        let pools: Vec<Arc<crate::pool::pool::Pool>> = self.registry.names().iter().filter_map(|name| self.registry.get_by_name(name)).filter_map(|w| w.pool.clone()).collect();
        join_all(pools.iter().map(|pool| pool.stop())).await;

        for name in self.registry.names() {
            if let Some(worker) = self.registry.get_by_name(&name) {
                if let Some(port) = worker.port() {
                    self.port_manager.release(port).await;
                }
            }
        }

        info("supervisor shutdown complete");
    }
}

/// Ignores the `name` field (set post-parse from the directory) so a
/// directory rename alone doesn't count as a semantic change.
fn configs_equivalent(a: &WorkerConfig, b: &WorkerConfig) -> bool {
    serde_yaml::to_string(&without_name(a)).ok() == serde_yaml::to_string(&without_name(b)).ok()
}

fn without_name(config: &WorkerConfig) -> WorkerConfig {
    let mut clone = config.clone();
    clone.name = String::new();
    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample(name: &str, path: &str) -> WorkerConfig {
        WorkerConfig { name: name.to_string(), path: path.to_string(), r#type: "native".to_string(), enabled: true, runtime: Map::new(), timeouts: Default::default(), max_requests: 0, pool: Default::default(), fastcgi: Default::default() }
    }

    #[test]
    fn identical_configs_besides_name_are_equivalent() {
        let a = sample("blog", "/blog");
        let mut b = sample("blog-renamed-dir", "/blog");
        b.name = "blog-renamed-dir".to_string();
        assert!(configs_equivalent(&a, &b));
    }

    #[test]
    fn a_changed_route_is_not_equivalent() {
        let a = sample("blog", "/blog");
        let b = sample("blog", "/blog-v2");
        assert!(!configs_equivalent(&a, &b));
    }
}

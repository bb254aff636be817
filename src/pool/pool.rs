use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{SpawnError, TqErrorKind};
use crate::fastcgi::client::{FastCgiResponse, send_request};
use crate::health::checker::tcp_health_check;
use crate::logging::syslog::{error, info, trace, warn};
use crate::network::port_manager::PortManager;
use crate::process::child::{ChildProcess, ChildProcessSpec};
use crate::supervisor::restart_policy::RestartPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolManagerKind {
    Static,
    Dynamic,
    OnDemand,
}

impl PoolManagerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "static" => Some(PoolManagerKind::Static),
            "dynamic" => Some(PoolManagerKind::Dynamic),
            "ondemand" => Some(PoolManagerKind::OnDemand),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildState {
    Spawning,
    Idle,
    Active,
    Terminating,
    Crashed,
}

pub struct PoolChild {
    pub process: Arc<ChildProcess>,
    pub listen_port: u16,
    pub state: Mutex<ChildState>,
    pub requests_served: AtomicU64,
    pub last_active: Mutex<std::time::Instant>,
}

pub struct PoolConfig {
    pub worker_name: String,
    pub manager: PoolManagerKind,
    pub min: u32,
    pub max: u32,
    pub start_count: u32,
    pub max_requests_per_child: u64,
    pub idle_timeout: Duration,
    pub listen_addr: Option<String>,
    pub executable: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

/// Maintains `Child` processes all speaking FastCGI on their own loopback
/// port, under one of three scaling policies. Dispatch acquires an idle
/// child FIFO-first, dials it directly (no shared listener: the HTTP→FastCGI
/// proxy calls `dispatch` in-process, so `listen_addr` is carried only as
/// config provenance, not bound to a socket here).
pub struct Pool {
    config: PoolConfig,
    port_manager: PortManager,
    children: Mutex<VecDeque<Arc<PoolChild>>>,
    shutdown: CancellationToken,
    crash_policy: Mutex<RestartPolicy>,
}

impl Pool {
    pub async fn start(config: PoolConfig, port_manager: PortManager) -> Result<Arc<Self>, TqError> {
        let pool = Arc::new(Pool {
            config,
            port_manager,
            children: Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
            crash_policy: Mutex::new(RestartPolicy::new(250, 2.0, 30_000, 5, 60)),
        });

        let initial = match pool.config.manager {
            PoolManagerKind::Static => pool.config.max,
            PoolManagerKind::Dynamic => pool.config.start_count,
            PoolManagerKind::OnDemand => 0,
        };

        for _ in 0..initial {
            let child = pool.spawn_child().await?;
            pool.children.lock().await.push_back(child);
        }

        info(format!("pool '{}' started with {} children ({:?})", pool.config.worker_name, initial, pool.config.manager));

        tokio::spawn(pool.clone().run_control_loop());

        Ok(pool)
    }

    async fn spawn_child(&self) -> Result<Arc<PoolChild>, TqError> {
        let port = self.port_manager.acquire(&format!("{}-pool-child", self.config.worker_name), None).await?;

        let mut env = self.config.env.clone();
        env.insert("FASTCGI_LISTEN_PORT".to_string(), port.to_string());

        let spec = ChildProcessSpec { name: format!("{}-pool", self.config.worker_name), program: self.config.executable.clone(), args: self.config.args.clone(), cwd: self.config.cwd.clone(), env };

        let process = match ChildProcess::spawn(spec).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                self.port_manager.release(port).await;
                return Err(e);
            }
        };

        let child = Arc::new(PoolChild { process, listen_port: port, state: Mutex::new(ChildState::Spawning), requests_served: AtomicU64::new(0), last_active: Mutex::new(std::time::Instant::now()) });

        let healthy = crate::health::checker::wait_healthy(|| tcp_health_check(port), Duration::from_secs(5)).await;
        if !healthy {
            warn(format!("pool '{}' child on port {} failed initial health check", self.config.worker_name, port));
            *child.state.lock().await = ChildState::Crashed;
        } else {
            *child.state.lock().await = ChildState::Idle;
        }

        Ok(child)
    }

    /// Acquires an idle child FIFO-first, spawning one on demand for
    /// dynamic/on-demand pools if none is idle and `max` hasn't been hit.
    async fn acquire_idle(&self) -> Result<Arc<PoolChild>, TqError> {
        {
            let children = self.children.lock().await;
            for child in children.iter() {
                let mut state = child.state.lock().await;
                if *state == ChildState::Idle {
                    *state = ChildState::Active;
                    return Ok(child.clone());
                }
            }
        }

        if matches!(self.config.manager, PoolManagerKind::Dynamic | PoolManagerKind::OnDemand) {
            let mut children = self.children.lock().await;
            if children.len() < self.config.max as usize {
                let child = self.spawn_child().await?;
                *child.state.lock().await = ChildState::Active;
                children.push_back(child.clone());
                return Ok(child);
            }
        }

        Err(TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("pool '{}' has no idle child and is at its configured max", self.config.worker_name)))
    }

    /// Forwards one FastCGI request to an idle child, relays its response,
    /// marks it idle again, and recycles it once `max_requests_per_child`
    /// is reached.
    pub async fn dispatch(&self, request_id: u16, params: &HashMap<String, String>, body: &[u8]) -> Result<FastCgiResponse, TqError> {
        let child = self.acquire_idle().await?;

        let mut stream = TcpStream::connect(("127.0.0.1", child.listen_port))
            .await
            .map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("pool '{}' could not dial child on port {}: {}", self.config.worker_name, child.listen_port, e)))?;

        let result = send_request(&mut stream, request_id, params, body, false).await;

        let served = child.requests_served.fetch_add(1, Ordering::SeqCst) + 1;
        *child.last_active.lock().await = std::time::Instant::now();

        if self.config.max_requests_per_child > 0 && served >= self.config.max_requests_per_child {
            trace(format!("pool '{}' child on port {} reached {} requests, recycling", self.config.worker_name, child.listen_port, served));
            *child.state.lock().await = ChildState::Terminating;
            self.recycle_child(child, false).await;
        } else {
            *child.state.lock().await = ChildState::Idle;
        }

        result
    }

    /// Tears down one child and, if the pool still wants it replaced, spawns
    /// a fresh one. `crashed` distinguishes a clean request-budget recycle
    /// (`dispatch`) from an actual crash (`health_sweep`): only the latter is
    /// subject to exponential backoff, capped at 30s, and gives up replacing
    /// the child once `crash_policy`'s restart budget for this pool is spent.
    async fn recycle_child(&self, child: Arc<PoolChild>, crashed: bool) {
        if let Err(e) = child.process.graceful_stop(Duration::from_secs(5)).await {
            error(format!("pool '{}' failed to stop recycled child cleanly: {}", self.config.worker_name, e));
        }
        self.port_manager.release(child.listen_port).await;

        {
            let mut children = self.children.lock().await;
            children.retain(|c| !Arc::ptr_eq(c, &child));
        }

        if crashed {
            match self.crash_policy.lock().await.record_crash() {
                Some(delay) => {
                    trace(format!("pool '{}' backing off {:?} before replacing a crashed child", self.config.worker_name, delay));
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error(format!("pool '{}' exceeded its restart budget, not replacing crashed child", self.config.worker_name));
                    return;
                }
            }
        }

        let below_min = self.children.lock().await.len() < self.config.min as usize;
        if matches!(self.config.manager, PoolManagerKind::Static) || below_min {
            match self.spawn_child().await {
                Ok(replacement) => self.children.lock().await.push_back(replacement),
                Err(e) => error(format!("pool '{}' failed to replace recycled child: {}", self.config.worker_name, e)),
            }
        }
    }

    async fn run_control_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    trace(format!("pool '{}' control loop shutting down", self.config.worker_name));
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    self.health_sweep().await;
                    self.idle_timeout_sweep().await;
                }
            }
        }
    }

    /// Every 5s, test-dial each idle child; unreachable ones move to
    /// `crashed` and are replaced (respecting `min`).
    async fn health_sweep(&self) {
        let idle_children: Vec<Arc<PoolChild>> = {
            let children = self.children.lock().await;
            let mut idle = Vec::new();
            for child in children.iter() {
                if *child.state.lock().await == ChildState::Idle {
                    idle.push(child.clone());
                }
            }
            idle
        };

        for child in idle_children {
            if !tcp_health_check(child.listen_port).await {
                warn(format!("pool '{}' child on port {} failed health dial, marking crashed", self.config.worker_name, child.listen_port));
                *child.state.lock().await = ChildState::Crashed;
                self.recycle_child(child, true).await;
            }
        }
    }

    /// Dynamic: terminate the longest-idle child while `idle > min`.
    /// OnDemand: terminate all children after `idleTimeout` of no traffic.
    async fn idle_timeout_sweep(&self) {
        match self.config.manager {
            PoolManagerKind::Dynamic => {
                loop {
                    let candidate = {
                        let children = self.children.lock().await;
                        let mut idle_count = 0usize;
                        for child in children.iter() {
                            if *child.state.lock().await == ChildState::Idle {
                                idle_count += 1;
                            }
                        }
                        if idle_count as u32 <= self.config.min {
                            None
                        } else {
                            let mut oldest: Option<Arc<PoolChild>> = None;
                            let mut oldest_at = std::time::Instant::now();
                            for child in children.iter() {
                                if *child.state.lock().await != ChildState::Idle {
                                    continue;
                                }
                                let last_active = *child.last_active.lock().await;
                                if oldest.is_none() || last_active < oldest_at {
                                    oldest_at = last_active;
                                    oldest = Some(child.clone());
                                }
                            }
                            oldest.filter(|_| oldest_at.elapsed() >= self.config.idle_timeout)
                        }
                    };

                    match candidate {
                        Some(child) => {
                            trace(format!("pool '{}' terminating idle child on port {} (above min)", self.config.worker_name, child.listen_port));
                            self.terminate_child(child).await;
                        }
                        None => break,
                    }
                }
            }
            PoolManagerKind::OnDemand => {
                let children = self.children.lock().await.clone();
                let mut all_idle_long_enough = !children.is_empty();
                for child in &children {
                    if *child.state.lock().await != ChildState::Idle || child.last_active.lock().await.elapsed() < self.config.idle_timeout {
                        all_idle_long_enough = false;
                        break;
                    }
                }
                drop(children);
                if all_idle_long_enough {
                    let all: Vec<Arc<PoolChild>> = self.children.lock().await.drain(..).collect();
                    for child in all {
                        trace(format!("pool '{}' terminating child on port {} after idle timeout (on-demand)", self.config.worker_name, child.listen_port));
                        let _ = child.process.graceful_stop(Duration::from_secs(5)).await;
                        self.port_manager.release(child.listen_port).await;
                    }
                }
            }
            PoolManagerKind::Static => {}
        }
    }

    async fn terminate_child(&self, child: Arc<PoolChild>) {
        let _ = child.process.graceful_stop(Duration::from_secs(5)).await;
        self.port_manager.release(child.listen_port).await;
        self.children.lock().await.retain(|c| !Arc::ptr_eq(c, &child));
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        let children: Vec<Arc<PoolChild>> = self.children.lock().await.drain(..).collect();
        for child in children {
            if let Err(e) = child.process.graceful_stop(Duration::from_secs(5)).await {
                error(format!("pool '{}' failed to stop child on port {} cleanly: {}", self.config.worker_name, child.listen_port, e));
            }
            self.port_manager.release(child.listen_port).await;
        }
    }

    pub async fn child_count(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_manager_kinds() {
        assert_eq!(PoolManagerKind::parse("static"), Some(PoolManagerKind::Static));
        assert_eq!(PoolManagerKind::parse("dynamic"), Some(PoolManagerKind::Dynamic));
        assert_eq!(PoolManagerKind::parse("ondemand"), Some(PoolManagerKind::OnDemand));
        assert_eq!(PoolManagerKind::parse("bogus"), None);
    }
}

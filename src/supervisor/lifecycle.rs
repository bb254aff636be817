use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::build::driver::{self, DriverKind};
use crate::configuration::server_config::ServerConfig;
use crate::configuration::worker_config::WorkerConfig;
use crate::core::operation_mode::OperationMode;
use crate::health::checker::{http_health_check, tcp_health_check, wait_healthy};
use crate::logging::syslog::{error, info, warn};
use crate::network::port_manager::PortManager;
use crate::pool::pool::{Pool, PoolConfig, PoolManagerKind};
use crate::process::child::{ChildProcess, ChildProcessSpec};
use crate::process::env::build_worker_env;
use crate::registry::worker::{Worker, WorkerStatus};

/// A freshly built-and-started worker, plus the operational handle the
/// Supervisor needs to stop it later. `Worker` itself only carries what the
/// HTTP layer reads (route, status, port); the live `ChildProcess` lives
/// here so a routing lookup never has to go near process control.
pub struct SpawnedWorker {
    pub worker: Arc<Worker>,
    pub child: Option<Arc<ChildProcess>>,
}

/// Runs a worker's build driver, then (for `native`) spawns its binary and
/// waits for its health check, or (for `fastcgi-pool`) starts its child
/// pool. A build or health failure leaves the returned `Worker` registered
/// but in `BuildFailed`/`Unhealthy`, rather than propagating an error — a
/// bad worker must not prevent the rest of the fleet from coming up.
pub async fn bring_up(config: WorkerConfig, workers_dir: &Path, server_config: &ServerConfig, port_manager: &'static PortManager, mode: OperationMode, preferred_port: Option<u16>) -> SpawnedWorker {
    let root = workers_dir.join(&config.name);
    let route = config.path.clone();
    let name = config.name.clone();
    let kind = DriverKind::resolve(&config.r#type, config.runtime.get("build_driver").map(|s| s.as_str()));
    let build_command = config.runtime.get("build_command").map(|s| s.as_str());
    let out_path = build_artifact_path(&root, &name);

    let worker = Arc::new(Worker::new(root.clone(), config.clone()));
    worker.state.lock().unwrap().transition(WorkerStatus::Building);

    let build_result = driver::build(kind, &root, &out_path, build_command).await;
    let outcome = match build_result {
        Ok(outcome) => outcome,
        Err(e) => {
            error(format!("worker '{}': build failed: {}", name, e.message));
            let mut state = worker.state.lock().unwrap();
            state.build_error = Some(e.message);
            state.transition(WorkerStatus::BuildFailed);
            return SpawnedWorker { worker, child: None };
        }
    };

    if config.is_fastcgi_pool() {
        return bring_up_pool(worker, &config, &outcome.artifact_path, port_manager).await;
    }

    bring_up_native(worker, &config, &route, &outcome.artifact_path, server_config, port_manager, mode, preferred_port).await
}

async fn bring_up_native(
    worker: Arc<Worker>,
    config: &WorkerConfig,
    route: &str,
    artifact_path: &Path,
    server_config: &ServerConfig,
    port_manager: &'static PortManager,
    mode: OperationMode,
    preferred_port: Option<u16>,
) -> SpawnedWorker {
    worker.state.lock().unwrap().transition(WorkerStatus::Starting);

    let port = match port_manager.acquire(&config.name, preferred_port).await {
        Ok(p) => p,
        Err(e) => {
            error(format!("worker '{}': {}", config.name, e.message));
            let mut state = worker.state.lock().unwrap();
            state.build_error = Some(e.message);
            state.transition(WorkerStatus::BuildFailed);
            return SpawnedWorker { worker, child: None };
        }
    };

    let env = build_worker_env(config, route, port, mode);
    let spec = ChildProcessSpec { name: config.name.clone(), program: artifact_path.to_string_lossy().into_owned(), args: Vec::new(), cwd: worker.root.clone(), env };

    let child = match ChildProcess::spawn(spec).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error(format!("worker '{}': spawn failed: {}", config.name, e.message));
            port_manager.release(port).await;
            let mut state = worker.state.lock().unwrap();
            state.build_error = Some(e.message);
            state.transition(WorkerStatus::BuildFailed);
            return SpawnedWorker { worker, child: None };
        }
    };

    let healthy = wait_healthy(|| http_health_check(port), Duration::from_millis(server_config.port_wait_timeout_ms)).await;

    {
        let mut state = worker.state.lock().unwrap();
        state.port = Some(port);
        state.pid = Some(child.pid());
        state.started_at = Some(chrono::Utc::now());
        state.transition(if healthy { WorkerStatus::Healthy } else { WorkerStatus::Unhealthy });
    }

    if healthy {
        info(format!("worker '{}' healthy on port {}", config.name, port));
    } else {
        warn(format!("worker '{}' did not become healthy within {}ms", config.name, server_config.port_wait_timeout_ms));
    }

    SpawnedWorker { worker, child: Some(child) }
}

async fn bring_up_pool(worker: Arc<Worker>, config: &WorkerConfig, artifact_path: &Path, port_manager: &'static PortManager) -> SpawnedWorker {
    worker.state.lock().unwrap().transition(WorkerStatus::Starting);

    let manager = PoolManagerKind::parse(&config.pool.manager).unwrap_or(PoolManagerKind::Dynamic);
    let pool_config = PoolConfig {
        worker_name: config.name.clone(),
        manager,
        min: config.pool.min_workers,
        max: config.pool.max_workers,
        start_count: config.pool.start_workers,
        max_requests_per_child: config.max_requests,
        idle_timeout: Duration::from_secs(config.pool.idle_timeout_seconds),
        listen_addr: config.fastcgi.listen.clone(),
        executable: "php-cgi".to_string(),
        args: Vec::new(),
        cwd: artifact_path.to_path_buf(),
        env: std::collections::HashMap::new(),
    };

    let pool = match Pool::start(pool_config, port_manager.clone()).await {
        Ok(p) => p,
        Err(e) => {
            error(format!("worker '{}': pool failed to start: {}", config.name, e.message));
            let mut state = worker.state.lock().unwrap();
            state.build_error = Some(e.message);
            state.transition(WorkerStatus::BuildFailed);
            return SpawnedWorker { worker, child: None };
        }
    };

    let rebuilt = Arc::new(Worker::new_with_pool(worker.root.clone(), config.clone(), Some(pool)));
    rebuilt.state.lock().unwrap().started_at = Some(chrono::Utc::now());
    rebuilt.state.lock().unwrap().transition(WorkerStatus::Healthy);

    info(format!("worker '{}' pool started", config.name));
    SpawnedWorker { worker: rebuilt, child: None }
}

/// Every child of a pool dials loopback directly, so pool health lives on
/// the individual `PoolChild`; this is only used by the supervisor's own
/// periodic sweep over `native` workers whose process might be alive but
/// unresponsive.
pub async fn still_healthy_native(port: u16) -> bool {
    http_health_check(port).await
}

pub async fn still_healthy_pool_child(port: u16) -> bool {
    tcp_health_check(port).await
}

fn build_artifact_path(root: &Path, name: &str) -> PathBuf {
    root.join(".tqserver-build").join(name)
}

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::configuration::worker_config::{Timeouts, WorkerConfig};
use crate::pool::pool::Pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerKind {
    Native,
    FastcgiPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Unbuilt,
    Building,
    BuildFailed,
    Starting,
    Healthy,
    Unhealthy,
    Draining,
    Stopped,
}

/// The part of a Worker that is mutated after construction: build outcome,
/// running instance identity, and status. Held behind a single mutex so a
/// reader never observes a half-updated combination (e.g. `port` set but
/// `status` still `Starting`).
pub struct WorkerState {
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub source_digest: String,
    pub artifact_path: Option<PathBuf>,
    pub artifact_mtime: Option<SystemTime>,
    pub status: WorkerStatus,
    pub build_error: Option<String>,
}

impl WorkerState {
    fn new() -> Self {
        WorkerState { port: None, pid: None, started_at: None, source_digest: String::new(), artifact_path: None, artifact_mtime: None, status: WorkerStatus::Unbuilt, build_error: None }
    }

    /// Enforces "port is Some iff status is healthy or draining" and
    /// "build_error is Some iff status is buildFailed" at the single
    /// mutation point every transition goes through.
    pub fn transition(&mut self, status: WorkerStatus) {
        match status {
            WorkerStatus::Healthy | WorkerStatus::Draining => {}
            WorkerStatus::BuildFailed => {
                self.port = None;
            }
            _ => {
                if !matches!(status, WorkerStatus::Healthy | WorkerStatus::Draining) {
                    self.port = None;
                }
            }
        }
        if !matches!(status, WorkerStatus::BuildFailed) {
            self.build_error = None;
        }
        self.status = status;
    }
}

pub struct Worker {
    pub name: String,
    pub route: String,
    pub kind: WorkerKind,
    pub root: PathBuf,
    pub max_requests: u64,
    pub timeouts: Timeouts,
    pub config: WorkerConfig,
    pub pool: Option<Arc<Pool>>,

    pub state: Mutex<WorkerState>,
    pub requests_served: AtomicU64,

    /// Stamped by `Registry::put`/`swap` with a process-wide monotonic
    /// counter so `lookup`'s longest-prefix tie-break can resolve to the
    /// later-registered worker without depending on map iteration order.
    sequence: AtomicU64,
}

impl Worker {
    pub fn new(root: PathBuf, config: WorkerConfig) -> Self {
        Self::new_with_pool(root, config, None)
    }

    /// `fastcgi-pool` workers carry an already-started `Pool`; the pool owns
    /// its own children and ports independently of this worker's own
    /// `state.port` (which stays `None` for pool workers).
    pub fn new_with_pool(root: PathBuf, config: WorkerConfig, pool: Option<Arc<Pool>>) -> Self {
        let kind = if config.is_fastcgi_pool() { WorkerKind::FastcgiPool } else { WorkerKind::Native };
        Worker {
            name: config.name.clone(),
            route: config.path.clone(),
            kind,
            root,
            max_requests: config.max_requests,
            timeouts: config.timeouts.clone(),
            config,
            pool,
            state: Mutex::new(WorkerState::new()),
            requests_served: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Relaxed);
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status(), WorkerStatus::Healthy)
    }

    pub fn port(&self) -> Option<u16> {
        self.state.lock().unwrap().port
    }

    pub fn build_error(&self) -> Option<String> {
        self.state.lock().unwrap().build_error.clone()
    }

    pub fn increment_requests_served(&self) -> u64 {
        self.requests_served.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn should_recycle(&self) -> bool {
        self.max_requests > 0 && self.requests_served() >= self.max_requests
    }
}

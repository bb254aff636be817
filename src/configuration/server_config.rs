use serde::{Deserialize, Serialize};

use crate::core::operation_mode::OperationMode;

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_workers_dir() -> String {
    "./workers".to_string()
}
fn default_port_range_start() -> u16 {
    9000
}
fn default_port_range_end() -> u16 {
    9999
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_shutdown_grace_ms() -> u64 {
    1000
}
fn default_port_wait_timeout_ms() -> u64 {
    5000
}
fn default_restart_period_secs() -> u64 {
    60
}
fn default_max_restarts() -> u32 {
    5
}
fn default_backoff_initial_ms() -> u64 {
    250
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_mode() -> String {
    "dev".to_string()
}

/// Top-level `server.yaml`. Mirrors the table in the "External Interfaces"
/// section: listen address, worker directory, port range, and the various
/// tunables for debounce/restart/shutdown timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_workers_dir")]
    pub workers_dir: String,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_port_wait_timeout_ms")]
    pub port_wait_timeout_ms: u64,
    #[serde(default = "default_restart_period_secs")]
    pub restart_period_secs: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
            workers_dir: default_workers_dir(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            debounce_ms: default_debounce_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            port_wait_timeout_ms: default_port_wait_timeout_ms(),
            restart_period_secs: default_restart_period_secs(),
            max_restarts: default_max_restarts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_ms: default_backoff_max_ms(),
            mode: default_mode(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.listen.trim().is_empty() {
            errors.push("listen address cannot be empty".to_string());
        }
        if self.workers_dir.trim().is_empty() {
            errors.push("workers_dir cannot be empty".to_string());
        }
        if self.port_range_end <= self.port_range_start {
            errors.push(format!("port_range_end ({}) must be greater than port_range_start ({})", self.port_range_end, self.port_range_start));
        }
        if OperationMode::parse(&self.mode).is_none() {
            errors.push(format!("mode '{}' is not one of dev/prod", self.mode));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn operation_mode(&self) -> OperationMode {
        OperationMode::parse(&self.mode).unwrap_or(OperationMode::Dev)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_true() -> bool {
    true
}
fn default_worker_type() -> String {
    "native".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_idle_timeout_seconds() -> u64 {
    60
}
fn default_pool_manager() -> String {
    "dynamic".to_string()
}
fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    4
}
fn default_pool_start() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_timeout_seconds")]
    pub read_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub write_seconds: u64,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts { read_seconds: default_timeout_seconds(), write_seconds: default_timeout_seconds(), idle_seconds: default_idle_timeout_seconds() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_manager")]
    pub manager: String,
    #[serde(default = "default_pool_min")]
    pub min_workers: u32,
    #[serde(default = "default_pool_max")]
    pub max_workers: u32,
    #[serde(default = "default_pool_start")]
    pub start_workers: u32,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            manager: default_pool_manager(),
            min_workers: default_pool_min(),
            max_workers: default_pool_max(),
            start_workers: default_pool_start(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FastCgiSettings {
    /// TCP address the pool's public FastCGI listener binds, e.g. "127.0.0.1:9100".
    pub listen: Option<String>,
}

/// `<workers_dir>/<name>/worker.yaml`. Every key from the external-interfaces
/// table, plus the `name` the directory it was discovered in gives it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(skip)]
    pub name: String,

    pub path: String,

    #[serde(default = "default_worker_type")]
    pub r#type: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub runtime: HashMap<String, String>,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub max_requests: u64,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub fastcgi: FastCgiSettings,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.path.trim().is_empty() || !self.path.starts_with('/') {
            errors.push(format!("worker '{}': path must be a non-empty absolute prefix", self.name));
        }
        if self.r#type != "native" && self.r#type != "fastcgi-pool" {
            errors.push(format!("worker '{}': type '{}' must be native or fastcgi-pool", self.name, self.r#type));
        }
        if self.r#type == "fastcgi-pool" {
            match self.pool.manager.as_str() {
                "static" | "dynamic" | "ondemand" => {}
                other => errors.push(format!("worker '{}': pool.manager '{}' must be static/dynamic/ondemand", self.name, other)),
            }
            if self.pool.min_workers > self.pool.max_workers {
                errors.push(format!("worker '{}': pool.min_workers ({}) exceeds pool.max_workers ({})", self.name, self.pool.min_workers, self.pool.max_workers));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn is_fastcgi_pool(&self) -> bool {
        self.r#type == "fastcgi-pool"
    }
}

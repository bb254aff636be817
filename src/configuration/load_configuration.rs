use std::path::Path;

use crate::configuration::server_config::ServerConfig;
use crate::configuration::worker_config::WorkerConfig;
use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{ConfigError, TqErrorKind};
use crate::logging::syslog::{info, warn};

/// Loads `server.yaml` at `config_path`, then walks `workers_dir` for one
/// `worker.yaml` per subdirectory. Mirrors the discovery step the startup
/// sequence names without specifying a source.
pub fn discover(config_path: &Path) -> Result<(ServerConfig, Vec<WorkerConfig>), TqError> {
    let server_config = load_server_config(config_path)?;
    let workers = discover_workers(Path::new(&server_config.workers_dir))?;
    Ok((server_config, workers))
}

pub fn load_server_config(config_path: &Path) -> Result<ServerConfig, TqError> {
    if !config_path.exists() {
        info(format!("No server config found at {}, using defaults", config_path.display()));
        let config = ServerConfig::default();
        config.validate().map_err(|errs| TqError::new(TqErrorKind::Config(ConfigError::InvalidInvariant), errs.join("; ")))?;
        return Ok(config);
    }

    let raw = std::fs::read_to_string(config_path).map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("reading {}: {}", config_path.display(), e)))?;

    let config: ServerConfig =
        serde_yaml::from_str(&raw).map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Malformed), format!("parsing {}: {}", config_path.display(), e)))?;

    config.validate().map_err(|errs| TqError::new(TqErrorKind::Config(ConfigError::InvalidInvariant), errs.join("; ")))?;

    Ok(config)
}

pub fn discover_workers(workers_dir: &Path) -> Result<Vec<WorkerConfig>, TqError> {
    let mut workers = Vec::new();

    if !workers_dir.exists() {
        warn(format!("Workers directory {} does not exist, no workers will be loaded", workers_dir.display()));
        return Ok(workers);
    }

    let entries = std::fs::read_dir(workers_dir).map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("reading {}: {}", workers_dir.display(), e)))?;

    for entry in entries {
        let entry = entry.map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("walking {}: {}", workers_dir.display(), e)))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };

        let worker_yaml = path.join("worker.yaml");
        if !worker_yaml.exists() {
            continue;
        }

        let raw = std::fs::read_to_string(&worker_yaml).map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("reading {}: {}", worker_yaml.display(), e)))?;

        let mut worker: WorkerConfig =
            serde_yaml::from_str(&raw).map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Malformed), format!("parsing {}: {}", worker_yaml.display(), e)))?;
        worker.name = name;

        if !worker.enabled {
            info(format!("worker '{}' is disabled, skipping", worker.name));
            continue;
        }

        worker.validate().map_err(|errs| TqError::new(TqErrorKind::Config(ConfigError::InvalidInvariant), errs.join("; ")))?;

        workers.push(worker);
    }

    workers.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_server_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("tqserver_test_missing_server_config.yaml");
        let _ = std::fs::remove_file(&path);
        let config = load_server_config(&path).expect("defaults should validate");
        assert_eq!(config.listen, "0.0.0.0:8080");
    }

    #[test]
    fn discover_workers_skips_disabled_and_dirs_without_worker_yaml() {
        let dir = std::env::temp_dir().join(format!("tqserver_test_workers_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("enabled")).unwrap();
        std::fs::create_dir_all(dir.join("disabled")).unwrap();
        std::fs::create_dir_all(dir.join("empty")).unwrap();

        let mut f = std::fs::File::create(dir.join("enabled/worker.yaml")).unwrap();
        writeln!(f, "path: /api\nenabled: true").unwrap();

        let mut f = std::fs::File::create(dir.join("disabled/worker.yaml")).unwrap();
        writeln!(f, "path: /disabled\nenabled: false").unwrap();

        let workers = discover_workers(&dir).expect("discovery should succeed");
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "enabled");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

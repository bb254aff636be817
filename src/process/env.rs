use std::collections::HashMap;

use crate::configuration::worker_config::WorkerConfig;
use crate::core::operation_mode::OperationMode;

/// Builds the extra environment a worker child is started with, on top of
/// the inherited process environment: `WORKER_PORT`/`WORKER_NAME`/
/// `WORKER_ROUTE`/`WORKER_MODE`, per-worker timeouts, and the `runtime.*`
/// hints from `worker.yaml` passed through as `WORKER_RUNTIME_<KEY>`.
pub fn build_worker_env(config: &WorkerConfig, route: &str, port: u16, mode: OperationMode) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("WORKER_PORT".to_string(), port.to_string());
    env.insert("WORKER_NAME".to_string(), config.name.clone());
    env.insert("WORKER_ROUTE".to_string(), route.to_string());
    env.insert("WORKER_MODE".to_string(), if mode.is_dev() { "dev".to_string() } else { "prod".to_string() });
    env.insert("WORKER_READ_TIMEOUT_SECONDS".to_string(), config.timeouts.read_seconds.to_string());
    env.insert("WORKER_WRITE_TIMEOUT_SECONDS".to_string(), config.timeouts.write_seconds.to_string());
    env.insert("WORKER_IDLE_TIMEOUT_SECONDS".to_string(), config.timeouts.idle_seconds.to_string());

    for (key, value) in &config.runtime {
        env.insert(format!("WORKER_RUNTIME_{}", key.to_ascii_uppercase()), value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> WorkerConfig {
        WorkerConfig {
            name: "blog".to_string(),
            path: "/blog".to_string(),
            r#type: "native".to_string(),
            enabled: true,
            runtime: HashMap::from([("node_env".to_string(), "production".to_string())]),
            timeouts: Default::default(),
            max_requests: 0,
            pool: Default::default(),
            fastcgi: Default::default(),
        }
    }

    #[test]
    fn injects_the_required_variables() {
        let config = sample_config();
        let env = build_worker_env(&config, "/blog", 9123, OperationMode::Dev);

        assert_eq!(env.get("WORKER_PORT").unwrap(), "9123");
        assert_eq!(env.get("WORKER_NAME").unwrap(), "blog");
        assert_eq!(env.get("WORKER_ROUTE").unwrap(), "/blog");
        assert_eq!(env.get("WORKER_MODE").unwrap(), "dev");
        assert_eq!(env.get("WORKER_RUNTIME_NODE_ENV").unwrap(), "production");
    }
}

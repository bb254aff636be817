use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use wildcard::{Wildcard, WildcardBuilder};

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{ConfigError, TqErrorKind};
use crate::logging::syslog::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Source,
    Template,
    Asset,
    Config,
}

#[derive(Debug)]
pub struct WatchEvent {
    pub worker_name: String,
    pub kind: ChangeKind,
}

pub struct WatchTarget {
    pub worker_name: String,
    pub root: PathBuf,
}

pub fn default_ignore_patterns() -> Vec<String> {
    vec![".*".to_string(), "*.o".to_string(), "*.class".to_string(), "*.tmp".to_string(), "*.swp".to_string(), "target".to_string(), "node_modules".to_string(), "__pycache__".to_string()]
}

/// Starts one recursive `notify` watch per target. Returns the watcher
/// (kept alive by the caller for as long as it should keep running) and a
/// channel of debounced `Change(workerName, kind)` events — one per
/// `debounceMs` of quiet per worker, so one noisy worker never delays
/// another's rebuild.
pub fn start(targets: Vec<WatchTarget>, ignore_patterns: &[String], debounce_ms: u64) -> Result<(RecommendedWatcher, mpsc::Receiver<WatchEvent>), TqError> {
    let (raw_tx, mut raw_rx) = mpsc::channel::<PathBuf>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                for path in event.paths {
                    let _ = raw_tx.blocking_send(path);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("failed to create file watcher: {}", e)))?;

    for target in &targets {
        watcher
            .watch(&target.root, RecursiveMode::Recursive)
            .map_err(|e| TqError::new(TqErrorKind::Config(ConfigError::Io), format!("failed to watch {} for worker {}: {}", target.root.display(), target.worker_name, e)))?;
    }

    let ignore: Vec<Wildcard<'static>> = ignore_patterns
        .iter()
        .map(|p| {
            let static_str: &'static str = Box::leak(p.clone().into_boxed_str());
            WildcardBuilder::new(static_str.as_bytes()).case_insensitive(true).build().expect("ignore pattern must compile")
        })
        .collect();

    let (out_tx, out_rx) = mpsc::channel::<WatchEvent>(256);
    let pending: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        while let Some(path) = raw_rx.recv().await {
            let Some(target) = targets.iter().find(|t| path.starts_with(&t.root)) else {
                continue;
            };

            let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
            if ignore.iter().any(|w| w.is_match(file_name.as_bytes())) {
                trace(format!("ignoring change at {} (matches an ignore pattern)", path.display()));
                continue;
            }

            let kind = classify(&path, &target.root);
            debounce_and_emit(pending.clone(), target.worker_name.clone(), kind, debounce_ms, out_tx.clone()).await;
        }
    });

    Ok((watcher, out_rx))
}

fn classify(path: &Path, root: &Path) -> ChangeKind {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let first_component = relative.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned()).unwrap_or_default();

    match first_component.as_str() {
        "public" | "assets" | "static" => ChangeKind::Asset,
        "templates" | "views" => ChangeKind::Template,
        _ => {
            if relative.file_name().and_then(|f| f.to_str()) == Some("worker.yaml") {
                ChangeKind::Config
            } else {
                match relative.extension().and_then(|e| e.to_str()) {
                    Some("yaml") | Some("yml") => ChangeKind::Config,
                    Some("html") | Some("tmpl") | Some("hbs") => ChangeKind::Template,
                    _ => ChangeKind::Source,
                }
            }
        }
    }
}

/// Resets a per-worker debounce timer: cancels the previous pending timer
/// for this worker (if any) and starts a fresh one. Only the last reset
/// within `debounce_ms` survives to emit an event.
async fn debounce_and_emit(pending: Arc<Mutex<HashMap<String, CancellationToken>>>, worker_name: String, kind: ChangeKind, debounce_ms: u64, out_tx: mpsc::Sender<WatchEvent>) {
    let token = {
        let mut map = pending.lock().await;
        if let Some(old) = map.remove(&worker_name) {
            old.cancel();
        }
        let token = CancellationToken::new();
        map.insert(worker_name.clone(), token.clone());
        token
    };

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(debounce_ms)) => {
                let _ = out_tx.send(WatchEvent { worker_name, kind }).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_public_dir_as_asset_and_yaml_as_config() {
        let root = Path::new("/workers/blog");
        assert_eq!(classify(Path::new("/workers/blog/public/style.css"), root), ChangeKind::Asset);
        assert_eq!(classify(Path::new("/workers/blog/worker.yaml"), root), ChangeKind::Config);
        assert_eq!(classify(Path::new("/workers/blog/src/main.rs"), root), ChangeKind::Source);
        assert_eq!(classify(Path::new("/workers/blog/templates/index.html"), root), ChangeKind::Template);
    }

    #[tokio::test]
    async fn only_the_last_reset_within_the_window_emits_an_event() {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (out_tx, mut out_rx) = mpsc::channel(8);

        debounce_and_emit(pending.clone(), "blog".to_string(), ChangeKind::Source, 100, out_tx.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        debounce_and_emit(pending.clone(), "blog".to_string(), ChangeKind::Source, 100, out_tx.clone()).await;

        let event = tokio::time::timeout(Duration::from_secs(1), out_rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.worker_name, "blog");

        let second = tokio::time::timeout(Duration::from_millis(150), out_rx.recv()).await;
        assert!(second.is_err(), "only one event should have been emitted for the coalesced bursts");
    }
}

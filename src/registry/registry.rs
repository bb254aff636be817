use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::registry::worker::{Worker, WorkerStatus};

/// Thread-safe `name -> Worker` map with a `route -> Worker` projection via
/// longest-prefix lookup. Concurrent readers are the common case (every
/// request does a lookup); writers (discovery, swap, delete) are naturally
/// serialized by the Supervisor's single event loop, but `Registry` itself
/// makes no assumption about that — every operation here is safe to call
/// from multiple tasks directly.
///
/// `swap` and `delete` replace or remove a whole `Arc<Worker>` in one
/// `DashMap` operation, so a concurrent `lookup` sees either the old worker
/// or the new one, never a hybrid.
pub struct Registry {
    by_name: DashMap<String, Arc<Worker>>,
    next_sequence: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry { by_name: DashMap::new(), next_sequence: AtomicU64::new(0) }
    }

    pub fn put(&self, worker: Arc<Worker>) {
        worker.set_sequence(self.next_sequence.fetch_add(1, Ordering::Relaxed));
        self.by_name.insert(worker.name.clone(), worker);
    }

    /// Atomic replace-by-name: the old and new Worker are both addressable
    /// under `worker.name` only ever one at a time.
    pub fn swap(&self, name: &str, new_worker: Arc<Worker>) {
        new_worker.set_sequence(self.next_sequence.fetch_add(1, Ordering::Relaxed));
        self.by_name.insert(name.to_string(), new_worker);
    }

    pub fn delete(&self, name: &str) -> Option<Arc<Worker>> {
        self.by_name.remove(name).map(|(_, w)| w)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Worker>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Longest-prefix match over `route`; ties resolve to the later-
    /// registered worker, per each worker's `sequence` stamped by
    /// `put`/`swap` (`DashMap::iter()` order reflects hash-bucket
    /// placement, not insertion order, so it cannot be used for this). A
    /// draining worker is never returned.
    pub fn lookup(&self, path: &str) -> Option<Arc<Worker>> {
        let mut best: Option<Arc<Worker>> = None;
        let mut best_len = -1isize;
        let mut best_seq = 0u64;

        for entry in self.by_name.iter() {
            let worker = entry.value();
            if matches!(worker.status(), WorkerStatus::Draining) {
                continue;
            }
            if !route_matches(&worker.route, path) {
                continue;
            }
            let len = worker.route.len() as isize;
            let seq = worker.sequence();
            if len > best_len || (len == best_len && best.is_some() && seq > best_seq) {
                best_len = len;
                best_seq = seq;
                best = Some(worker.clone());
            }
        }

        best
    }
}

/// `/` matches anything with no deeper match; any other route matches when
/// `path` equals it or continues with `/`.
fn route_matches(route: &str, path: &str) -> bool {
    if route == "/" {
        return true;
    }
    path == route || path.starts_with(&format!("{}/", route))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::worker_config::WorkerConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn make_worker(name: &str, route: &str) -> Arc<Worker> {
        let config = WorkerConfig {
            name: name.to_string(),
            path: route.to_string(),
            r#type: "native".to_string(),
            enabled: true,
            runtime: HashMap::new(),
            timeouts: Default::default(),
            max_requests: 0,
            pool: Default::default(),
            fastcgi: Default::default(),
        };
        Arc::new(Worker::new(PathBuf::from("/tmp"), config))
    }

    #[test]
    fn longest_prefix_wins() {
        let registry = Registry::new();
        registry.put(make_worker("root", "/"));
        registry.put(make_worker("api", "/api"));
        registry.put(make_worker("api-v2", "/api/v2"));

        assert_eq!(registry.lookup("/api/v2/x").unwrap().name, "api-v2");
        assert_eq!(registry.lookup("/api/x").unwrap().name, "api");
        assert_eq!(registry.lookup("/x").unwrap().name, "root");
    }

    #[test]
    fn draining_worker_is_not_returned() {
        let registry = Registry::new();
        let worker = make_worker("api", "/api");
        worker.state.lock().unwrap().transition(WorkerStatus::Draining);
        registry.put(worker);

        assert!(registry.lookup("/api/x").is_none());
    }

    #[test]
    fn swap_replaces_atomically_by_name() {
        let registry = Registry::new();
        registry.put(make_worker("api", "/api"));
        let before = registry.get_by_name("api").unwrap();

        let replacement = make_worker("api", "/api");
        registry.swap("api", replacement.clone());

        let after = registry.get_by_name("api").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &replacement));
    }

    #[test]
    fn tie_resolves_to_later_registered() {
        let registry = Registry::new();
        registry.put(make_worker("api-old", "/api"));
        registry.put(make_worker("api-new", "/api"));

        assert_eq!(registry.lookup("/api/x").unwrap().name, "api-new");
    }

    #[test]
    fn delete_removes_worker() {
        let registry = Registry::new();
        registry.put(make_worker("api", "/api"));
        assert!(registry.delete("api").is_some());
        assert!(registry.get_by_name("api").is_none());
        assert!(registry.lookup("/api/x").is_none());
    }
}

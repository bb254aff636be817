use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::TqErrorKind;
use crate::logging::syslog::{trace, warn};

static PORT_MANAGER_SINGLETON: OnceLock<PortManager> = OnceLock::new();

pub fn init_port_manager(start_port: u16, end_port: u16) -> &'static PortManager {
    PORT_MANAGER_SINGLETON.get_or_init(|| PortManager::new(start_port, end_port))
}

pub fn get_port_manager() -> &'static PortManager {
    PORT_MANAGER_SINGLETON.get().expect("PortManager accessed before init_port_manager")
}

/// Bounded allocator over `[start_port, end_port]`. Thread-safe; tracks
/// disjoint `free`/`allocated` sets so `|free| + |allocated|` always equals
/// the configured range size.
#[derive(Clone)]
pub struct PortManager {
    inner: Arc<Mutex<PortManagerInner>>,
}

struct PortManagerInner {
    free: HashSet<u16>,
    allocated: HashMap<u16, String>,
}

impl PortManager {
    pub fn new(start_port: u16, end_port: u16) -> Self {
        let free = (start_port..=end_port).collect();
        PortManager { inner: Arc::new(Mutex::new(PortManagerInner { free, allocated: HashMap::new() })) }
    }

    /// "Smart" allocation: tries `preferred` first (the worker's previous
    /// port) if it is still free, to reduce churn in monitoring.
    pub async fn acquire(&self, owner_id: &str, preferred: Option<u16>) -> Result<u16, TqError> {
        let mut inner = self.inner.lock().await;

        let port = if let Some(p) = preferred {
            if inner.free.remove(&p) { Some(p) } else { None }
        } else {
            None
        };

        let port = match port {
            Some(p) => p,
            None => {
                let candidate = inner.free.iter().copied().min();
                match candidate {
                    Some(p) => {
                        inner.free.remove(&p);
                        p
                    }
                    None => {
                        warn(format!("Port pool exhausted, could not allocate a port for '{}'", owner_id));
                        return Err(TqError::new(TqErrorKind::PortExhausted, format!("no free ports for '{}'", owner_id)));
                    }
                }
            }
        };

        inner.allocated.insert(port, owner_id.to_string());
        trace(format!("Allocated port {} to '{}'", port, owner_id));
        Ok(port)
    }

    /// Releasing an unallocated port is a no-op.
    pub async fn release(&self, port: u16) {
        let mut inner = self.inner.lock().await;
        if let Some(owner) = inner.allocated.remove(&port) {
            inner.free.insert(port);
            trace(format!("Released port {} from '{}'", port, owner));
        }
    }

    pub async fn is_free(&self, port: u16) -> bool {
        self.inner.lock().await.free.contains(&port)
    }

    pub async fn free_count(&self) -> usize {
        self.inner.lock().await.free.len()
    }

    pub async fn allocated_count(&self) -> usize {
        self.inner.lock().await.allocated.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_release_roundtrip() {
        let pool = PortManager::new(9000, 9002);
        assert_eq!(pool.free_count().await, 3);

        let p1 = pool.acquire("w1", None).await.unwrap();
        let p2 = pool.acquire("w2", None).await.unwrap();
        let p3 = pool.acquire("w3", None).await.unwrap();
        assert!(pool.acquire("w4", None).await.is_err());

        assert_eq!(pool.free_count().await + pool.allocated_count().await, 3);

        pool.release(p2).await;
        assert!(pool.is_free(p2).await);
        assert_eq!(pool.free_count().await + pool.allocated_count().await, 3);

        let _ = (p1, p3);
    }

    #[tokio::test]
    async fn release_of_unallocated_port_is_noop() {
        let pool = PortManager::new(9000, 9001);
        pool.release(9050).await;
        assert_eq!(pool.free_count().await, 2);
    }

    #[tokio::test]
    async fn smart_allocation_prefers_previous_port() {
        let pool = PortManager::new(9000, 9005);
        let first = pool.acquire("w1", None).await.unwrap();
        pool.release(first).await;

        let reacquired = pool.acquire("w1", Some(first)).await.unwrap();
        assert_eq!(reacquired, first);
    }
}

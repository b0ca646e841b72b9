//! Proxy pool with round-robin and exhaustion-cycle random rotation.
//!
//! The pool is loaded from a newline-delimited file once at startup. Readers
//! share an `Arc` snapshot; [`ProxyManager::reload`] swaps in a fresh snapshot,
//! which also resets the rotation cursor and the used-set.

mod endpoint;

pub use endpoint::{
    parse_proxy_list, ProxyCredentials, ProxyEndpoint, ProxyParseError, RotationStrategy,
};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::Rng;
use tracing::{info, warn};

struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    cursor: AtomicUsize,
    used: Mutex<HashSet<usize>>,
    warned_empty: AtomicBool,
}

impl ProxyPool {
    fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            used: Mutex::new(HashSet::new()),
            warned_empty: AtomicBool::new(false),
        }
    }

    fn warn_if_empty(&self) -> bool {
        if !self.endpoints.is_empty() {
            return false;
        }
        if !self.warned_empty.swap(true, Ordering::Relaxed) {
            warn!("Proxy pool is empty, requests go out over the direct connection");
        }
        true
    }
}

/// Owned, injectable proxy pool.
pub struct ProxyManager {
    path: Option<PathBuf>,
    pool: RwLock<Arc<ProxyPool>>,
    /// Bumped on every replacement.
    generation: AtomicU64,
}

impl ProxyManager {
    /// A manager without proxies (direct connections).
    pub fn empty() -> Self {
        Self::from_endpoints(Vec::new())
    }

    pub fn from_endpoints(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            path: None,
            pool: RwLock::new(Arc::new(ProxyPool::new(endpoints))),
            generation: AtomicU64::new(0),
        }
    }

    /// Load the pool from a file. A missing or unreadable file gives an
    /// empty pool instead of an error.
    pub fn load(path: &Path) -> Self {
        let endpoints = read_proxy_file(path);
        Self {
            path: Some(path.to_path_buf()),
            pool: RwLock::new(Arc::new(ProxyPool::new(endpoints))),
            generation: AtomicU64::new(0),
        }
    }

    /// Re-read the backing file and atomically replace the pool.
    pub fn reload(&self) {
        let endpoints = match &self.path {
            Some(path) => read_proxy_file(path),
            None => self.snapshot().endpoints.clone(),
        };
        self.replace(endpoints);
    }

    /// Atomically replace the pool and reset rotation state.
    pub fn replace(&self, endpoints: Vec<ProxyEndpoint>) {
        let pool = Arc::new(ProxyPool::new(endpoints));
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = pool;
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Number of times the pool has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Arc<ProxyPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.snapshot().endpoints.clone()
    }

    /// Next proxy in round-robin order; `None` means connect directly.
    pub fn next(&self) -> Option<ProxyEndpoint> {
        let pool = self.snapshot();
        if pool.warn_if_empty() {
            return None;
        }
        let idx = pool.cursor.fetch_add(1, Ordering::Relaxed) % pool.endpoints.len();
        Some(pool.endpoints[idx].clone())
    }

    /// A random proxy not yet handed out in the current cycle. Once every
    /// proxy has been dispatched the cycle starts over.
    pub fn random(&self) -> Option<ProxyEndpoint> {
        let pool = self.snapshot();
        if pool.warn_if_empty() {
            return None;
        }

        let mut used = pool.used.lock().unwrap_or_else(PoisonError::into_inner);
        if used.len() >= pool.endpoints.len() {
            used.clear();
        }
        let unused: Vec<usize> = (0..pool.endpoints.len())
            .filter(|idx| !used.contains(idx))
            .collect();
        let idx = unused[rand::rng().random_range(0..unused.len())];
        used.insert(idx);
        Some(pool.endpoints[idx].clone())
    }

    /// Dispatch according to a rotation strategy.
    pub fn pick(&self, strategy: RotationStrategy) -> Option<ProxyEndpoint> {
        match strategy {
            RotationStrategy::Sequential => self.next(),
            RotationStrategy::Random => self.random(),
        }
    }
}

fn read_proxy_file(path: &Path) -> Vec<ProxyEndpoint> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not read proxy file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let (proxies, invalid) = parse_proxy_list(&text);
    for (line, error) in &invalid {
        warn!("{}:{}: skipping proxy entry: {}", path.display(), line, error);
    }
    info!("Loaded {} proxies from {}", proxies.len(), path.display());
    proxies
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn pool(n: u16) -> ProxyManager {
        ProxyManager::from_endpoints(
            (1..=n)
                .map(|i| ProxyEndpoint::new(format!("10.0.0.{}", i), 8000 + i))
                .collect(),
        )
    }

    #[test]
    fn test_next_is_round_robin() {
        let manager = pool(3);
        let ports: Vec<u16> = (0..4).filter_map(|_| manager.next()).map(|p| p.port).collect();
        assert_eq!(ports, vec![8001, 8002, 8003, 8001]);
    }

    #[test]
    fn test_random_exhausts_pool_before_repeating() {
        let manager = pool(4);
        let first: HashSet<u16> = (0..4).filter_map(|_| manager.random()).map(|p| p.port).collect();
        assert_eq!(first.len(), 4);

        let second: HashSet<u16> = (0..4).filter_map(|_| manager.random()).map(|p| p.port).collect();
        assert_eq!(second.len(), 4);
    }

    #[test]
    fn test_empty_pool_means_direct() {
        let manager = ProxyManager::empty();
        assert!(manager.next().is_none());
        assert!(manager.random().is_none());
        assert!(manager.pick(RotationStrategy::Random).is_none());
    }

    #[test]
    fn test_missing_file_gives_empty_pool() {
        let manager = ProxyManager::load(Path::new("/nonexistent/proxies.txt"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_reload_replaces_pool_and_resets_cursor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# first\n10.0.0.1:8080\n10.0.0.2:8080").unwrap();

        let manager = ProxyManager::load(file.path());
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.next().unwrap().host, "10.0.0.1");
        assert_eq!(manager.generation(), 0);

        std::fs::write(file.path(), "u:p:10.0.0.9:3128\n").unwrap();
        manager.reload();

        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.len(), 1);
        let proxy = manager.next().unwrap();
        assert_eq!(proxy.url(), "http://u:p@10.0.0.9:3128");
    }
}

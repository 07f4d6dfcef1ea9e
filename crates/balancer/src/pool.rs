//! Healthy-backend tracking and client-affinity selection.

use parking_lot::RwLock;
use tracing::info;

/// 32-bit FNV-1a. The selection contract pins this exact variant: same
/// client id, same healthy set, same backend.
fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The configured backend pool plus the subset currently believed
/// healthy.
///
/// The healthy list is ordered by when each backend (re-)joined; a
/// backend's position only changes when the set itself changes, which is
/// what keeps selection stable between health transitions.
pub struct BackendPool {
    backends: Vec<String>,
    healthy: RwLock<Vec<String>>,
}

impl BackendPool {
    /// Creates a pool over the statically configured backends; all start
    /// out unhealthy until a probe reports otherwise.
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            backends,
            healthy: RwLock::new(Vec::new()),
        }
    }

    /// The full configured pool, healthy or not.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Marks a backend healthy (added if absent) or unhealthy (removed if
    /// present). Idempotent in both directions.
    pub fn set_health(&self, backend: &str, healthy: bool) {
        let mut list = self.healthy.write();
        let present = list.iter().position(|b| b == backend);

        match (healthy, present) {
            (true, None) => {
                list.push(backend.to_string());
                info!(backend, "backend added to healthy pool");
            }
            (false, Some(i)) => {
                list.remove(i);
                info!(backend, "backend removed from healthy pool");
            }
            _ => {}
        }
    }

    /// A copy of the current healthy list; callers can hold or mutate it
    /// without observing or affecting the pool.
    pub fn healthy_snapshot(&self) -> Vec<String> {
        self.healthy.read().clone()
    }

    /// Picks the backend for `client_id`, or `None` when nothing is
    /// healthy.
    pub fn select_backend(&self, client_id: &str) -> Option<String> {
        let list = self.healthy.read();
        if list.is_empty() {
            return None;
        }
        let idx = fnv1a_32(client_id.as_bytes()) as usize % list.len();
        Some(list[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(backends: &[&str]) -> BackendPool {
        let pool = BackendPool::new(backends.iter().map(|b| b.to_string()).collect());
        for backend in backends {
            pool.set_health(backend, true);
        }
        pool
    }

    #[test]
    fn fnv1a_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn health_updates_are_idempotent() {
        let pool = BackendPool::new(vec![]);

        pool.set_health("server1:8080", true);
        pool.set_health("server1:8080", true);
        assert_eq!(pool.healthy_snapshot().len(), 1);

        pool.set_health("server2:8080", true);
        assert_eq!(pool.healthy_snapshot().len(), 2);

        pool.set_health("server1:8080", false);
        assert_eq!(pool.healthy_snapshot(), vec!["server2:8080"]);

        // Removing an absent backend is a no-op.
        pool.set_health("server3:8080", false);
        assert_eq!(pool.healthy_snapshot(), vec!["server2:8080"]);
    }

    #[test]
    fn distinct_clients_spread_across_backends() {
        let pool = pool_of(&["server1:8080", "server2:8080", "server3:8080"]);

        let s1 = pool.select_backend("192.168.0.101:12345").unwrap();
        let s2 = pool.select_backend("192.168.0.103:12345").unwrap();
        assert_ne!(s1, s2, "clients with different hashes should spread");

        // And each client sticks to its backend.
        assert_eq!(pool.select_backend("192.168.0.101:12345").unwrap(), s1);
        assert_eq!(pool.select_backend("192.168.0.103:12345").unwrap(), s2);
    }

    #[test]
    fn selection_is_stable_while_set_unchanged() {
        let pool = pool_of(&["server1:8080", "server2:8080", "server3:8080"]);

        let first = pool.select_backend("10.0.0.7:4242").unwrap();
        for _ in 0..10 {
            assert_eq!(pool.select_backend("10.0.0.7:4242").unwrap(), first);
        }
    }

    #[test]
    fn single_backend_receives_everything() {
        let pool = pool_of(&["only:8080"]);

        for client in ["a", "b", "c", "10.1.2.3:999"] {
            assert_eq!(pool.select_backend(client).unwrap(), "only:8080");
        }
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool = BackendPool::new(vec!["server1:8080".to_string()]);
        assert_eq!(pool.select_backend("client"), None);
    }

    #[test]
    fn snapshot_is_isolated_from_the_pool() {
        let pool = pool_of(&["server1:8080"]);

        let mut snapshot = pool.healthy_snapshot();
        snapshot[0] = "fake".to_string();
        snapshot.push("another".to_string());

        assert_eq!(pool.healthy_snapshot(), vec!["server1:8080"]);
    }
}

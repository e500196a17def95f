//! Idempotency guard for named resources.
//!
//! Create and expand requests for the same name must not run concurrently:
//! the second one would race the first to the backend and could provision a
//! duplicate.  [`PendingSet`] records which names have a request in flight.

use dashmap::DashSet;

/// Concurrent set of names with an in-flight request.
#[derive(Debug, Default)]
pub struct PendingSet {
    names: DashSet<String>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` as in flight.  Returns `false` if it already was.
    ///
    /// The check and the insert are a single atomic operation.
    pub fn acquire(&self, name: &str) -> bool {
        self.names.insert(name.to_owned())
    }

    /// Remove `name` unconditionally.
    pub fn release(&self, name: &str) {
        self.names.remove(name);
    }

    /// Acquire `name` and return a guard that releases it on drop, or `None`
    /// if another request holds it.
    pub fn lock(&self, name: &str) -> Option<PendingGuard<'_>> {
        self.acquire(name).then(|| PendingGuard {
            set: self,
            name: name.to_owned(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Releases its name from the [`PendingSet`] when dropped, on success and
/// failure paths alike.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    set: &'a PendingSet,
    name: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.set.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let set = PendingSet::new();
        assert!(set.acquire("pvc-1"));
        assert!(!set.acquire("pvc-1"));
        assert!(set.acquire("pvc-2"));
        set.release("pvc-1");
        assert!(set.acquire("pvc-1"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let set = PendingSet::new();
        {
            let _guard = set.lock("pvc-1").expect("first lock");
            assert!(set.lock("pvc-1").is_none());
            assert!(set.contains("pvc-1"));
        }
        assert!(!set.contains("pvc-1"));
        assert!(set.lock("pvc-1").is_some());
    }

    #[test]
    fn release_of_unknown_name_is_noop() {
        let set = PendingSet::new();
        set.release("never-acquired");
        assert!(!set.contains("never-acquired"));
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        let set = std::sync::Arc::new(PendingSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                std::thread::spawn(move || set.acquire("pvc-race"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}

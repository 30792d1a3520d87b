use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per document name, so re-uploads of the same file run one at a time.
#[derive(Default)]
pub struct SourceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

pub struct SourceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, source: &str) -> SourceGuard {
        // Entries nobody else holds can go.
        self.locks.retain(|_, l| Arc::strong_count(l) > 1);
        let lock = self
            .locks
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SourceGuard {
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_source_waits_other_sources_do_not() {
        let locks = Arc::new(SourceLocks::new());
        let held = locks.acquire("a.pdf").await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b.pdf")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire("a.pdf")).await;
        assert!(same.is_err());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire("a.pdf")).await;
        assert!(again.is_ok());
    }
}

//! DAG wrapper enforcing the per-job node budget.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use parking_lot::Mutex;

use crate::node::{DagNode, DagService, FileReader, NodeError};

/// Counts unique CIDs charged against a budget and fails the job once the
/// budget is exceeded.
///
/// Charging is idempotent per CID, so pre-charging a directory's children at
/// listing time and fetching them later costs the budget once. The counter
/// and seen-set are guarded; the underlying node may parallelize block
/// fetches.
pub struct CountingDag {
    inner: Arc<dyn DagService>,
    limit: i64,
    state: Mutex<CountState>,
}

#[derive(Default)]
struct CountState {
    seen: HashSet<Cid>,
    count: i64,
}

impl CountingDag {
    pub fn new(inner: Arc<dyn DagService>, limit: i64) -> CountingDag {
        CountingDag { inner, limit, state: Mutex::new(CountState::default()) }
    }

    /// Charge one CID against the budget.
    pub fn charge(&self, cid: &Cid) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if state.seen.insert(*cid) {
            state.count += 1;
            if self.limit > 0 && state.count > self.limit {
                return Err(NodeError::LimitExceeded { limit: "max_dag_nodes" });
            }
        }
        Ok(())
    }

    /// Unique CIDs charged so far.
    pub fn count(&self) -> i64 {
        self.state.lock().count
    }
}

#[async_trait]
impl DagService for CountingDag {
    async fn get(&self, cid: &Cid) -> Result<DagNode, NodeError> {
        self.charge(cid)?;
        self.inner.get(cid).await
    }

    async fn open_file(&self, cid: &Cid) -> Result<FileReader, NodeError> {
        self.inner.open_file(cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::memory::MemoryDag;

    #[tokio::test]
    async fn counts_unique_cids_once() {
        let dag = Arc::new(MemoryDag::new());
        let a = dag.add_file(b"a");
        let b = dag.add_file(b"b");
        let counting = CountingDag::new(dag, 10);

        counting.get(&a).await.unwrap();
        counting.get(&a).await.unwrap();
        counting.get(&b).await.unwrap();
        assert_eq!(counting.count(), 2);
    }

    #[tokio::test]
    async fn exceeding_the_budget_fails_with_a_limit_error() {
        let dag = Arc::new(MemoryDag::new());
        let a = dag.add_file(b"a");
        let b = dag.add_file(b"b");
        let c = dag.add_file(b"c");
        let counting = CountingDag::new(dag, 2);

        counting.get(&a).await.unwrap();
        counting.get(&b).await.unwrap();
        let err = counting.get(&c).await.unwrap_err();
        assert!(err.is_limit());

        // Already-charged CIDs stay reachable.
        counting.get(&a).await.unwrap();
    }

    #[tokio::test]
    async fn zero_limit_disables_the_budget() {
        let dag = Arc::new(MemoryDag::new());
        let counting = CountingDag::new(Arc::clone(&dag) as Arc<dyn DagService>, 0);
        for i in 0..100u8 {
            let cid = dag.add_file(&[i]);
            counting.get(&cid).await.unwrap();
        }
        assert_eq!(counting.count(), 100);
    }
}

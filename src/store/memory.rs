use super::StateStore;
use crate::error::StoreError;
use crate::state::StateRecord;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Process-local store, for tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    record: Mutex<StateRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::with_record(StateRecord::initial())
    }

    pub fn with_record(record: StateRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    /// Snapshot without going through the async trait
    pub fn snapshot(&self) -> StateRecord {
        self.record.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self) -> Result<StateRecord, StoreError> {
        Ok(self.record.lock().clone())
    }

    async fn compare_and_swap(
        &self,
        expected: &StateRecord,
        mut next: StateRecord,
    ) -> Result<bool, StoreError> {
        let mut current = self.record.lock();
        if current.revision != expected.revision {
            return Ok(false);
        }
        next.revision = expected.revision + 1;
        *current = next;
        Ok(true)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

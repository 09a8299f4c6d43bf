//! 内存存储（测试与一次性运行）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{RunStore, StoreError};
use crate::workflow::{RunState, StateUpdate, ThreadId};

struct Entry {
    initial: RunState,
    current: RunState,
    updates: Vec<StateUpdate>,
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<ThreadId, Entry>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, state: &RunState) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&state.thread_id) {
            return Err(StoreError::AlreadyExists(state.thread_id.clone()));
        }
        runs.insert(
            state.thread_id.clone(),
            Entry {
                initial: state.clone(),
                current: state.clone(),
                updates: Vec::new(),
            },
        );
        Ok(())
    }

    async fn save(&self, state: &RunState) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(&state.thread_id)
            .ok_or_else(|| StoreError::NotFound(state.thread_id.clone()))?;
        entry.current = state.clone();
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, StoreError> {
        Ok(self.runs.read().await.get(thread_id).map(|e| e.current.clone()))
    }

    async fn initial(&self, thread_id: &str) -> Result<Option<RunState>, StoreError> {
        Ok(self.runs.read().await.get(thread_id).map(|e| e.initial.clone()))
    }

    async fn append_update(&self, thread_id: &str, update: &StateUpdate) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        entry.updates.push(update.clone());
        Ok(())
    }

    async fn updates(&self, thread_id: &str) -> Result<Vec<StateUpdate>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .get(thread_id)
            .map(|e| e.updates.clone())
            .unwrap_or_default())
    }

    async fn awaiting_review(&self) -> Result<Vec<ThreadId>, StoreError> {
        let mut ids: Vec<ThreadId> = self
            .runs
            .read()
            .await
            .values()
            .filter(|e| e.current.is_awaiting_review())
            .map(|e| e.current.thread_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

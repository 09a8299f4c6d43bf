//! 运行状态存储抽象层
//!
//! 审阅挂起的运行必须能跨进程重启恢复，因此 RunState 与更新日志都经由 RunStore 持久化；
//! 提供内存与 SQLite 两种实现。

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreSection};
use crate::workflow::{RunState, StateUpdate, ThreadId};

pub use memory::MemoryRunStore;
pub use sqlite::SqliteRunStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Run already exists: {0}")]
    AlreadyExists(ThreadId),
    #[error("Run not found: {0}")]
    NotFound(ThreadId),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Blocking store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 运行状态存储接口
#[async_trait]
pub trait RunStore: Send + Sync {
    /// 登记新运行（同时记下初始状态供重放）
    async fn create(&self, state: &RunState) -> Result<(), StoreError>;

    /// 覆盖保存最新快照
    async fn save(&self, state: &RunState) -> Result<(), StoreError>;

    /// 读取最新快照
    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, StoreError>;

    /// 读取初始状态
    async fn initial(&self, thread_id: &str) -> Result<Option<RunState>, StoreError>;

    /// 追加一条更新到日志
    async fn append_update(&self, thread_id: &str, update: &StateUpdate) -> Result<(), StoreError>;

    /// 按顺序读取更新日志
    async fn updates(&self, thread_id: &str) -> Result<Vec<StateUpdate>, StoreError>;

    /// 所有等待审阅的运行
    async fn awaiting_review(&self) -> Result<Vec<ThreadId>, StoreError>;
}

/// 按配置创建存储
pub fn create_run_store(cfg: &StoreSection) -> Result<Arc<dyn RunStore>, StoreError> {
    match cfg.backend {
        StoreBackend::Sqlite => {
            let store = SqliteRunStore::open(&cfg.path)?;
            tracing::info!(path = %cfg.path.display(), "Using SQLite run store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::info!("Using in-memory run store");
            Ok(Arc::new(MemoryRunStore::new()))
        }
    }
}

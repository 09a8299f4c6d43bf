//! SQLite 持久化存储
//!
//! runs 表保存初始状态与最新快照（JSON），run_updates 表按顺序保存更新日志；
//! 服务重启后，挂起等待审阅的运行可直接从快照恢复。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{RunStore, StoreError};
use crate::workflow::{RunState, StateUpdate, ThreadId};

/// 同步的 rusqlite 调用都放进 spawn_blocking，不占用 async 工作线程
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                thread_id TEXT PRIMARY KEY,
                initial_state TEXT NOT NULL,
                state TEXT NOT NULL,
                awaiting_review INTEGER NOT NULL DEFAULT 0,
                outcome TEXT,
                created_at INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES runs(thread_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_run_updates_thread ON run_updates(thread_id);
            CREATE INDEX IF NOT EXISTS idx_runs_awaiting ON runs(awaiting_review);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在 spawn_blocking 中持锁执行一次数据库操作
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            op(&guard)
        })
        .await?
    }

    async fn load_column(&self, column: &'static str, thread_id: &str) -> Result<Option<RunState>, StoreError> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    &format!("SELECT {column} FROM runs WHERE thread_id = ?1"),
                    params![thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create(&self, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let thread_id = state.thread_id.clone();
        let awaiting = state.is_awaiting_review();
        let created_at = state.created_at;
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO runs (thread_id, initial_state, state, awaiting_review, outcome, created_at, updated_at)
                 VALUES (?1, ?2, ?2, ?3, NULL, ?4, ?5)",
                params![thread_id, json, awaiting, created_at, now()],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(thread_id));
            }
            Ok(())
        })
        .await
    }

    async fn save(&self, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let thread_id = state.thread_id.clone();
        let awaiting = state.is_awaiting_review();
        let outcome = state.outcome.map(|o| o.to_string());
        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE runs SET state = ?2, awaiting_review = ?3, outcome = ?4, updated_at = ?5
                 WHERE thread_id = ?1",
                params![thread_id, json, awaiting, outcome, now()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(thread_id));
            }
            Ok(())
        })
        .await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, StoreError> {
        self.load_column("state", thread_id).await
    }

    async fn initial(&self, thread_id: &str) -> Result<Option<RunState>, StoreError> {
        self.load_column("initial_state", thread_id).await
    }

    async fn append_update(&self, thread_id: &str, update: &StateUpdate) -> Result<(), StoreError> {
        let payload = serde_json::to_string(update)?;
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO run_updates (thread_id, payload, created_at) VALUES (?1, ?2, ?3)",
                params![thread_id, payload, now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn updates(&self, thread_id: &str) -> Result<Vec<StateUpdate>, StoreError> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT payload FROM run_updates WHERE thread_id = ?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![thread_id], |row| row.get::<_, String>(0))?;
            let mut updates = Vec::new();
            for row in rows {
                updates.push(serde_json::from_str(&row?)?);
            }
            Ok(updates)
        })
        .await
    }

    async fn awaiting_review(&self) -> Result<Vec<ThreadId>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id FROM runs WHERE awaiting_review = 1 ORDER BY thread_id ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }
}

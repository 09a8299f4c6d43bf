//! 工作流类型定义
//!
//! 定义运行状态 RunState、各步骤状态枚举、路由结果与错误分类等核心数据类型。

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// 运行关联键
pub type ThreadId = String;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 步骤标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Research,
    Review,
    Render,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepId::Research => "research",
            StepId::Review => "review",
            StepId::Render => "render",
        };
        f.write_str(s)
    }
}

/// 调研步骤状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Unset,
    Pending,
    Completed,
    Failed,
}

/// 审阅状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Unset,
    Pending,
    Approved,
    Rejected,
}

/// 渲染状态：产物路径只存在于 Completed 中，
/// 因此「有文档路径 ⟺ 渲染已完成」由类型保证
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RenderStatus {
    #[default]
    Unset,
    Pending,
    Completed { path: PathBuf },
    Failed,
}

impl RenderStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RenderStatus::Completed { .. })
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 调研调用失败（网络 / LLM），可重试
    ResearchFailure,
    /// 审阅通道失败，可重试
    ReviewFailure,
    /// 渲染器失败（IO 等），可重试
    RenderFailure,
    /// 文档结构不合法，不可重试
    ValidationError,
    /// 重试耗尽后的终止错误
    MaxRetriesExceeded,
}

impl ErrorKind {
    /// 瞬时错误才消耗重试预算
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ResearchFailure | ErrorKind::ReviewFailure | ErrorKind::RenderFailure
        )
    }

    /// 步骤对应的瞬时错误类型
    pub fn transient_for(step: StepId) -> Self {
        match step {
            StepId::Research => ErrorKind::ResearchFailure,
            StepId::Review => ErrorKind::ReviewFailure,
            StepId::Render => ErrorKind::RenderFailure,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ResearchFailure => "research_failure",
            ErrorKind::ReviewFailure => "review_failure",
            ErrorKind::RenderFailure => "render_failure",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::MaxRetriesExceeded => "max_retries_exceeded",
        };
        f.write_str(s)
    }
}

/// 最近一次错误：记录出错步骤，路由据此决定重入哪一步
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step: StepId,
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(step: StepId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }
}

/// 审阅对象类型（目前只审阅调研结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Research,
}

/// 挂起中的审阅请求（持久化的「等待输入」标记）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub kind: ReviewKind,
    pub content: String,
}

/// 外部审阅者给出的决定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub approved: bool,
    #[serde(default)]
    pub comments: String,
}

impl ReviewDecision {
    pub fn approve(comments: impl Into<String>) -> Self {
        Self {
            approved: true,
            comments: comments.into(),
        }
    }

    pub fn reject(comments: impl Into<String>) -> Self {
        Self {
            approved: false,
            comments: comments.into(),
        }
    }
}

/// 终止结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Rejected => "rejected",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 执行下一步
    Step(StepId),
    /// 挂起，等待外部输入后再由 resume 重入
    Suspend(StepId),
    /// 终止
    Terminal(Outcome),
}

/// 单次运行的完整状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub thread_id: ThreadId,
    /// 只追加，不删除、不重排
    pub messages: Vec<Message>,
    pub research_result: Option<String>,
    pub research_status: StepStatus,
    pub review_status: ReviewStatus,
    pub review_comments: Option<String>,
    /// 审阅驳回后回到调研的次数
    #[serde(default)]
    pub review_rounds: u32,
    pub pending_review: Option<ReviewRequest>,
    pub render_status: RenderStatus,
    pub error: Option<StepError>,
    pub retry_count: u32,
    #[serde(default)]
    pub cancelled: bool,
    pub outcome: Option<Outcome>,
    pub created_at: i64,
}

impl RunState {
    /// 为新查询创建初始状态
    pub fn new(thread_id: impl Into<ThreadId>, query: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: vec![Message::user(query)],
            research_result: None,
            research_status: StepStatus::Unset,
            review_status: ReviewStatus::Unset,
            review_comments: None,
            review_rounds: 0,
            pending_review: None,
            render_status: RenderStatus::Unset,
            error: None,
            retry_count: 0,
            cancelled: false,
            outcome: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 渲染产物路径（仅在渲染完成时存在）
    pub fn document_path(&self) -> Option<&Path> {
        match &self.render_status {
            RenderStatus::Completed { path } => Some(path.as_path()),
            _ => None,
        }
    }

    /// 最近一条用户消息，作为调研查询
    pub fn latest_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn is_awaiting_review(&self) -> bool {
        self.pending_review.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

/// 编排器对外错误
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Run not found: {0}")]
    RunNotFound(ThreadId),
    #[error("Run already exists: {0}")]
    RunAlreadyExists(ThreadId),
    #[error("Run is being driven by another caller: {0}")]
    RunInProgress(ThreadId),
    #[error("Run is awaiting review, submit a decision instead: {0}")]
    AwaitingReview(ThreadId),
    #[error("Run is not awaiting review: {0}")]
    NotAwaitingReview(ThreadId),
    #[error("Run already finished with outcome {outcome}: {thread_id}")]
    AlreadyFinished { thread_id: ThreadId, outcome: Outcome },
    #[error("Router did not settle after {0} transitions")]
    RouteLimitExceeded(usize),
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

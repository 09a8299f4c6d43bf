//! 外部能力：调研（搜索 + 抓取 + 综合）、审阅通道、渲染器
//!
//! 编排核心只通过这里的 trait 调用外部协作者，具体实现可替换（测试中使用脚本化实现）。

pub mod render;
pub mod research;
pub mod review;
pub mod search;

use thiserror::Error;

pub use render::{HtmlRenderer, MarkdownRenderer, RenderCapability, RenderFormat};
pub use research::{ResearchCapability, WebResearcher};
pub use review::{AutoApprove, DeferredReview, ReviewCapability, ReviewOutcome};
pub use search::{DuckDuckGoSearch, SearchHit, WebSearch};

/// 外部能力调用错误：区分结构性错误与瞬时失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// 输入结构不合法，重试无意义
    #[error("Validation error: {0}")]
    Validation(String),
    /// 网络 / IO / 上游服务失败，可重试
    #[error("{0}")]
    Failure(String),
}

impl CapabilityError {
    pub fn failure(msg: impl Into<String>) -> Self {
        CapabilityError::Failure(msg.into())
    }
}

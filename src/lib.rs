//! Dossier - 调研 → 审阅 → 渲染 内容流水线
//!
//! 模块划分：
//! - **capabilities**: 外部能力（Web 搜索与 LLM 综合、审阅通道、Markdown/HTML 渲染）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **document**: 调研结果的文档契约（解析与校验）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **steps**: 步骤适配器，把能力调用翻译成状态更新
//! - **store**: 运行状态与更新日志的持久化（内存 / SQLite）
//! - **workflow**: 运行状态、合并、路由与编排器

pub mod capabilities;
pub mod config;
pub mod document;
pub mod llm;
pub mod observability;
pub mod steps;
pub mod store;
pub mod workflow;

pub use workflow::{Orchestrator, OrchestratorBuilder, RunState, WorkflowError};

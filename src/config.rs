//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DOSSIER__*` 覆盖（双下划线表示嵌套，如 `DOSSIER__WORKFLOW__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::capabilities::RenderFormat;
use crate::workflow::{RejectPolicy, WorkflowPolicy, DEFAULT_MAX_RETRIES, DEFAULT_MAX_REVIEW_ROUNDS};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub research: ResearchSection,
    pub render: RenderSection,
    pub store: StoreSection,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock；除 mock 外都走 OpenAI 兼容端点
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [workflow] 段：是否需要审阅、必需段落、重试上限、驳回策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub review_required: bool,
    pub required_sections: Vec<String>,
    pub max_retries: u32,
    pub on_reject: RejectPolicy,
    pub max_review_rounds: u32,
    /// 需要审阅时是否自动批准（无人值守）
    pub auto_approve: bool,
}

fn default_required_sections() -> Vec<String> {
    vec![
        "Summary".into(),
        "Key Findings".into(),
        "Details".into(),
        "Sources".into(),
    ]
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            review_required: true,
            required_sections: default_required_sections(),
            max_retries: DEFAULT_MAX_RETRIES,
            on_reject: RejectPolicy::Terminate,
            max_review_rounds: DEFAULT_MAX_REVIEW_ROUNDS,
            auto_approve: false,
        }
    }
}

impl WorkflowSection {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            review_required: self.review_required,
            required_sections: self.required_sections.clone(),
            max_retries: self.max_retries,
            on_reject: self.on_reject,
            max_review_rounds: self.max_review_rounds,
        }
    }
}

/// [research] 段：搜索端点、超时、结果数、抓取页数、最大字符数、域名白名单（空表示不限制）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    pub search_url: String,
    pub timeout_secs: u64,
    pub max_results: usize,
    pub fetch_top_n: usize,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 15,
            max_results: 10,
            fetch_top_n: 3,
            max_result_chars: 8000,
            allowed_domains: Vec::new(),
        }
    }
}

/// [render] 段：输出目录与格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub output_dir: PathBuf,
    pub format: RenderFormat,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            format: RenderFormat::Markdown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// [store] 段：运行状态存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("data/runs.db"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 DOSSIER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DOSSIER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DOSSIER")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("workflow.required_sections")
            .with_list_parse_key("research.allowed_domains")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

//! 编排器构建器
//!
//! 流畅 API 组装策略、三个外部能力与存储；`from_config` 按配置装配默认实现。

use std::sync::Arc;

use crate::capabilities::{
    AutoApprove, DeferredReview, DuckDuckGoSearch, HtmlRenderer, MarkdownRenderer, RenderCapability,
    RenderFormat, ResearchCapability, ReviewCapability, WebResearcher,
};
use crate::config::AppConfig;
use crate::llm::create_llm_from_config;
use crate::steps::{RenderStep, ResearchStep, ReviewStep};
use crate::store::{create_run_store, RunStore};
use crate::workflow::engine::Orchestrator;
use crate::workflow::router::WorkflowPolicy;
use crate::workflow::types::WorkflowError;

/// 编排器构建器
#[derive(Default)]
pub struct OrchestratorBuilder {
    policy: WorkflowPolicy,
    research: Option<Arc<dyn ResearchCapability>>,
    review: Option<Arc<dyn ReviewCapability>>,
    renderer: Option<Arc<dyn RenderCapability>>,
    store: Option<Arc<dyn RunStore>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn research(mut self, research: Arc<dyn ResearchCapability>) -> Self {
        self.research = Some(research);
        self
    }

    pub fn review(mut self, review: Arc<dyn ReviewCapability>) -> Self {
        self.review = Some(review);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn RenderCapability>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 按配置装配：DuckDuckGo 搜索 + LLM 综合、人工或自动审阅、Markdown/HTML 渲染、存储后端
    pub fn from_config(config: &AppConfig) -> Result<Self, WorkflowError> {
        let search = DuckDuckGoSearch::new(&config.research)
            .map_err(WorkflowError::InvalidConfiguration)?;
        let llm = create_llm_from_config(&config.llm);
        let policy = config.workflow.policy();
        let researcher = WebResearcher::new(
            Arc::new(search),
            llm,
            config.research.fetch_top_n,
            policy.required_sections.clone(),
        );

        let review: Arc<dyn ReviewCapability> = if config.workflow.auto_approve {
            Arc::new(AutoApprove)
        } else {
            Arc::new(DeferredReview)
        };

        let renderer: Arc<dyn RenderCapability> = match config.render.format {
            RenderFormat::Markdown => Arc::new(MarkdownRenderer::new(&config.render.output_dir)),
            RenderFormat::Html => Arc::new(HtmlRenderer::new(&config.render.output_dir)),
        };

        let store = create_run_store(&config.store)?;

        Ok(Self::new()
            .policy(policy)
            .research(Arc::new(researcher))
            .review(review)
            .renderer(renderer)
            .store(store))
    }

    /// 构建编排器；缺少任一能力即报错
    pub fn build(self) -> Result<Orchestrator, WorkflowError> {
        let missing = |name: &str| WorkflowError::InvalidConfiguration(format!("{name} is required"));
        let research = self.research.ok_or_else(|| missing("research capability"))?;
        let review = self.review.ok_or_else(|| missing("review capability"))?;
        let renderer = self.renderer.ok_or_else(|| missing("renderer"))?;
        let store = self.store.ok_or_else(|| missing("run store"))?;

        if self.policy.max_retries == 0 {
            return Err(WorkflowError::InvalidConfiguration(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let required_sections = self.policy.required_sections.clone();
        Ok(Orchestrator::new(
            self.policy.clone(),
            Arc::new(ResearchStep::new(research)),
            Arc::new(ReviewStep::new(review, self.policy)),
            Arc::new(RenderStep::new(renderer, required_sections)),
            store,
        ))
    }
}

//! 调研能力：搜索 → 抓取前 N 个页面 → 由 LLM 综合为结构化文档 JSON
//!
//! 输出即 RunState.research_result，渲染步骤再按文档契约解析与校验。

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{CapabilityError, SearchHit, WebSearch};
use crate::document::{document_schema_json, SOURCES_SECTION};
use crate::llm::LlmClient;
use crate::workflow::Message;

/// 调研能力：给定查询，返回调研结果文本
#[async_trait]
pub trait ResearchCapability: Send + Sync {
    async fn research(&self, query: &str) -> Result<String, CapabilityError>;
}

/// 基于 Web 搜索 + LLM 综合的调研实现
pub struct WebResearcher {
    search: Arc<dyn WebSearch>,
    llm: Arc<dyn LlmClient>,
    fetch_top_n: usize,
    required_sections: Vec<String>,
}

impl WebResearcher {
    pub fn new(
        search: Arc<dyn WebSearch>,
        llm: Arc<dyn LlmClient>,
        fetch_top_n: usize,
        required_sections: Vec<String>,
    ) -> Self {
        Self {
            search,
            llm,
            fetch_top_n,
            required_sections,
        }
    }

    /// 整理搜索结果与页面正文为调研素材
    async fn gather_findings(&self, hits: &[SearchHit]) -> String {
        let mut findings = String::new();
        for (i, hit) in hits.iter().enumerate() {
            findings.push_str(&format!(
                "TITLE: {}\nURL: {}\nSNIPPET: {}\n",
                hit.title, hit.url, hit.snippet
            ));
            if i < self.fetch_top_n {
                // 单个页面抓取失败不影响整体调研
                match self.search.fetch(&hit.url).await {
                    Ok(text) => findings.push_str(&format!("CONTENT:\n{}\n", text)),
                    Err(e) => tracing::warn!(url = %hit.url, error = %e, "fetch failed, using snippet only"),
                }
            }
            findings.push_str("---\n");
        }
        findings
    }

    fn synthesis_prompt(&self, query: &str, findings: &str) -> String {
        let sections = if self.required_sections.is_empty() {
            "Choose clear section names.".to_string()
        } else {
            format!(
                "The sections object MUST contain exactly these keys, in this order: {}.",
                self.required_sections.join(", ")
            )
        };
        format!(
            r#"You are a research analyst. Write a structured report about the topic below using only the research material provided.

Topic: {query}

Research material:
{findings}

Output a single JSON object and nothing else, matching this JSON Schema:
{schema}

{sections}
Every section value is a string, except "{sources}" which is a list of {{"url", "title", "relevance"}} objects citing the material above."#,
            query = query,
            findings = findings,
            schema = document_schema_json(),
            sections = sections,
            sources = SOURCES_SECTION,
        )
    }
}

#[async_trait]
impl ResearchCapability for WebResearcher {
    async fn research(&self, query: &str) -> Result<String, CapabilityError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CapabilityError::Validation("Empty research query".to_string()));
        }

        let hits = self.search.search(query).await.map_err(CapabilityError::Failure)?;
        if hits.is_empty() {
            return Err(CapabilityError::failure(format!("No search results for: {query}")));
        }

        let findings = self.gather_findings(&hits).await;
        let prompt = self.synthesis_prompt(query, &findings);
        let messages = vec![Message::user(prompt)];
        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| CapabilityError::failure(format!("LLM error: {}", e)))?;

        let (_, _, total_tokens) = self.llm.token_usage();
        tracing::info!(hits = hits.len(), chars = response.len(), total_tokens, "research synthesized");
        if response.trim().is_empty() {
            return Err(CapabilityError::failure("LLM returned an empty report"));
        }
        Ok(response)
    }
}

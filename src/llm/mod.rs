//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::LlmSection;

/// 按配置创建 LLM 客户端：provider = mock 时使用脚本化 Mock，其余走 OpenAI 兼容端点
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "mock" => {
            tracing::info!("Using mock LLM client");
            Arc::new(MockLlmClient::default())
        }
        provider => {
            let api_key = std::env::var(&cfg.api_key_env).ok();
            tracing::info!(provider = %provider, model = %cfg.model, "Using OpenAI-compatible LLM client");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                api_key.as_deref(),
            ))
        }
    }
}

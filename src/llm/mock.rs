//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 若预置了脚本化回复，按顺序弹出；脚本耗尽后，取最后一条 User 消息生成一份最小的合法文档 JSON。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::workflow::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    /// 按顺序返回预置回复
    pub fn scripted(responses: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 最近一次收到的 User 消息
    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok()?.last().cloned()
    }

    fn fallback_document(prompt: &str) -> String {
        let topic = prompt
            .lines()
            .find_map(|l| l.trim().strip_prefix("Topic:"))
            .unwrap_or(prompt)
            .trim();
        serde_json::json!({
            "title": topic,
            "sections": {
                "Summary": format!("Mock summary for {topic}"),
                "Key Findings": "Mock findings",
                "Details": "Mock details",
                "Sources": []
            }
        })
        .to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(no input)".to_string());

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user.clone());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(reply) => reply,
            None => Ok(Self::fallback_document(&last_user)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = MockLlmClient::scripted(vec![Err("down".into()), Ok("second".into())]);
        let msgs = vec![Message::user("hi")];
        assert_eq!(llm.complete(&msgs).await, Err("down".to_string()));
        assert_eq!(llm.complete(&msgs).await, Ok("second".to_string()));
        assert_eq!(llm.last_prompt().as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_fallback_is_a_valid_document() {
        let llm = MockLlmClient::default();
        let out = llm
            .complete(&[Message::user("Write a report.\nTopic: tokio\nmore")])
            .await
            .unwrap();
        let doc = Document::parse(&out, &["Summary".to_string(), "Sources".to_string()]).unwrap();
        assert_eq!(doc.title, "tokio");
    }
}

//! 调研步骤

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{CapabilityError, ResearchCapability};
use crate::steps::{transient_failure, validation_failure, StepAdapter};
use crate::workflow::{Message, RunState, StateUpdate, StepId, StepStatus};

/// 摘要消息中预览的最大字符数
const SUMMARY_PREVIEW_CHARS: usize = 200;

pub struct ResearchStep {
    capability: Arc<dyn ResearchCapability>,
}

impl ResearchStep {
    pub fn new(capability: Arc<dyn ResearchCapability>) -> Self {
        Self { capability }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > SUMMARY_PREVIEW_CHARS {
        text.chars().take(SUMMARY_PREVIEW_CHARS).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[async_trait]
impl StepAdapter for ResearchStep {
    fn id(&self) -> StepId {
        StepId::Research
    }

    async fn run(&self, state: &RunState) -> StateUpdate {
        let Some(query) = state.latest_query() else {
            return validation_failure(state, StepId::Research, "No user query in messages")
                .research_status(StepStatus::Failed);
        };

        tracing::info!(thread_id = %state.thread_id, query = %query, "research started");
        match self.capability.research(query).await {
            Ok(result) => {
                let summary = format!(
                    "Research completed ({} chars): {}",
                    result.chars().count(),
                    preview(&result)
                );
                StateUpdate::new()
                    .research(StepStatus::Completed, Some(result))
                    .clear_error()
                    .message(Message::assistant(summary))
            }
            Err(CapabilityError::Validation(msg)) => {
                validation_failure(state, StepId::Research, msg).research_status(StepStatus::Failed)
            }
            Err(CapabilityError::Failure(msg)) => {
                transient_failure(state, StepId::Research, msg).research_status(StepStatus::Failed)
            }
        }
    }
}

//! 渲染步骤：先按文档契约校验调研结果，再调用渲染器

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{CapabilityError, RenderCapability};
use crate::document::Document;
use crate::steps::{transient_failure, validation_failure, StepAdapter};
use crate::workflow::{Message, RenderStatus, RunState, StateUpdate, StepId};

pub struct RenderStep {
    renderer: Arc<dyn RenderCapability>,
    required_sections: Vec<String>,
}

impl RenderStep {
    pub fn new(renderer: Arc<dyn RenderCapability>, required_sections: Vec<String>) -> Self {
        Self {
            renderer,
            required_sections,
        }
    }
}

#[async_trait]
impl StepAdapter for RenderStep {
    fn id(&self) -> StepId {
        StepId::Render
    }

    async fn run(&self, state: &RunState) -> StateUpdate {
        let raw = state.research_result.as_deref().unwrap_or_default();
        let document = match Document::parse(raw, &self.required_sections) {
            Ok(doc) => doc,
            Err(e) => {
                return validation_failure(state, StepId::Render, e.to_string())
                    .render_status(RenderStatus::Failed)
            }
        };

        tracing::info!(
            thread_id = %state.thread_id,
            title = %document.title,
            sections = document.sections.len(),
            "rendering document"
        );
        match self.renderer.render(&document).await {
            Ok(path) => StateUpdate::new()
                .clear_error()
                .message(Message::assistant(format!(
                    "Document generated: {}",
                    path.display()
                )))
                .render_status(RenderStatus::Completed { path }),
            Err(CapabilityError::Validation(msg)) => {
                validation_failure(state, StepId::Render, msg).render_status(RenderStatus::Failed)
            }
            Err(CapabilityError::Failure(msg)) => {
                transient_failure(state, StepId::Render, msg).render_status(RenderStatus::Failed)
            }
        }
    }
}

//! 步骤适配器：把一次外部能力调用翻译成 StateUpdate
//!
//! 适配器从不向外抛错；所有失败都写入 StateUpdate.error，由路由统一决定重试还是终止。

pub mod render;
pub mod research;
pub mod review;

use async_trait::async_trait;

use crate::workflow::{ErrorKind, RunState, StateUpdate, StepError, StepId};

pub use render::RenderStep;
pub use research::ResearchStep;
pub use review::{apply_decision, ReviewStep};

#[async_trait]
pub trait StepAdapter: Send + Sync {
    fn id(&self) -> StepId;

    async fn run(&self, state: &RunState) -> StateUpdate;
}

/// 瞬时失败：重试计数按步骤类型计，换了步骤从 1 重新开始
pub(crate) fn transient_failure(state: &RunState, step: StepId, message: impl Into<String>) -> StateUpdate {
    let retry_count = match &state.error {
        Some(prev) if prev.step == step => state.retry_count + 1,
        _ => 1,
    };
    let message = message.into();
    tracing::warn!(
        thread_id = %state.thread_id,
        step = %step,
        retry_count,
        error = %message,
        "step failed"
    );
    StateUpdate::new()
        .error(StepError::new(step, ErrorKind::transient_for(step), message))
        .retry_count(retry_count)
}

/// 结构性失败：不消耗重试预算
pub(crate) fn validation_failure(state: &RunState, step: StepId, message: impl Into<String>) -> StateUpdate {
    let message = message.into();
    tracing::warn!(
        thread_id = %state.thread_id,
        step = %step,
        error = %message,
        "step input failed validation"
    );
    StateUpdate::new().error(StepError::new(step, ErrorKind::ValidationError, message))
}

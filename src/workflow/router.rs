//! 路由：根据累积状态决定下一步
//!
//! 纯函数，按固定优先级检查：取消 → 错误 → 调研 → 审阅 → 渲染。
//! 每次遍历要么推进某个步骤状态到完成，要么让 retry_count 向上限前进，因此必然终止。

use serde::{Deserialize, Serialize};

use crate::workflow::types::*;

/// 审阅驳回后的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// 驳回即终止
    #[default]
    Terminate,
    /// 以审阅意见作为新输入回到调研
    Revise,
}

/// 工作流策略（由配置构建）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub review_required: bool,
    pub required_sections: Vec<String>,
    pub max_retries: u32,
    pub on_reject: RejectPolicy,
    pub max_review_rounds: u32,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_REVIEW_ROUNDS: u32 = 2;

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            review_required: true,
            required_sections: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            on_reject: RejectPolicy::Terminate,
            max_review_rounds: DEFAULT_MAX_REVIEW_ROUNDS,
        }
    }
}

impl WorkflowPolicy {
    /// 一次运行最多经历的路由次数：
    /// 每轮流水线 3 步、每步最多 max_retries 次尝试，外加驳回后的重来轮次
    pub fn transition_limit(&self) -> usize {
        let per_round = 3 * self.max_retries.max(1) as usize + 1;
        per_round * (self.max_review_rounds as usize + 1) + 1
    }
}

/// 决定下一步
pub fn next_step(state: &RunState, policy: &WorkflowPolicy) -> Route {
    if state.cancelled {
        return Route::Terminal(Outcome::Cancelled);
    }

    if let Some(error) = &state.error {
        if !error.kind.is_retryable() || state.retry_count >= policy.max_retries {
            return Route::Terminal(Outcome::Failed);
        }
        return Route::Step(error.step);
    }

    if state.research_status != StepStatus::Completed {
        return Route::Step(StepId::Research);
    }

    if policy.review_required {
        match state.review_status {
            ReviewStatus::Approved => {}
            ReviewStatus::Pending => return Route::Suspend(StepId::Review),
            ReviewStatus::Rejected => return Route::Terminal(Outcome::Rejected),
            ReviewStatus::Unset => return Route::Step(StepId::Review),
        }
    }

    if !state.render_status.is_completed() {
        return Route::Step(StepId::Render);
    }

    Route::Terminal(Outcome::Completed)
}

//! 审阅步骤
//!
//! 驳回不是错误：按策略要么终止，要么把审阅意见作为新的用户输入回到调研。

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{CapabilityError, ReviewCapability, ReviewOutcome};
use crate::steps::{transient_failure, validation_failure, StepAdapter};
use crate::workflow::{
    Message, RejectPolicy, ReviewDecision, ReviewKind, ReviewRequest, ReviewStatus, Role, RunState,
    StateUpdate, StepId, StepStatus, WorkflowPolicy,
};

pub struct ReviewStep {
    capability: Arc<dyn ReviewCapability>,
    policy: WorkflowPolicy,
}

impl ReviewStep {
    pub fn new(capability: Arc<dyn ReviewCapability>, policy: WorkflowPolicy) -> Self {
        Self { capability, policy }
    }
}

/// 把审阅决定翻译成状态更新
pub fn apply_decision(state: &RunState, decision: &ReviewDecision, policy: &WorkflowPolicy) -> StateUpdate {
    let comments = Some(decision.comments.trim().to_string()).filter(|c| !c.is_empty());
    let base = StateUpdate::new()
        .clear_error()
        .pending_review(None)
        .review_comments(comments.clone());

    if decision.approved {
        tracing::info!(thread_id = %state.thread_id, "review approved");
        let text = match &comments {
            Some(c) => format!("Review approved: {c}"),
            None => "Review approved".to_string(),
        };
        return base
            .review_status(ReviewStatus::Approved)
            .message(Message::assistant(text));
    }

    let can_revise = policy.on_reject == RejectPolicy::Revise
        && state.review_rounds < policy.max_review_rounds;
    if can_revise {
        let original = state
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let feedback = comments.as_deref().unwrap_or("no comments given");
        tracing::info!(
            thread_id = %state.thread_id,
            round = state.review_rounds + 1,
            "review rejected, revising research"
        );
        return base
            .review_status(ReviewStatus::Unset)
            .review_rounds(state.review_rounds + 1)
            .research(StepStatus::Unset, None)
            .message(Message::assistant("Review rejected, revising research"))
            .message(Message::user(format!("{original}\nReviewer feedback: {feedback}")));
    }

    tracing::info!(thread_id = %state.thread_id, "review rejected");
    base.review_status(ReviewStatus::Rejected)
        .message(Message::assistant("Review rejected"))
}

#[async_trait]
impl StepAdapter for ReviewStep {
    fn id(&self) -> StepId {
        StepId::Review
    }

    async fn run(&self, state: &RunState) -> StateUpdate {
        let request = ReviewRequest {
            kind: ReviewKind::Research,
            content: state.research_result.clone().unwrap_or_default(),
        };

        match self.capability.request_review(&state.thread_id, &request).await {
            Ok(ReviewOutcome::Suspend) => StateUpdate::new()
                .clear_error()
                .review_status(ReviewStatus::Pending)
                .pending_review(Some(request))
                .message(Message::assistant("Awaiting review of research results")),
            Ok(ReviewOutcome::Decided(decision)) => apply_decision(state, &decision, &self.policy),
            Err(CapabilityError::Validation(msg)) => validation_failure(state, StepId::Review, msg),
            Err(CapabilityError::Failure(msg)) => transient_failure(state, StepId::Review, msg),
        }
    }
}

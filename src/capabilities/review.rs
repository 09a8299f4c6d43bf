//! 审阅通道
//!
//! 两阶段协议：request_review 要么立即给出决定，要么返回 Suspend，
//! 由编排器持久化「等待审阅」标记后返回；人工决定稍后经 `Orchestrator::resume_review` 送回。

use async_trait::async_trait;

use crate::capabilities::CapabilityError;
use crate::workflow::{ReviewDecision, ReviewRequest, ThreadId};

/// 审阅请求的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// 挂起运行，等待外部决定
    Suspend,
    /// 已有决定
    Decided(ReviewDecision),
}

#[async_trait]
pub trait ReviewCapability: Send + Sync {
    async fn request_review(
        &self,
        thread_id: &ThreadId,
        request: &ReviewRequest,
    ) -> Result<ReviewOutcome, CapabilityError>;
}

/// 人工审阅：只记录通知并挂起
#[derive(Debug, Default)]
pub struct DeferredReview;

#[async_trait]
impl ReviewCapability for DeferredReview {
    async fn request_review(
        &self,
        thread_id: &ThreadId,
        request: &ReviewRequest,
    ) -> Result<ReviewOutcome, CapabilityError> {
        tracing::info!(
            thread_id = %thread_id,
            kind = ?request.kind,
            chars = request.content.len(),
            "review requested, run parked until a decision is submitted"
        );
        Ok(ReviewOutcome::Suspend)
    }
}

/// 无人值守：直接批准
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ReviewCapability for AutoApprove {
    async fn request_review(
        &self,
        thread_id: &ThreadId,
        _request: &ReviewRequest,
    ) -> Result<ReviewOutcome, CapabilityError> {
        tracing::debug!(thread_id = %thread_id, "auto-approving review");
        Ok(ReviewOutcome::Decided(ReviewDecision::approve("auto-approved")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ReviewKind;

    fn request() -> ReviewRequest {
        ReviewRequest {
            kind: ReviewKind::Research,
            content: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_deferred_review_suspends() {
        let out = DeferredReview
            .request_review(&"t1".to_string(), &request())
            .await
            .unwrap();
        assert_eq!(out, ReviewOutcome::Suspend);
    }

    #[tokio::test]
    async fn test_auto_approve_decides() {
        let out = AutoApprove
            .request_review(&"t1".to_string(), &request())
            .await
            .unwrap();
        match out {
            ReviewOutcome::Decided(d) => assert!(d.approved),
            other => panic!("expected decision, got {other:?}"),
        }
    }
}

//! 编排引擎
//!
//! 循环：路由 → 执行步骤 → 合并更新 → 写日志与快照，直到挂起或终止。
//! 同一 thread_id 同一时刻只允许一个调用方推进；取消请求在步骤边界生效。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::steps::{apply_decision, StepAdapter};
use crate::store::{RunStore, StoreError};
use crate::workflow::router::{next_step, WorkflowPolicy};
use crate::workflow::types::*;
use crate::workflow::update::{merge, replay, StateUpdate};

/// 步骤开始前写入日志的 Pending 标记，中断后可从快照看出停在哪一步。
/// 审阅的 Pending 表示「已挂起」，因此不在此标记。
fn started_marker(step: StepId) -> Option<StateUpdate> {
    match step {
        StepId::Research => Some(StateUpdate::new().research_status(StepStatus::Pending)),
        StepId::Render => Some(StateUpdate::new().render_status(RenderStatus::Pending)),
        StepId::Review => None,
    }
}

/// 工作流编排器
pub struct Orchestrator {
    policy: WorkflowPolicy,
    research: Arc<dyn StepAdapter>,
    review: Arc<dyn StepAdapter>,
    render: Arc<dyn StepAdapter>,
    store: Arc<dyn RunStore>,
    /// 正在推进的运行 → 是否已请求取消
    inflight: Mutex<HashMap<ThreadId, bool>>,
}

impl Orchestrator {
    pub fn new(
        policy: WorkflowPolicy,
        research: Arc<dyn StepAdapter>,
        review: Arc<dyn StepAdapter>,
        render: Arc<dyn StepAdapter>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            policy,
            research,
            review,
            render,
            store,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// 以新 thread_id 启动一次运行，返回挂起或终止时的状态
    pub async fn process(&self, query: &str, thread_id: &str) -> Result<RunState, WorkflowError> {
        self.claim(thread_id).await?;
        let result = self.start(query, thread_id).await;
        self.release(thread_id, result).await
    }

    /// 提交审阅决定，继续挂起中的运行
    pub async fn resume_review(
        &self,
        thread_id: &str,
        decision: ReviewDecision,
    ) -> Result<RunState, WorkflowError> {
        self.claim(thread_id).await?;
        let result = self.resume(thread_id, &decision).await;
        self.release(thread_id, result).await
    }

    /// 继续一个中断的运行（进程在某个步骤执行中退出，快照既未终止也未等待审阅）
    pub async fn continue_run(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        self.claim(thread_id).await?;
        let result = self.continue_interrupted(thread_id).await;
        self.release(thread_id, result).await
    }

    /// 取消运行
    ///
    /// 挂起或空闲的运行立即以 Cancelled 终止；正在推进的运行只登记请求，
    /// 在下一个步骤边界终止，此时返回的是登记时的快照。
    pub async fn cancel(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        let in_flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get_mut(thread_id) {
                Some(requested) => {
                    *requested = true;
                    true
                }
                None => {
                    inflight.insert(thread_id.to_string(), false);
                    false
                }
            }
        };

        if in_flight {
            tracing::info!(thread_id = %thread_id, "cancellation requested for in-flight run");
            return self.snapshot(thread_id).await;
        }

        let result = self.cancel_idle(thread_id).await;
        self.release(thread_id, result).await
    }

    /// 最新快照
    pub async fn snapshot(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        self.store
            .load(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(thread_id.to_string()))
    }

    /// 按顺序返回该运行的全部更新
    pub async fn history(&self, thread_id: &str) -> Result<Vec<StateUpdate>, WorkflowError> {
        if self.store.initial(thread_id).await?.is_none() {
            return Err(WorkflowError::RunNotFound(thread_id.to_string()));
        }
        Ok(self.store.updates(thread_id).await?)
    }

    /// 从初始状态重放更新日志
    pub async fn replay_run(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        let initial = self
            .store
            .initial(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(thread_id.to_string()))?;
        let updates = self.store.updates(thread_id).await?;
        Ok(replay(initial, updates))
    }

    /// 所有等待审阅的运行
    pub async fn awaiting_review(&self) -> Result<Vec<ThreadId>, WorkflowError> {
        Ok(self.store.awaiting_review().await?)
    }

    async fn claim(&self, thread_id: &str) -> Result<(), WorkflowError> {
        let mut inflight = self.inflight.lock().await;
        if inflight.contains_key(thread_id) {
            return Err(WorkflowError::RunInProgress(thread_id.to_string()));
        }
        inflight.insert(thread_id.to_string(), false);
        Ok(())
    }

    /// 释放占用；占用期间登记的取消请求在移除条目前处理，不会丢失
    async fn release(
        &self,
        thread_id: &str,
        mut result: Result<RunState, WorkflowError>,
    ) -> Result<RunState, WorkflowError> {
        loop {
            let requested = {
                let mut inflight = self.inflight.lock().await;
                if inflight.get(thread_id).copied().unwrap_or(false) {
                    inflight.insert(thread_id.to_string(), false);
                    true
                } else {
                    inflight.remove(thread_id);
                    false
                }
            };
            if !requested {
                return result;
            }
            result = match result {
                Ok(state) if !state.is_finished() => {
                    tracing::info!(thread_id = %thread_id, "applying cancellation requested during the run");
                    self.apply_cancel(state).await
                }
                other => other,
            };
        }
    }

    async fn cancel_requested(&self, thread_id: &str) -> bool {
        self.inflight
            .lock()
            .await
            .get(thread_id)
            .copied()
            .unwrap_or(false)
    }

    async fn start(&self, query: &str, thread_id: &str) -> Result<RunState, WorkflowError> {
        if self.store.load(thread_id).await?.is_some() {
            return Err(WorkflowError::RunAlreadyExists(thread_id.to_string()));
        }
        let state = RunState::new(thread_id, query);
        self.store.create(&state).await.map_err(|e| match e {
            StoreError::AlreadyExists(id) => WorkflowError::RunAlreadyExists(id),
            other => WorkflowError::Store(other),
        })?;
        tracing::info!(thread_id = %thread_id, "run started");
        self.drive(state).await
    }

    async fn resume(&self, thread_id: &str, decision: &ReviewDecision) -> Result<RunState, WorkflowError> {
        let state = self.snapshot(thread_id).await?;
        if let Some(outcome) = state.outcome {
            return Err(WorkflowError::AlreadyFinished {
                thread_id: thread_id.to_string(),
                outcome,
            });
        }
        if !state.is_awaiting_review() {
            return Err(WorkflowError::NotAwaitingReview(thread_id.to_string()));
        }

        tracing::info!(thread_id = %thread_id, approved = decision.approved, "review decision received");
        let update = apply_decision(&state, decision, &self.policy);
        let state = self.apply(state, update).await?;
        self.drive(state).await
    }

    async fn continue_interrupted(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        let state = self.snapshot(thread_id).await?;
        if let Some(outcome) = state.outcome {
            return Err(WorkflowError::AlreadyFinished {
                thread_id: thread_id.to_string(),
                outcome,
            });
        }
        if state.is_awaiting_review() {
            return Err(WorkflowError::AwaitingReview(thread_id.to_string()));
        }
        tracing::info!(
            thread_id = %thread_id,
            research = ?state.research_status,
            render = ?state.render_status,
            "continuing interrupted run"
        );
        self.drive(state).await
    }

    async fn cancel_idle(&self, thread_id: &str) -> Result<RunState, WorkflowError> {
        let state = self.snapshot(thread_id).await?;
        if let Some(outcome) = state.outcome {
            return Err(WorkflowError::AlreadyFinished {
                thread_id: thread_id.to_string(),
                outcome,
            });
        }
        self.apply_cancel(state).await
    }

    async fn apply_cancel(&self, state: RunState) -> Result<RunState, WorkflowError> {
        let state = self.apply(state, StateUpdate::new().cancelled()).await?;
        self.drive(state).await
    }

    fn adapter(&self, step: StepId) -> &dyn StepAdapter {
        match step {
            StepId::Research => self.research.as_ref(),
            StepId::Review => self.review.as_ref(),
            StepId::Render => self.render.as_ref(),
        }
    }

    /// 先写日志再合并，最后覆盖快照
    async fn apply(&self, state: RunState, update: StateUpdate) -> Result<RunState, WorkflowError> {
        self.store.append_update(&state.thread_id, &update).await?;
        let state = merge(state, update);
        self.store.save(&state).await?;
        Ok(state)
    }

    async fn drive(&self, mut state: RunState) -> Result<RunState, WorkflowError> {
        if state.is_finished() {
            return Ok(state);
        }

        let limit = self.policy.transition_limit();
        for _ in 0..limit {
            if !state.cancelled && self.cancel_requested(&state.thread_id).await {
                state = self.apply(state, StateUpdate::new().cancelled()).await?;
            }

            match next_step(&state, &self.policy) {
                Route::Step(step) => {
                    let adapter = self.adapter(step);
                    if let Some(marker) = started_marker(step) {
                        state = self.apply(state, marker).await?;
                    }
                    tracing::debug!(
                        thread_id = %state.thread_id,
                        step = %adapter.id(),
                        retry_count = state.retry_count,
                        "running step"
                    );
                    let update = adapter.run(&state).await;
                    state = self.apply(state, update).await?;
                }
                Route::Suspend(step) => {
                    tracing::info!(thread_id = %state.thread_id, step = %step, "run suspended");
                    return Ok(state);
                }
                Route::Terminal(outcome) => return self.finalize(state, outcome).await,
            }
        }

        tracing::error!(thread_id = %state.thread_id, limit, "router did not settle");
        Err(WorkflowError::RouteLimitExceeded(limit))
    }

    async fn finalize(&self, state: RunState, outcome: Outcome) -> Result<RunState, WorkflowError> {
        let mut update = StateUpdate::new().outcome(outcome);
        if state.pending_review.is_some() {
            update = update.pending_review(None);
        }
        if outcome == Outcome::Failed {
            if let Some(err) = state.error.as_ref().filter(|e| e.kind.is_retryable()) {
                update = update.error(StepError::new(
                    err.step,
                    ErrorKind::MaxRetriesExceeded,
                    format!("{} (gave up after {} attempts)", err.message, state.retry_count),
                ));
            }
        }

        let state = self.apply(state, update).await?;
        match outcome {
            Outcome::Failed => tracing::error!(
                thread_id = %state.thread_id,
                error = ?state.error,
                retry_count = state.retry_count,
                "run failed"
            ),
            _ => tracing::info!(
                thread_id = %state.thread_id,
                outcome = %outcome,
                document = ?state.document_path(),
                "run finished"
            ),
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        AutoApprove, CapabilityError, DeferredReview, MarkdownRenderer, ResearchCapability,
    };
    use crate::steps::{RenderStep, ResearchStep, ReviewStep};
    use crate::store::MemoryRunStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    const DOC: &str = r#"{"title":"Rust","sections":{"Summary":"s","Sources":[]}}"#;

    struct Scripted(StdMutex<VecDeque<Result<String, CapabilityError>>>);

    impl Scripted {
        fn new(replies: Vec<Result<String, CapabilityError>>) -> Arc<Self> {
            Arc::new(Self(StdMutex::new(replies.into())))
        }
    }

    #[async_trait]
    impl ResearchCapability for Scripted {
        async fn research(&self, _query: &str) -> Result<String, CapabilityError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DOC.to_string()))
        }
    }

    fn policy(review_required: bool) -> WorkflowPolicy {
        WorkflowPolicy {
            review_required,
            required_sections: vec!["Summary".into(), "Sources".into()],
            ..WorkflowPolicy::default()
        }
    }

    fn orchestrator(
        dir: &TempDir,
        policy: WorkflowPolicy,
        research: Arc<Scripted>,
        deferred: bool,
    ) -> Orchestrator {
        let research: Arc<dyn StepAdapter> = Arc::new(ResearchStep::new(research));
        orchestrator_with(dir, policy, research, deferred)
    }

    fn orchestrator_with(
        dir: &TempDir,
        policy: WorkflowPolicy,
        research: Arc<dyn StepAdapter>,
        deferred: bool,
    ) -> Orchestrator {
        let review: Arc<dyn StepAdapter> = if deferred {
            Arc::new(ReviewStep::new(Arc::new(DeferredReview), policy.clone()))
        } else {
            Arc::new(ReviewStep::new(Arc::new(AutoApprove), policy.clone()))
        };
        Orchestrator::new(
            policy.clone(),
            research,
            review,
            Arc::new(RenderStep::new(
                Arc::new(MarkdownRenderer::new(dir.path())),
                policy.required_sections.clone(),
            )),
            Arc::new(MemoryRunStore::new()),
        )
    }

    #[tokio::test]
    async fn test_process_without_review_completes() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(false), Scripted::new(vec![]), false);

        let state = orch.process("rust", "t1").await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Completed));
        assert!(state.document_path().unwrap().exists());
        assert_eq!(state.review_status, ReviewStatus::Unset);
        assert_eq!(orch.replay_run("t1").await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_duplicate_thread_id_rejected() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(false), Scripted::new(vec![]), false);
        orch.process("rust", "t1").await.unwrap();
        assert!(matches!(
            orch.process("again", "t1").await,
            Err(WorkflowError::RunAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let dir = TempDir::new().unwrap();
        let research = Scripted::new(vec![
            Err(CapabilityError::failure("timeout")),
            Err(CapabilityError::failure("timeout")),
            Err(CapabilityError::failure("timeout")),
        ]);
        let orch = orchestrator(&dir, policy(false), research, false);

        let state = orch.process("rust", "t1").await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Failed));
        let err = state.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::MaxRetriesExceeded);
        assert_eq!(err.step, StepId::Research);
        assert_eq!(state.retry_count, 3);
        assert!(state.document_path().is_none());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let dir = TempDir::new().unwrap();
        let research = Scripted::new(vec![Err(CapabilityError::failure("timeout"))]);
        let orch = orchestrator(&dir, policy(false), research, false);

        let state = orch.process("rust", "t1").await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Completed));
        assert_eq!(state.retry_count, 0);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_validation_error_fails_without_retry() {
        let dir = TempDir::new().unwrap();
        let research = Scripted::new(vec![Ok("not json".into())]);
        let orch = orchestrator(&dir, policy(false), research, false);

        let state = orch.process("rust", "t1").await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Failed));
        let err = state.error.unwrap();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.step, StepId::Render);
        assert_eq!(state.retry_count, 0);
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(true), Scripted::new(vec![]), true);

        let state = orch.process("rust", "t1").await.unwrap();
        assert!(state.outcome.is_none());
        assert_eq!(state.review_status, ReviewStatus::Pending);
        assert_eq!(orch.awaiting_review().await.unwrap(), vec!["t1".to_string()]);

        let state = orch
            .resume_review("t1", ReviewDecision::approve("ok"))
            .await
            .unwrap();
        assert_eq!(state.outcome, Some(Outcome::Completed));
        assert!(state.pending_review.is_none());
        assert!(orch.awaiting_review().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_requires_pending_review() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(false), Scripted::new(vec![]), false);
        assert!(matches!(
            orch.resume_review("missing", ReviewDecision::approve("")).await,
            Err(WorkflowError::RunNotFound(_))
        ));
        orch.process("rust", "t1").await.unwrap();
        assert!(matches!(
            orch.resume_review("t1", ReviewDecision::approve("")).await,
            Err(WorkflowError::AlreadyFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_suspended_run() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(true), Scripted::new(vec![]), true);
        orch.process("rust", "t1").await.unwrap();

        let state = orch.cancel("t1").await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Cancelled));
        assert!(state.cancelled);
        assert!(state.pending_review.is_none());
        assert!(matches!(
            orch.cancel("t1").await,
            Err(WorkflowError::AlreadyFinished { outcome: Outcome::Cancelled, .. })
        ));
        assert!(matches!(
            orch.resume_review("t1", ReviewDecision::approve("")).await,
            Err(WorkflowError::AlreadyFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_history_replays_to_snapshot() {
        let dir = TempDir::new().unwrap();
        let research = Scripted::new(vec![Err(CapabilityError::failure("flaky"))]);
        let orch = orchestrator(&dir, policy(true), research, true);
        orch.process("rust", "t1").await.unwrap();
        orch.resume_review("t1", ReviewDecision::approve("")).await.unwrap();

        let history = orch.history("t1").await.unwrap();
        // 开始、失败、开始、成功、挂起、决定、开始、渲染、终止
        assert_eq!(history.len(), 9);
        assert_eq!(history[0].research_status, Some(StepStatus::Pending));
        assert_eq!(
            orch.replay_run("t1").await.unwrap(),
            orch.snapshot("t1").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_cancel_registered_while_claimed_is_applied_on_release() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(true), Scripted::new(vec![]), true);
        let suspended = orch.process("rust", "t1").await.unwrap();
        assert!(suspended.is_awaiting_review());

        // 模拟驱动方已走完路由、尚未释放占用时到达的取消
        orch.claim("t1").await.unwrap();
        let snapshot = orch.cancel("t1").await.unwrap();
        assert!(snapshot.outcome.is_none());

        let state = orch.release("t1", Ok(suspended)).await.unwrap();
        assert_eq!(state.outcome, Some(Outcome::Cancelled));
        assert!(state.pending_review.is_none());
        assert!(orch.inflight.lock().await.is_empty());
        assert_eq!(orch.snapshot("t1").await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_continue_run_refuses_parked_and_finished_runs() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, policy(true), Scripted::new(vec![]), true);
        assert!(matches!(
            orch.continue_run("missing").await,
            Err(WorkflowError::RunNotFound(_))
        ));

        orch.process("rust", "t1").await.unwrap();
        assert!(matches!(
            orch.continue_run("t1").await,
            Err(WorkflowError::AwaitingReview(_))
        ));

        orch.cancel("t1").await.unwrap();
        assert!(matches!(
            orch.continue_run("t1").await,
            Err(WorkflowError::AlreadyFinished { .. })
        ));
    }

    /// 永远不推进状态的步骤
    struct Stalled;

    #[async_trait]
    impl StepAdapter for Stalled {
        fn id(&self) -> StepId {
            StepId::Research
        }

        async fn run(&self, _state: &RunState) -> StateUpdate {
            StateUpdate::new()
        }
    }

    #[tokio::test]
    async fn test_stalled_step_hits_transition_limit() {
        let dir = TempDir::new().unwrap();
        let policy = policy(false);
        let limit = policy.transition_limit();
        let orch = orchestrator_with(&dir, policy, Arc::new(Stalled), false);

        let err = orch.process("rust", "t1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::RouteLimitExceeded(n) if n == limit));

        // 占用已释放，快照停在未完成的调研
        assert!(orch.inflight.lock().await.is_empty());
        let state = orch.snapshot("t1").await.unwrap();
        assert!(state.outcome.is_none());
        assert_eq!(state.research_status, StepStatus::Pending);
    }
}

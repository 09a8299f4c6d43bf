//! 流水线集成测试：通过公开 API 驱动完整运行

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dossier::capabilities::{
    AutoApprove, CapabilityError, DeferredReview, MarkdownRenderer, ResearchCapability,
    ReviewCapability,
};
use dossier::store::{MemoryRunStore, RunStore, SqliteRunStore};
use dossier::workflow::*;
use tempfile::TempDir;
use tokio::sync::Notify;

const DOC: &str = r#"{"title":"Rust async runtimes","sections":{
    "Summary":"Tokio dominates.",
    "Sources":[{"url":"https://tokio.rs","title":"Tokio","relevance":"official site"}]}}"#;

/// 按脚本回复，并记录收到的查询
#[derive(Default)]
struct RecordingResearch {
    replies: Mutex<VecDeque<Result<String, CapabilityError>>>,
    queries: Mutex<Vec<String>>,
}

impl RecordingResearch {
    fn scripted(replies: Vec<Result<String, CapabilityError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchCapability for RecordingResearch {
    async fn research(&self, query: &str) -> Result<String, CapabilityError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DOC.to_string()))
    }
}

fn policy(review_required: bool, required: &[&str]) -> WorkflowPolicy {
    WorkflowPolicy {
        review_required,
        required_sections: required.iter().map(|s| s.to_string()).collect(),
        ..WorkflowPolicy::default()
    }
}

fn build(
    out: &Path,
    policy: WorkflowPolicy,
    research: Arc<dyn ResearchCapability>,
    review: Arc<dyn ReviewCapability>,
    store: Arc<dyn RunStore>,
) -> Orchestrator {
    OrchestratorBuilder::new()
        .policy(policy)
        .research(research)
        .review(review)
        .renderer(Arc::new(MarkdownRenderer::new(out)))
        .store(store)
        .build()
        .unwrap()
}

#[test]
fn test_router_scenarios() {
    let policy = policy(true, &["Summary"]);

    // A：全新状态先调研
    let fresh = RunState::new("t", "q");
    assert_eq!(next_step(&fresh, &policy), Route::Step(StepId::Research));

    // B：调研完成、需要审阅
    let mut researched = fresh.clone();
    researched.research_status = StepStatus::Completed;
    researched.research_result = Some(DOC.to_string());
    assert_eq!(next_step(&researched, &policy), Route::Step(StepId::Review));

    // C：调研失败两次，仍可重试
    let mut failing = fresh.clone();
    failing.research_status = StepStatus::Failed;
    failing.error = Some(StepError::new(StepId::Research, ErrorKind::ResearchFailure, "timeout"));
    failing.retry_count = 2;
    assert_eq!(next_step(&failing, &policy), Route::Step(StepId::Research));

    // D：重试耗尽
    failing.retry_count = 3;
    assert_eq!(next_step(&failing, &policy), Route::Terminal(Outcome::Failed));
}

#[tokio::test]
async fn test_missing_section_fails_without_consuming_retries() {
    let dir = TempDir::new().unwrap();
    let research = RecordingResearch::scripted(vec![Ok(r#"{"title":"X","sections":{}}"#.into())]);
    let orch = build(
        dir.path(),
        policy(false, &["Summary"]),
        research.clone(),
        Arc::new(AutoApprove),
        Arc::new(MemoryRunStore::new()),
    );

    let state = orch.process("x", "t1").await.unwrap();
    assert_eq!(state.outcome, Some(Outcome::Failed));
    assert_eq!(state.render_status, RenderStatus::Failed);
    assert_eq!(state.retry_count, 0);
    let err = state.error.unwrap();
    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert!(err.message.contains("Summary"));
    // 渲染只尝试一次，调研也没有重跑
    assert_eq!(research.queries().len(), 1);
}

#[tokio::test]
async fn test_suspend_then_approve_renders() {
    let dir = TempDir::new().unwrap();
    let orch = build(
        dir.path(),
        policy(true, &["Summary", "Sources"]),
        RecordingResearch::scripted(vec![]),
        Arc::new(DeferredReview),
        Arc::new(MemoryRunStore::new()),
    );

    let state = orch.process("rust async runtimes", "t1").await.unwrap();
    assert_eq!(state.review_status, ReviewStatus::Pending);
    assert!(state.outcome.is_none());
    assert!(state.document_path().is_none());
    assert_eq!(
        next_step(&state, orch.policy()),
        Route::Suspend(StepId::Review)
    );

    let state = orch
        .resume_review("t1", ReviewDecision::approve("ok"))
        .await
        .unwrap();
    assert_eq!(state.review_status, ReviewStatus::Approved);
    assert_eq!(state.review_comments.as_deref(), Some("ok"));
    assert_eq!(state.outcome, Some(Outcome::Completed));

    let path = state.document_path().unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.starts_with("# Rust async runtimes"));
    assert!(content.contains("- [Tokio](https://tokio.rs) - official site"));
    assert!(state
        .messages
        .last()
        .unwrap()
        .content
        .starts_with("Document generated:"));
}

#[tokio::test]
async fn test_rejection_terminates_without_document() {
    let dir = TempDir::new().unwrap();
    let orch = build(
        dir.path(),
        policy(true, &["Summary"]),
        RecordingResearch::scripted(vec![]),
        Arc::new(DeferredReview),
        Arc::new(MemoryRunStore::new()),
    );

    orch.process("q", "t1").await.unwrap();
    let state = orch
        .resume_review("t1", ReviewDecision::reject("off topic"))
        .await
        .unwrap();
    assert_eq!(state.outcome, Some(Outcome::Rejected));
    assert_eq!(state.review_status, ReviewStatus::Rejected);
    assert!(state.error.is_none());
    assert!(state.document_path().is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rejection_with_revise_policy_researches_again() {
    let dir = TempDir::new().unwrap();
    let research = RecordingResearch::scripted(vec![]);
    let orch = build(
        dir.path(),
        WorkflowPolicy {
            on_reject: RejectPolicy::Revise,
            max_review_rounds: 1,
            ..policy(true, &["Summary"])
        },
        research.clone(),
        Arc::new(DeferredReview),
        Arc::new(MemoryRunStore::new()),
    );

    orch.process("rust", "t1").await.unwrap();
    let state = orch
        .resume_review("t1", ReviewDecision::reject("cover async-std too"))
        .await
        .unwrap();
    // 第二轮调研后再次挂起
    assert_eq!(state.review_status, ReviewStatus::Pending);
    assert_eq!(state.review_rounds, 1);
    let queries = research.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].contains("rust"));
    assert!(queries[1].contains("cover async-std too"));

    // 轮次用尽后再驳回即终止
    let state = orch
        .resume_review("t1", ReviewDecision::reject("still no"))
        .await
        .unwrap();
    assert_eq!(state.outcome, Some(Outcome::Rejected));
    assert_eq!(research.queries().len(), 2);
}

#[tokio::test]
async fn test_transient_failures_then_success_and_exhaustion() {
    let dir = TempDir::new().unwrap();
    let research = RecordingResearch::scripted(vec![
        Err(CapabilityError::failure("503")),
        Err(CapabilityError::failure("503")),
    ]);
    let orch = build(
        dir.path(),
        policy(false, &["Summary"]),
        research.clone(),
        Arc::new(AutoApprove),
        Arc::new(MemoryRunStore::new()),
    );
    let state = orch.process("q", "ok").await.unwrap();
    assert_eq!(state.outcome, Some(Outcome::Completed));
    assert_eq!(research.queries().len(), 3);

    let research = RecordingResearch::scripted(
        (0..5).map(|_| Err(CapabilityError::failure("503"))).collect(),
    );
    let orch = build(
        dir.path(),
        policy(false, &["Summary"]),
        research.clone(),
        Arc::new(AutoApprove),
        Arc::new(MemoryRunStore::new()),
    );
    let state = orch.process("q", "exhausted").await.unwrap();
    assert_eq!(state.outcome, Some(Outcome::Failed));
    assert_eq!(state.error.unwrap().kind, ErrorKind::MaxRetriesExceeded);
    assert_eq!(research.queries().len(), 3);
}

#[tokio::test]
async fn test_suspended_run_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("runs.db");
    let out = dir.path().join("out");

    {
        let orch = build(
            &out,
            policy(true, &["Summary"]),
            RecordingResearch::scripted(vec![]),
            Arc::new(DeferredReview),
            Arc::new(SqliteRunStore::open(&db).unwrap()),
        );
        let state = orch.process("rust", "t1").await.unwrap();
        assert!(state.is_awaiting_review());
    }

    let orch = build(
        &out,
        policy(true, &["Summary"]),
        RecordingResearch::scripted(vec![]),
        Arc::new(DeferredReview),
        Arc::new(SqliteRunStore::open(&db).unwrap()),
    );
    assert_eq!(orch.awaiting_review().await.unwrap(), vec!["t1".to_string()]);

    let state = orch
        .resume_review("t1", ReviewDecision::approve(""))
        .await
        .unwrap();
    assert_eq!(state.outcome, Some(Outcome::Completed));
    assert!(state.document_path().unwrap().exists());
    assert_eq!(orch.replay_run("t1").await.unwrap(), state);
}

#[tokio::test]
async fn test_interrupted_run_continues_after_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("runs.db");
    let out = dir.path().join("out");

    // 上一个进程在调研途中退出：只留下调研已开始的快照
    {
        let store = SqliteRunStore::open(&db).unwrap();
        let state = RunState::new("t1", "rust");
        store.create(&state).await.unwrap();
        let started = StateUpdate::new().research_status(StepStatus::Pending);
        store.append_update("t1", &started).await.unwrap();
        store.save(&merge(state, started)).await.unwrap();
    }

    let orch = build(
        &out,
        policy(true, &["Summary"]),
        RecordingResearch::scripted(vec![]),
        Arc::new(DeferredReview),
        Arc::new(SqliteRunStore::open(&db).unwrap()),
    );
    assert!(matches!(
        orch.process("rust", "t1").await,
        Err(WorkflowError::RunAlreadyExists(_))
    ));
    assert!(matches!(
        orch.resume_review("t1", ReviewDecision::approve("")).await,
        Err(WorkflowError::NotAwaitingReview(_))
    ));

    let state = orch.continue_run("t1").await.unwrap();
    assert_eq!(state.research_status, StepStatus::Completed);
    assert!(state.is_awaiting_review());
    assert_eq!(orch.awaiting_review().await.unwrap(), vec!["t1".to_string()]);

    let state = orch
        .resume_review("t1", ReviewDecision::approve("ok"))
        .await
        .unwrap();
    assert_eq!(state.outcome, Some(Outcome::Completed));
    assert_eq!(orch.replay_run("t1").await.unwrap(), state);
}

/// 调研开始后阻塞，直到测试放行
struct GatedResearch {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ResearchCapability for GatedResearch {
    async fn research(&self, _query: &str) -> Result<String, CapabilityError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(DOC.to_string())
    }
}

#[tokio::test]
async fn test_cancel_in_flight_run_stops_at_step_boundary() {
    let dir = TempDir::new().unwrap();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let orch = Arc::new(build(
        dir.path(),
        policy(false, &["Summary"]),
        Arc::new(GatedResearch {
            started: started.clone(),
            release: release.clone(),
        }),
        Arc::new(AutoApprove),
        Arc::new(MemoryRunStore::new()),
    ));

    let runner = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.process("rust", "t1").await })
    };

    started.notified().await;
    assert!(matches!(
        orch.process("rust", "t1").await,
        Err(WorkflowError::RunInProgress(_))
    ));
    let snapshot = orch.cancel("t1").await.unwrap();
    assert!(snapshot.outcome.is_none());
    release.notify_one();

    let state = runner.await.unwrap().unwrap();
    assert_eq!(state.outcome, Some(Outcome::Cancelled));
    assert!(state.cancelled);
    // 调研结果已合并，但不再进入渲染
    assert_eq!(state.research_status, StepStatus::Completed);
    assert!(state.document_path().is_none());
}

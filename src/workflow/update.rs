//! 状态合并（Reducer）
//!
//! 步骤适配器只返回 StateUpdate；merge 是唯一修改 RunState 的地方。
//! 除 messages 追加外，其余字段按「出现即覆盖」处理；可清空的字段使用 `Option<Option<T>>`。

use serde::{Deserialize, Deserializer, Serialize};

use crate::workflow::types::*;

/// 区分「缺省」与「显式 null」：缺省 → None，null → Some(None)
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 局部更新：None 表示不触碰该字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub research_result: Option<Option<String>>,
    pub research_status: Option<StepStatus>,
    pub review_status: Option<ReviewStatus>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub review_comments: Option<Option<String>>,
    pub review_rounds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub pending_review: Option<Option<ReviewRequest>>,
    pub render_status: Option<RenderStatus>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub error: Option<Option<StepError>>,
    pub retry_count: Option<u32>,
    pub cancelled: Option<bool>,
    pub outcome: Option<Outcome>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 追加一条消息
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn research(mut self, status: StepStatus, result: Option<String>) -> Self {
        self.research_status = Some(status);
        self.research_result = Some(result);
        self
    }

    pub fn research_status(mut self, status: StepStatus) -> Self {
        self.research_status = Some(status);
        self
    }

    pub fn review_status(mut self, status: ReviewStatus) -> Self {
        self.review_status = Some(status);
        self
    }

    pub fn review_comments(mut self, comments: Option<String>) -> Self {
        self.review_comments = Some(comments);
        self
    }

    pub fn review_rounds(mut self, rounds: u32) -> Self {
        self.review_rounds = Some(rounds);
        self
    }

    pub fn pending_review(mut self, request: Option<ReviewRequest>) -> Self {
        self.pending_review = Some(request);
        self
    }

    pub fn render_status(mut self, status: RenderStatus) -> Self {
        self.render_status = Some(status);
        self
    }

    /// 写入错误；retry_count 由调用方决定是否一并更新
    pub fn error(mut self, error: StepError) -> Self {
        self.error = Some(Some(error));
        self
    }

    /// 步骤成功：清除错误并重置重试计数
    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self.retry_count = Some(0);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.cancelled = Some(true);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// 将局部更新合并进状态；纯函数，无副作用
pub fn merge(mut state: RunState, update: StateUpdate) -> RunState {
    let StateUpdate {
        messages,
        research_result,
        research_status,
        review_status,
        review_comments,
        review_rounds,
        pending_review,
        render_status,
        error,
        retry_count,
        cancelled,
        outcome,
    } = update;

    state.messages.extend(messages);

    if let Some(v) = research_result {
        state.research_result = v;
    }
    if let Some(v) = research_status {
        state.research_status = v;
    }
    if let Some(v) = review_status {
        state.review_status = v;
    }
    if let Some(v) = review_comments {
        state.review_comments = v;
    }
    if let Some(v) = review_rounds {
        state.review_rounds = v;
    }
    if let Some(v) = pending_review {
        state.pending_review = v;
    }
    if let Some(v) = render_status {
        state.render_status = v;
    }
    if let Some(v) = error {
        state.error = v;
    }
    if let Some(v) = retry_count {
        state.retry_count = v;
    }
    if let Some(v) = cancelled {
        state.cancelled = v;
    }
    if let Some(v) = outcome {
        state.outcome = Some(v);
    }

    state
}

/// 从初始状态与有序更新日志重放出最终状态
pub fn replay<I>(initial: RunState, updates: I) -> RunState
where
    I: IntoIterator<Item = StateUpdate>,
{
    updates.into_iter().fold(initial, merge)
}

//! 文档结构：调研结果与渲染器之间的线上契约
//!
//! `{"title": string, "sections": {"<name>": string, ...}}`，sections 保持 JSON 中的顺序；
//! 名为 Sources 的段落可以是 `[{url, title, relevance}]` 列表，渲染为带链接的项目列表。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 来源段落名
pub const SOURCES_SECTION: &str = "Sources";

/// 文档结构错误（一律视为不可重试的 validation_error）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Research result is empty")]
    Empty,
    #[error("Research result is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Document is missing field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid section '{name}': {reason}")]
    InvalidSection { name: String, reason: String },
    #[error("Document is missing required sections: {}", .0.join(", "))]
    MissingSections(Vec<String>),
}

/// 单条来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub relevance: String,
}

/// 段落内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionBody {
    Text(String),
    Sources(Vec<SourceRef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub body: SectionBody,
}

/// 已校验的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub sections: Vec<Section>,
}

impl Document {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// 解析并校验必需段落
    pub fn parse(raw: &str, required_sections: &[String]) -> Result<Self, DocumentError> {
        let json = extract_json_object(raw).ok_or_else(|| {
            if raw.trim().is_empty() {
                DocumentError::Empty
            } else {
                DocumentError::InvalidJson("no JSON object found".to_string())
            }
        })?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| DocumentError::InvalidJson(e.to_string()))?;

        let title = value
            .get("title")
            .and_then(Value::as_str)
            .ok_or(DocumentError::MissingField("title"))?
            .trim()
            .to_string();

        let raw_sections = value
            .get("sections")
            .and_then(Value::as_object)
            .ok_or(DocumentError::MissingField("sections"))?;

        let mut sections = Vec::with_capacity(raw_sections.len());
        for (name, body) in raw_sections {
            sections.push(Section {
                name: name.clone(),
                body: parse_section_body(name, body)?,
            });
        }

        let missing: Vec<String> = required_sections
            .iter()
            .filter(|r| !sections.iter().any(|s| &s.name == *r))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(DocumentError::MissingSections(missing));
        }

        Ok(Self { title, sections })
    }
}

fn parse_section_body(name: &str, body: &Value) -> Result<SectionBody, DocumentError> {
    match body {
        Value::String(text) => Ok(SectionBody::Text(text.clone())),
        Value::Array(_) if name == SOURCES_SECTION => {
            let sources: Vec<SourceRef> = serde_json::from_value(body.clone()).map_err(|e| {
                DocumentError::InvalidSection {
                    name: name.to_string(),
                    reason: format!("each source needs url and title ({e})"),
                }
            })?;
            Ok(SectionBody::Sources(sources))
        }
        Value::Array(_) => Err(DocumentError::InvalidSection {
            name: name.to_string(),
            reason: format!("only '{SOURCES_SECTION}' may be a list"),
        }),
        other => Err(DocumentError::InvalidSection {
            name: name.to_string(),
            reason: format!("expected string, got {}", json_type_name(other)),
        }),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 从模型输出中截取 JSON 对象（容忍 ```json 代码块与前后说明文字）
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// 文档线上格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DocumentFormat {
    /// 报告标题
    pub title: String,
    /// 段落名 → 段落正文；Sources 段落为来源列表
    pub sections: std::collections::BTreeMap<String, SectionFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(untagged)]
enum SectionFormat {
    Text(String),
    Sources(Vec<SourceRef>),
}

/// 返回文档格式的 JSON Schema 字符串，可拼入调研提示词
pub fn document_schema_json() -> String {
    let schema = schema_for!(DocumentFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

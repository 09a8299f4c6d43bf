//! 渲染器：把已校验的 Document 写成交付文件
//!
//! 正文段落按空行分段；Sources 段落渲染为带链接的项目列表。
//! 标题为空属于结构错误（Validation），文件写入失败属于瞬时错误（Failure）。

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilityError;
use crate::document::{Document, SectionBody, SourceRef};

#[async_trait]
pub trait RenderCapability: Send + Sync {
    /// 渲染文档，返回产物路径
    async fn render(&self, document: &Document) -> Result<PathBuf, CapabilityError>;
}

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    #[default]
    Markdown,
    Html,
}

impl RenderFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RenderFormat::Markdown => "md",
            RenderFormat::Html => "html",
        }
    }
}

/// 标题转文件名片段
fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(48).collect();
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug
    }
}

fn check_title(document: &Document) -> Result<(), CapabilityError> {
    if document.title.trim().is_empty() {
        return Err(CapabilityError::Validation("Document title is empty".to_string()));
    }
    Ok(())
}

/// 写入 `<dir>/<slug>-<id>.<ext>`，父目录不存在时自动创建
async fn write_artifact(
    dir: &Path,
    title: &str,
    format: RenderFormat,
    content: String,
) -> Result<PathBuf, CapabilityError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CapabilityError::failure(format!("Create output dir {}: {}", dir.display(), e)))?;

    let id = uuid::Uuid::new_v4().simple().to_string();
    let path = dir.join(format!("{}-{}.{}", slugify(title), &id[..8], format.extension()));
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| CapabilityError::failure(format!("Write {}: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "document rendered");
    Ok(path)
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Markdown 渲染器
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    output_dir: PathBuf,
}

impl MarkdownRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn to_markdown(document: &Document) -> String {
        let mut out = format!("# {}\n", document.title.trim());
        for section in &document.sections {
            let _ = write!(out, "\n## {}\n\n", section.name);
            match &section.body {
                SectionBody::Text(text) => {
                    for p in paragraphs(text) {
                        let _ = write!(out, "{}\n\n", p);
                    }
                }
                SectionBody::Sources(sources) => {
                    for s in sources {
                        let _ = writeln!(out, "- {}", markdown_source(s));
                    }
                    out.push('\n');
                }
            }
        }
        out.trim_end().to_string() + "\n"
    }
}

fn markdown_source(s: &SourceRef) -> String {
    let mut line = format!("[{}]({})", s.title, s.url);
    if !s.relevance.trim().is_empty() {
        let _ = write!(line, " - {}", s.relevance.trim());
    }
    line
}

#[async_trait]
impl RenderCapability for MarkdownRenderer {
    async fn render(&self, document: &Document) -> Result<PathBuf, CapabilityError> {
        check_title(document)?;
        let content = Self::to_markdown(document);
        write_artifact(&self.output_dir, &document.title, RenderFormat::Markdown, content).await
    }
}

/// HTML 渲染器（单文件、内联样式）
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    output_dir: PathBuf,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const HTML_STYLE: &str = "body{font-family:sans-serif;max-width:48rem;margin:3rem auto;color:#2C3E50}\
h1{font-size:2rem}h2{color:#34495E;margin-top:2rem}li.source{color:#7F8C8D}";

impl HtmlRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn to_html(document: &Document) -> String {
        let title = escape_html(document.title.trim());
        let mut out = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{HTML_STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );
        for section in &document.sections {
            let _ = writeln!(out, "<h2>{}</h2>", escape_html(&section.name));
            match &section.body {
                SectionBody::Text(text) => {
                    for p in paragraphs(text) {
                        let _ = writeln!(out, "<p>{}</p>", escape_html(p));
                    }
                }
                SectionBody::Sources(sources) => {
                    out.push_str("<ul>\n");
                    for s in sources {
                        let _ = write!(
                            out,
                            "<li class=\"source\"><a href=\"{}\">{}</a>",
                            escape_html(&s.url),
                            escape_html(&s.title)
                        );
                        if !s.relevance.trim().is_empty() {
                            let _ = write!(out, " - {}", escape_html(s.relevance.trim()));
                        }
                        out.push_str("</li>\n");
                    }
                    out.push_str("</ul>\n");
                }
            }
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

#[async_trait]
impl RenderCapability for HtmlRenderer {
    async fn render(&self, document: &Document) -> Result<PathBuf, CapabilityError> {
        check_title(document)?;
        let content = Self::to_html(document);
        write_artifact(&self.output_dir, &document.title, RenderFormat::Html, content).await
    }
}

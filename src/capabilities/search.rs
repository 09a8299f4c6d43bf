//! Web 搜索与抓取：DuckDuckGo HTML 端点、域名白名单、超时、结果大小限制
//!
//! 搜索结果用正则从 HTML 中抽取（标题、跳转链接、摘要）；
//! 抓取的 HTML 页面用 html2text 提取可读文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::config::ResearchSection;

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 搜索 + 抓取能力
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String>;

    /// 抓取页面并返回纯文本
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

/// DuckDuckGo HTML 搜索
pub struct DuckDuckGoSearch {
    client: Client,
    search_url: String,
    max_results: usize,
    max_result_chars: usize,
    allowed_domains: HashSet<String>,
    result_link: Regex,
    result_snippet: Regex,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!") || s.starts_with("<html") || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<head") || s.contains("<title")))
}

/// 将 HTML 片段转为单行文本，并解码常见实体
fn inline_text(fragment: &str) -> String {
    strip_html_tags(fragment)
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// 从 URL 中提取 host
fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// DuckDuckGo 的结果链接是跳转地址（`//duckduckgo.com/l/?uddg=<真实地址>`），取出真实地址
fn resolve_result_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    matches!(url.scheme(), "http" | "https").then_some(absolute)
}

/// 截断到 max_chars 个字符
fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl DuckDuckGoSearch {
    pub fn new(cfg: &ResearchSection) -> Result<Self, String> {
        // 使用现代浏览器 UA，避免被站点识别为爬虫
        const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| format!("Build HTTP client: {e}"))?;
        let result_link = Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .map_err(|e| e.to_string())?;
        let result_snippet = Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            search_url: cfg.search_url.clone(),
            max_results: cfg.max_results,
            max_result_chars: cfg.max_result_chars,
            allowed_domains: cfg
                .allowed_domains
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            result_link,
            result_snippet,
        })
    }

    /// 白名单为空时不限制域名
    fn is_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| "Invalid or missing URL".to_string())?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {}", domain))
    }

    /// 从搜索结果页中解析结果
    fn parse_results(&self, html: &str) -> Vec<SearchHit> {
        let snippets: Vec<String> = self
            .result_snippet
            .captures_iter(html)
            .map(|c| inline_text(&c[1]))
            .collect();

        self.result_link
            .captures_iter(html)
            .enumerate()
            .filter_map(|(i, c)| {
                let url = resolve_result_link(&c[1])?;
                Some(SearchHit {
                    title: inline_text(&c[2]),
                    url,
                    snippet: snippets.get(i).cloned().unwrap_or_default(),
                })
            })
            .take(self.max_results)
            .collect()
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        tracing::info!(query = %query, "web search");
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("Search request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Search HTTP {}", resp.status()));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let hits = self.parse_results(&html);
        tracing::info!(count = hits.len(), "web search results");
        Ok(hits)
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        self.is_allowed(url)?;
        tracing::debug!(url = %url, "fetch page");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let mut body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;

        // 去除 BOM，避免 HTML 检测失败
        if let Some(stripped) = body.strip_prefix('\u{FEFF}') {
            body = stripped.to_string();
        }

        let body = if looks_like_html(&body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => strip_html_tags(&body),
            }
        } else {
            body
        };

        Ok(truncate_chars(body, self.max_result_chars))
    }
}

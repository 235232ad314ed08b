//! Prompt construction for exchange analysis.

use ps_core::Exchange;

use crate::compress::compress;
use crate::sanitize::sanitize;

/// Default system prompt.
///
/// Asks for a leading `风险等级:` line so results can be classified from a
/// structured label before falling back to free text.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一名资深Web安全专家，负责对被动捕获的HTTP流量进行漏洞分析。\
请根据给出的HTTP请求与响应，判断是否存在SQL注入、XSS、CSRF、SSRF、命令执行、越权访问、敏感信息泄露等安全问题。\
回答第一行必须为“风险等级: 严重/高危/中危/低危/信息/无”，随后给出简要分析与修复建议。\
如果未发现问题，请明确说明未发现安全漏洞。";

/// Builds analysis prompts from captured exchanges.
///
/// The exchange text is compressed to the body budget first and sanitized
/// last, so nothing the compressor emits escapes sanitization.
///
/// # Examples
///
/// ```
/// use ps_analysis::PromptBuilder;
/// use ps_core::{Exchange, HttpRequest};
///
/// let builder = PromptBuilder::new(16 * 1024);
/// let exchange = Exchange::new(HttpRequest::new("GET", "https://h/a?id=1"), None);
/// let prompt = builder.build(&exchange);
/// assert!(prompt.contains("GET /a?id=1 HTTP/1.1"));
/// ```
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    body_budget: usize,
}

impl PromptBuilder {
    /// Creates a builder with the default system prompt.
    #[must_use]
    pub fn new(body_budget: usize) -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            body_budget,
        }
    }

    /// Replaces the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Returns the system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Returns the byte budget applied to the rendered exchange.
    #[must_use]
    pub const fn body_budget(&self) -> usize {
        self.body_budget
    }

    /// Renders, compresses and sanitizes an exchange into the user prompt.
    #[must_use]
    pub fn build(&self, exchange: &Exchange) -> String {
        let raw = exchange.to_text();
        let compressed = compress(&raw, self.body_budget);
        let clean = sanitize(&compressed);
        format!("请分析以下HTTP流量是否存在安全漏洞：\n\n{clean}")
    }
}

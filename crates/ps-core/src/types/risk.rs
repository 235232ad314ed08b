//! Risk levels and free-text severity classification.
//!
//! The remote analysis returns prose. [`RiskRules`] turns that prose into a
//! [`RiskLevel`] using keyword tables that are plain data, so deployments
//! can tune them through configuration.
//!
//! Classification order (first match wins):
//!
//! 1. empty text is [`RiskLevel::None`]
//! 2. a structured label line ("风险等级: 高危") is parsed directly
//! 3. a negative-finding phrase ("未发现...漏洞") is [`RiskLevel::None`]
//! 4. keyword tables from `Critical` down to `Low`
//! 5. advisory language is [`RiskLevel::Info`]
//!
//! Table entries are matched case-insensitively however they are written
//! in configuration.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Ordered severity of a finding, `None < Info < Low < Medium < High < Critical`.
///
/// # Examples
///
/// ```
/// use ps_core::RiskLevel;
///
/// assert!(RiskLevel::High > RiskLevel::Medium);
/// assert_eq!(RiskLevel::from_label("高危风险"), RiskLevel::High);
/// assert_eq!(RiskLevel::from(None::<&str>), RiskLevel::None);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// No finding.
    #[default]
    None,
    /// Informational or advisory only.
    Info,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity.
    Critical,
}

impl RiskLevel {
    /// Every level in ascending order.
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Returns a human-readable label for this level.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Info => "Info",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    /// Maps a short severity label to its level by substring match.
    ///
    /// Unrecognised labels map to [`RiskLevel::None`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self::parse_label(label).unwrap_or_default()
    }

    /// Like [`from_label`](Self::from_label), but distinguishes an
    /// explicit "none" label (`Some(None)`) from an unrecognised one.
    #[must_use]
    pub fn parse_label(label: &str) -> Option<Self> {
        const LABELS: [(RiskLevel, &[&str]); 6] = [
            (RiskLevel::Critical, &["严重", "critical"]),
            (RiskLevel::High, &["高", "high"]),
            (RiskLevel::Medium, &["中", "medium", "moderate"]),
            (RiskLevel::Low, &["低", "low"]),
            (RiskLevel::Info, &["信息", "提示", "info"]),
            (RiskLevel::None, &["无", "none", "safe", "安全"]),
        ];

        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        LABELS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| label.contains(n)))
            .map(|(level, _)| *level)
    }
}

impl From<Option<&str>> for RiskLevel {
    fn from(label: Option<&str>) -> Self {
        label.map_or(Self::None, Self::from_label)
    }
}

/// A negative-finding phrase made of fragments that must appear in order.
///
/// Gaps between consecutive fragments are bounded and may not cross a
/// clause boundary, so "没有...问题" matches "没有明显的安全问题" but not
/// "没有过滤，存在注入问题". ASCII fragments start on a word boundary and,
/// unless they are the last fragment, also end on one: "no...vulnerabilit"
/// matches "no known vulnerabilities" but not "note the vulnerability".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegationPattern {
    /// Fragments, matched case-insensitively and in order.
    pub parts: Vec<String>,
    /// Maximum characters allowed between consecutive fragments.
    #[serde(default = "default_max_gap")]
    pub max_gap: usize,
}

const fn default_max_gap() -> usize {
    12
}

impl NegationPattern {
    /// Builds a pattern from `...`-separated text, e.g. `"未发现...漏洞"`.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        Self {
            parts: pattern
                .split("...")
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_gap: default_max_gap(),
        }
    }

    /// Returns `true` if `text` (already lowercased) contains the pattern.
    fn matches(&self, text: &str) -> bool {
        let parts: Vec<String> = self.parts.iter().map(|p| p.to_lowercase()).collect();
        let Some((first, rest)) = parts.split_first() else {
            return false;
        };
        text.match_indices(first.as_str())
            .filter(|(start, m)| on_word_boundary(text, *start, start + m.len(), !rest.is_empty()))
            .any(|(start, m)| self.matches_tail(&text[start + m.len()..], rest))
    }

    fn matches_tail(&self, text: &str, parts: &[String]) -> bool {
        let Some((next, rest)) = parts.split_first() else {
            return true;
        };
        for (gap, (idx, ch)) in text.char_indices().enumerate() {
            if gap > self.max_gap || is_clause_break(ch) {
                break;
            }
            let end = idx + next.len();
            if text[idx..].starts_with(next.as_str())
                && on_word_boundary(text, idx, end, !rest.is_empty())
            {
                return self.matches_tail(&text[end..], rest);
            }
        }
        false
    }
}

/// Checks the ASCII word boundaries around `text[start..end]`.
///
/// The end is only checked when `closed`; an open end lets a final fragment
/// act as a stem.
fn on_word_boundary(text: &str, start: usize, end: usize, closed: bool) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric();
    let fragment = &text[start..end];
    let open_start = !fragment.starts_with(is_word)
        || !text[..start].chars().next_back().is_some_and(is_word);
    let open_end = !closed
        || !fragment.ends_with(is_word)
        || !text[end..].chars().next().is_some_and(is_word);
    open_start && open_end
}

const fn is_clause_break(ch: char) -> bool {
    matches!(
        ch,
        '，' | '。' | '；' | '！' | '？' | ',' | ';' | '!' | '?' | '\n'
    )
}

/// Keyword and phrase tables driving [`RiskLevel`] inference.
///
/// # Examples
///
/// ```
/// use ps_core::{RiskLevel, RiskRules};
///
/// let rules = RiskRules::default();
/// assert_eq!(rules.classify("存在SQL注入漏洞"), RiskLevel::High);
/// assert_eq!(rules.classify("未发现任何安全漏洞"), RiskLevel::None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRules {
    /// Phrases that state nothing was found; checked after the label line
    /// and before any keyword.
    pub negations: Vec<NegationPattern>,
    /// Line prefixes introducing a structured severity label.
    pub label_prefixes: Vec<String>,
    /// Keywords implying [`RiskLevel::Critical`].
    pub critical: Vec<String>,
    /// Keywords implying [`RiskLevel::High`].
    pub high: Vec<String>,
    /// Keywords implying [`RiskLevel::Medium`].
    pub medium: Vec<String>,
    /// Keywords implying [`RiskLevel::Low`].
    pub low: Vec<String>,
    /// Advisory language implying [`RiskLevel::Info`].
    pub advisory: Vec<String>,
}

static DEFAULT_RULES: LazyLock<RiskRules> = LazyLock::new(RiskRules::default);

impl RiskRules {
    /// Returns a shared instance of the default tables.
    #[must_use]
    pub fn shared_default() -> &'static Self {
        &DEFAULT_RULES
    }

    /// Classifies free-text analysis output into a [`RiskLevel`].
    #[must_use]
    pub fn classify(&self, text: &str) -> RiskLevel {
        let text = text.trim();
        if text.is_empty() {
            return RiskLevel::None;
        }
        let lowered = text.to_lowercase();

        if let Some(level) = self.structured_label(&lowered) {
            return level;
        }

        if self.negations.iter().any(|n| n.matches(&lowered)) {
            return RiskLevel::None;
        }

        let tiers = [
            (RiskLevel::Critical, &self.critical),
            (RiskLevel::High, &self.high),
            (RiskLevel::Medium, &self.medium),
            (RiskLevel::Low, &self.low),
            (RiskLevel::Info, &self.advisory),
        ];
        tiers
            .into_iter()
            .find(|(_, keywords)| keywords.iter().any(|k| contains_keyword(&lowered, k)))
            .map_or(RiskLevel::None, |(level, _)| level)
    }

    /// Classifies optional text; `None` is [`RiskLevel::None`].
    #[must_use]
    pub fn classify_opt(&self, text: Option<&str>) -> RiskLevel {
        text.map_or(RiskLevel::None, |t| self.classify(t))
    }

    fn structured_label(&self, lowered: &str) -> Option<RiskLevel> {
        let prefixes: Vec<String> = self
            .label_prefixes
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        lowered.lines().find_map(|line| {
            let line = line.trim_start_matches(['#', '*', '-', ' ']).trim();
            prefixes.iter().find_map(|prefix| {
                let rest = line.strip_prefix(prefix.as_str())?;
                let rest = rest.trim_start_matches(['*', ' ']);
                let value = rest.strip_prefix([':', '：'])?;
                RiskLevel::parse_label(value.trim_start_matches(['*', ' ']))
            })
        })
    }
}

/// Substring match; ASCII-word keywords additionally need word boundaries
/// so that `low` does not fire on `allow` or `rce` on `source`.
fn contains_keyword(text: &str, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    if !keyword.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return text.contains(&keyword);
    }
    text.match_indices(&keyword).any(|(start, m)| {
        let before = text[..start].chars().next_back();
        let after = text[start + m.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            negations: [
                "未发现...漏洞",
                "未发现...风险",
                "未发现...问题",
                "没有发现...漏洞",
                "没有发现...风险",
                "没有...问题",
                "没有...漏洞",
                "不存在...漏洞",
                "不存在...风险",
                "不存在...问题",
                "无明显...风险",
                "安全性良好",
                "no...vulnerabilit",
                "no security issue",
                "not vulnerable",
            ]
            .into_iter()
            .map(NegationPattern::parse)
            .collect(),
            label_prefixes: strings(&["风险等级", "风险级别", "risk level", "severity"]),
            critical: strings(&[
                "远程代码执行",
                "命令执行",
                "命令注入",
                "remote code execution",
                "command injection",
                "rce",
                "critical",
                "严重",
            ]),
            high: strings(&[
                "sql注入",
                "sql injection",
                "ssrf",
                "服务端请求伪造",
                "任意文件读取",
                "任意文件上传",
                "路径遍历",
                "path traversal",
                "xxe",
                "反序列化",
                "越权",
                "未授权访问",
                "high",
                "高危",
                "高风险",
            ]),
            medium: strings(&[
                "xss",
                "跨站脚本",
                "cross-site scripting",
                "csrf",
                "跨站请求伪造",
                "开放重定向",
                "open redirect",
                "信息泄露",
                "information disclosure",
                "medium",
                "中危",
                "中等",
                "中风险",
            ]),
            low: strings(&["low", "低危", "低风险", "风险较低", "低"]),
            advisory: strings(&[
                "建议",
                "注意",
                "最佳实践",
                "suggest",
                "recommend",
                "consider",
                "best practice",
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> RiskLevel {
        RiskRules::default().classify(text)
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(classify(""), RiskLevel::None);
        assert_eq!(classify("   \n"), RiskLevel::None);
        assert_eq!(RiskRules::default().classify_opt(None), RiskLevel::None);
    }

    #[test]
    fn test_negation_precedes_keywords() {
        assert_eq!(classify("未发现任何安全漏洞"), RiskLevel::None);
        assert_eq!(classify("经过分析，没有明显的安全问题"), RiskLevel::None);
        assert_eq!(
            classify("No vulnerabilities found. The high-level design is fine."),
            RiskLevel::None
        );
    }

    #[test]
    fn test_negation_does_not_cross_clauses() {
        assert_eq!(classify("参数没有过滤，存在SQL注入问题"), RiskLevel::High);
    }

    #[test]
    fn test_keyword_tiers() {
        assert_eq!(classify("发现RCE漏洞"), RiskLevel::Critical);
        assert_eq!(classify("存在SQL注入漏洞"), RiskLevel::High);
        assert_eq!(classify("反射型XSS漏洞"), RiskLevel::Medium);
        assert_eq!(classify("Severity is low overall."), RiskLevel::Low);
        assert_eq!(classify("建议开启HttpOnly"), RiskLevel::Info);
        assert_eq!(classify("响应正常"), RiskLevel::None);
    }

    #[test]
    fn test_ascii_keywords_need_word_boundaries() {
        assert_eq!(classify("The resource allows a flow of data"), RiskLevel::None);
        assert_eq!(classify("Found an RCE in upload"), RiskLevel::Critical);
    }

    #[test]
    fn test_structured_label_line() {
        let text = "## 分析\n存在一些可疑参数\n**风险等级**: 中危\n";
        assert_eq!(classify(text), RiskLevel::Medium);
        assert_eq!(classify("Risk level: none"), RiskLevel::None);
    }

    #[test]
    fn test_structured_label_overrides_later_negation() {
        let text = "风险等级: 高危\n存在SQL注入漏洞。除此之外未发现其他漏洞。";
        assert_eq!(classify(text), RiskLevel::High);
    }

    #[test]
    fn test_ascii_negation_respects_word_ends() {
        assert_eq!(
            classify("Note the vulnerability: SQL injection in id parameter"),
            RiskLevel::High
        );
        assert_eq!(classify("There are no known vulnerabilities here"), RiskLevel::None);
        assert_eq!(classify("No security issues were identified"), RiskLevel::None);
    }

    #[test]
    fn test_bare_low_keyword() {
        assert_eq!(classify("该接口存在信息回显，危害低"), RiskLevel::Low);
    }

    #[test]
    fn test_configured_tables_ignore_case() {
        let json = r#"{
            "negations": [{"parts": ["All Clear"]}],
            "label_prefixes": ["Risk Level"],
            "critical": ["PWNED"]
        }"#;
        let rules: RiskRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.classify("all clear, sql injection ruled out"), RiskLevel::None);
        assert_eq!(rules.classify("risk level: medium"), RiskLevel::Medium);
        assert_eq!(rules.classify("host pwned"), RiskLevel::Critical);
    }

    #[test]
    fn test_from_label() {
        assert_eq!(RiskLevel::from_label("高危风险"), RiskLevel::High);
        assert_eq!(RiskLevel::from_label("high severity"), RiskLevel::High);
        assert_eq!(RiskLevel::from_label("严重"), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_label("Low"), RiskLevel::Low);
        assert_eq!(RiskLevel::from_label("???"), RiskLevel::None);
        assert_eq!(RiskLevel::from(None::<&str>), RiskLevel::None);
        assert_eq!(RiskLevel::from(Some("medium")), RiskLevel::Medium);
    }

    #[test]
    fn test_parse_label_distinguishes_unknown() {
        assert_eq!(RiskLevel::parse_label("无"), Some(RiskLevel::None));
        assert_eq!(RiskLevel::parse_label("banana"), None);
        assert_eq!(RiskLevel::parse_label(""), None);
    }

    #[test]
    fn test_levels_are_ordered() {
        let mut sorted = RiskLevel::ALL;
        sorted.sort();
        assert_eq!(sorted, RiskLevel::ALL);
    }

    #[test]
    fn test_rules_deserialize_partial() {
        let json = r#"{"critical": ["pwned"], "negations": [{"parts": ["all clear"]}]}"#;
        let rules: RiskRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.classify("host pwned"), RiskLevel::Critical);
        assert_eq!(rules.classify("all clear, no sql injection"), RiskLevel::None);
        assert_eq!(rules.negations[0].max_gap, 12);
        assert_eq!(rules.high, RiskRules::default().high);
    }
}

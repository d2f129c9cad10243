//! 匹配模式模組
//!
//! 將原始的純文字或正則表達式正規化為可匹配的物件

use std::collections::HashMap;
use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::error::ConfigError;

/// 匹配模式的種類
#[derive(Clone)]
pub enum PatternKind {
    /// 純文字匹配（包含）；不分大小寫時已預先轉為小寫
    Literal(String),
    /// 正則表達式
    Regex(Regex),
}

/// 建構匹配模式的選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternOptions {
    /// true 為正則表達式，false 為純文字
    pub is_pattern: bool,
    pub case_sensitive: bool,
    /// true 時對整個緩衝區匹配；false 時逐行匹配
    pub multiline: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            is_pattern: true,
            case_sensitive: true,
            multiline: false,
        }
    }
}

/// 正規化後的匹配模式，建構後不可變
#[derive(Clone)]
pub struct PatternSpec {
    raw: String,
    kind: PatternKind,
    case_sensitive: bool,
    multiline: bool,
}

impl PatternSpec {
    /// 依選項建立匹配模式；無效的正則表達式在此即回傳錯誤
    pub fn new(raw: impl Into<String>, options: PatternOptions) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let kind = if options.is_pattern {
            let regex = RegexBuilder::new(&raw)
                .case_insensitive(!options.case_sensitive)
                .multi_line(options.multiline)
                .dot_matches_new_line(options.multiline)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: raw.clone(),
                    source,
                })?;
            PatternKind::Regex(regex)
        } else if options.case_sensitive {
            PatternKind::Literal(raw.clone())
        } else {
            PatternKind::Literal(raw.to_lowercase())
        };

        Ok(Self {
            raw,
            kind,
            case_sensitive: options.case_sensitive,
            multiline: options.multiline,
        })
    }

    /// 區分大小寫的正則表達式
    pub fn regex(raw: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(raw, PatternOptions::default())
    }

    /// 區分大小寫的純文字
    pub fn literal(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            kind: PatternKind::Literal(raw.clone()),
            raw,
            case_sensitive: true,
            multiline: false,
        }
    }

    /// 從已編譯的正則建立
    pub fn from_regex(regex: Regex) -> Self {
        Self {
            raw: regex.as_str().to_string(),
            kind: PatternKind::Regex(regex),
            case_sensitive: true,
            multiline: false,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self.kind, PatternKind::Regex(_))
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn multiline(&self) -> bool {
        self.multiline
    }

    /// 是否至少匹配一次（不收集匹配結果）
    pub fn match_first(&self, text: &str) -> bool {
        match &self.kind {
            PatternKind::Regex(regex) => regex.is_match(text),
            PatternKind::Literal(needle) if self.case_sensitive => text.contains(needle.as_str()),
            PatternKind::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
        }
    }

    /// 由左至右列出所有匹配
    pub fn match_all<'p, 't>(&'p self, text: &'t str) -> Matches<'p, 't> {
        match &self.kind {
            PatternKind::Regex(regex) => Matches::Regex {
                regex,
                iter: regex.captures_iter(text),
            },
            PatternKind::Literal(needle) => {
                Matches::Literal(self.literal_matches(needle, text).into_iter())
            }
        }
    }

    /// 第一個匹配
    pub fn find(&self, text: &str) -> Option<MatchInfo> {
        self.match_all(text).next()
    }

    fn literal_matches(&self, needle: &str, text: &str) -> Vec<MatchInfo> {
        if self.case_sensitive {
            return text
                .match_indices(needle)
                .map(|(start, m)| MatchInfo::literal(start, m))
                .collect();
        }

        // 小寫化可能改變長度（例如 `İ`、`K`），逐字元記錄對應的原文位置
        let mut lowered = String::with_capacity(text.len());
        let mut origin = Vec::with_capacity(text.len());
        for (pos, ch) in text.char_indices() {
            let before = lowered.len();
            lowered.extend(ch.to_lowercase());
            let span = (pos, pos + ch.len_utf8());
            origin.extend(std::iter::repeat(span).take(lowered.len() - before));
        }

        lowered
            .match_indices(needle)
            .map(|(start, m)| {
                let from = origin.get(start).map_or(text.len(), |span| span.0);
                let to = match m.len() {
                    0 => from,
                    len => origin[start + len - 1].1,
                };
                MatchInfo::literal(from, &text[from..to])
            })
            .collect()
    }
}

impl fmt::Debug for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_pattern() { "Regex" } else { "Literal" };
        f.debug_struct("PatternSpec")
            .field("kind", &kind)
            .field("raw", &self.raw)
            .field("case_sensitive", &self.case_sensitive)
            .field("multiline", &self.multiline)
            .finish()
    }
}

/// 單一匹配的資訊
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    /// 匹配在單位文字中的起始位元組位置
    pub start: usize,
    pub end: usize,
    /// 匹配到的文字
    pub text: String,
    /// 捕獲群組（不含整體匹配）；純文字模式為空
    pub groups: Vec<Option<String>>,
    /// 具名捕獲群組
    pub named: HashMap<String, String>,
}

impl MatchInfo {
    fn literal(start: usize, text: &str) -> Self {
        Self {
            start,
            end: start + text.len(),
            text: text.to_string(),
            groups: Vec::new(),
            named: HashMap::new(),
        }
    }

    fn from_captures(regex: &Regex, caps: &regex::Captures<'_>) -> Self {
        let whole = caps.get(0);
        let groups = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();

        Self {
            start: whole.map_or(0, |m| m.start()),
            end: whole.map_or(0, |m| m.end()),
            text: whole.map(|m| m.as_str().to_string()).unwrap_or_default(),
            groups,
            named,
        }
    }

    /// 取得第 n 個捕獲群組（從 1 開始）
    pub fn group(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(|g| g.as_deref())
    }

    /// 取得具名捕獲群組
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// [`PatternSpec::match_all`] 的惰性迭代器
pub enum Matches<'p, 't> {
    Literal(std::vec::IntoIter<MatchInfo>),
    Regex {
        regex: &'p Regex,
        iter: regex::CaptureMatches<'p, 't>,
    },
}

impl Iterator for Matches<'_, '_> {
    type Item = MatchInfo;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Literal(iter) => iter.next(),
            Self::Regex { regex, iter } => iter
                .next()
                .map(|caps| MatchInfo::from_captures(regex, &caps)),
        }
    }
}

/// 可轉換為匹配模式的型別
///
/// 字串會被編譯為正則表達式；已編譯的 `Regex` 或 `PatternSpec` 直接採用。
pub trait IntoPatternSpec {
    fn into_pattern_spec(self) -> Result<PatternSpec, ConfigError>;
}

impl IntoPatternSpec for PatternSpec {
    fn into_pattern_spec(self) -> Result<PatternSpec, ConfigError> {
        Ok(self)
    }
}

impl IntoPatternSpec for Regex {
    fn into_pattern_spec(self) -> Result<PatternSpec, ConfigError> {
        Ok(PatternSpec::from_regex(self))
    }
}

impl IntoPatternSpec for &str {
    fn into_pattern_spec(self) -> Result<PatternSpec, ConfigError> {
        PatternSpec::regex(self)
    }
}

impl IntoPatternSpec for String {
    fn into_pattern_spec(self) -> Result<PatternSpec, ConfigError> {
        PatternSpec::regex(self)
    }
}

/// 將緩衝區切成行（處理 `\n` 與 `\r\n`）
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(|line| line.trim_end_matches('\r'))
}

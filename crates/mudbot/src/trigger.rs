//! Trigger（觸發器）模組
//!
//! 偵測收到的文字並執行反應

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;

use crate::context::BotContext;
use crate::error::{ConfigError, ReactionError};
use crate::pattern::{split_lines, MatchInfo, PatternOptions, PatternSpec};
use crate::registry::{Registered, Registry};

/// 反應完成後，派發是否繼續檢查後面的觸發器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Stop,
}

pub type ReactionResult = Result<Flow, ReactionError>;

/// 觸發器反應，每個匹配呼叫一次；參數為匹配所在的單位（行或整個緩衝區）與匹配資訊
pub type TriggerReaction =
    Arc<dyn Fn(&mut BotContext<'_>, &str, &MatchInfo) -> ReactionResult + Send + Sync>;

/// 觸發器選項
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOptions {
    pub name: String,
    pub group: String,
    pub enabled: bool,
    /// 派發順序，小的先執行
    pub sequence: i32,
    /// 匹配後停止檢查後面的觸發器
    pub stop_on_match: bool,
    /// false 時模式為純文字
    pub is_pattern: bool,
    pub case_sensitive: bool,
    /// true 時對整個緩衝區匹配
    pub multiline: bool,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: "all".to_string(),
            enabled: true,
            sequence: 100,
            stop_on_match: false,
            is_pattern: true,
            case_sensitive: true,
            multiline: false,
        }
    }
}

impl TriggerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn stop_on_match(mut self, stop: bool) -> Self {
        self.stop_on_match = stop;
        self
    }

    /// 將字串模式視為純文字
    pub fn literal(mut self) -> Self {
        self.is_pattern = false;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn multiline(mut self, multiline: bool) -> Self {
        self.multiline = multiline;
        self
    }

    pub fn pattern_options(&self) -> PatternOptions {
        PatternOptions {
            is_pattern: self.is_pattern,
            case_sensitive: self.case_sensitive,
            multiline: self.multiline,
        }
    }
}

/// 觸發器可接受的模式來源
///
/// 字串依 [`TriggerOptions`] 編譯；已編譯的模式直接採用。
pub trait IntoTriggerPattern {
    fn into_trigger_pattern(self, options: PatternOptions) -> Result<PatternSpec, ConfigError>;
}

impl IntoTriggerPattern for &str {
    fn into_trigger_pattern(self, options: PatternOptions) -> Result<PatternSpec, ConfigError> {
        PatternSpec::new(self, options)
    }
}

impl IntoTriggerPattern for String {
    fn into_trigger_pattern(self, options: PatternOptions) -> Result<PatternSpec, ConfigError> {
        PatternSpec::new(self, options)
    }
}

impl IntoTriggerPattern for &String {
    fn into_trigger_pattern(self, options: PatternOptions) -> Result<PatternSpec, ConfigError> {
        PatternSpec::new(self.as_str(), options)
    }
}

impl IntoTriggerPattern for Regex {
    fn into_trigger_pattern(self, _options: PatternOptions) -> Result<PatternSpec, ConfigError> {
        Ok(PatternSpec::from_regex(self))
    }
}

impl IntoTriggerPattern for PatternSpec {
    fn into_trigger_pattern(self, _options: PatternOptions) -> Result<PatternSpec, ConfigError> {
        Ok(self)
    }
}

/// 觸發器定義
pub struct Trigger {
    name: String,
    group: String,
    pattern: PatternSpec,
    sequence: i32,
    stop_on_match: bool,
    enabled: AtomicBool,
    /// 反應被呼叫的次數
    fire_count: AtomicU64,
    reaction: TriggerReaction,
}

impl Trigger {
    pub fn new<P, F>(pattern: P, options: TriggerOptions, reaction: F) -> Result<Self, ConfigError>
    where
        P: IntoTriggerPattern,
        F: Fn(&mut BotContext<'_>, &str, &MatchInfo) -> ReactionResult + Send + Sync + 'static,
    {
        if options.name.is_empty() {
            return Err(ConfigError::MissingName("trigger"));
        }
        let pattern = pattern.into_trigger_pattern(options.pattern_options())?;

        Ok(Self {
            name: options.name,
            group: options.group,
            pattern,
            sequence: options.sequence,
            stop_on_match: options.stop_on_match,
            enabled: AtomicBool::new(options.enabled),
            fire_count: AtomicU64::new(0),
            reaction: Arc::new(reaction),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn pattern(&self) -> &PatternSpec {
        &self.pattern
    }

    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    pub fn stop_on_match(&self) -> bool {
        self.stop_on_match
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::Relaxed)
    }

    /// 匹配單位：多行模式為整個緩衝區，否則逐行
    fn units<'t>(&self, buffer: &'t str) -> Box<dyn Iterator<Item = &'t str> + 't> {
        if self.pattern.multiline() {
            Box::new(std::iter::once(buffer))
        } else {
            Box::new(split_lines(buffer))
        }
    }

    /// 緩衝區中是否有任何匹配
    pub fn matches(&self, buffer: &str) -> bool {
        self.units(buffer).any(|unit| self.pattern.match_first(unit))
    }

    /// 對每個單位的每個匹配呼叫一次反應
    ///
    /// 回傳 [`Flow::Stop`] 表示派發應停止：`stop_on_match` 已設定，
    /// 或任一次反應回傳了 `Flow::Stop`。反應的錯誤會立即往外傳。
    pub fn fire(&self, ctx: &mut BotContext<'_>, buffer: &str) -> ReactionResult {
        let mut flow = if self.stop_on_match {
            Flow::Stop
        } else {
            Flow::Continue
        };

        for unit in self.units(buffer) {
            for m in self.pattern.match_all(unit) {
                self.fire_count.fetch_add(1, Ordering::Relaxed);
                if (self.reaction)(ctx, unit, &m)? == Flow::Stop {
                    flow = Flow::Stop;
                }
            }
        }
        Ok(flow)
    }
}

impl Registered for Trigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn order(&self) -> i32 {
        self.sequence
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("pattern", &self.pattern)
            .field("sequence", &self.sequence)
            .field("stop_on_match", &self.stop_on_match)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// 依 sequence 排序的觸發器註冊表
pub type TriggerRegistry = Registry<Trigger>;

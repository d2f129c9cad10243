//! 傳輸層介面
//!
//! 核心只透過這個最小介面使用連線；實作見 [`crate::telnet`]。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::pattern::{MatchInfo, PatternSpec};

/// `wait_for_pattern` 的匹配結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// 命中的模式在清單中的索引
    pub index: usize,
    /// 匹配到的文字
    pub text: String,
    /// 匹配之前被一併消耗的文字
    pub before: String,
}

/// 位元組串流連線
///
/// 寫入與讀取各自序列化，可同時被派發迴圈與計時器使用。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 寫入位元組
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// 等到有資料可讀；連線關閉時回傳 [`TransportError::Closed`]
    async fn wait_readable(&self) -> Result<(), TransportError>;

    /// 取出目前所有可讀資料，不阻塞（沒有資料時為空）
    async fn read_available(&self) -> Result<Bytes, TransportError>;

    /// 等待任一模式出現，逾時回傳 `None`
    ///
    /// 模式依清單順序檢查；命中後消耗到匹配結尾為止，其餘保留。
    async fn wait_for_pattern(
        &self,
        patterns: &[&PatternSpec],
        timeout: Duration,
    ) -> Result<Option<PatternMatch>, TransportError>;

    /// 關閉連線
    async fn close(&self);
}

/// 依清單順序找出第一個命中的模式
pub fn first_match(patterns: &[&PatternSpec], text: &str) -> Option<(usize, MatchInfo)> {
    patterns
        .iter()
        .enumerate()
        .find_map(|(index, pattern)| pattern.find(text).map(|m| (index, m)))
}

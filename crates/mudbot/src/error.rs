//! 錯誤型別
//!
//! 依關注點分成設定、登入握手、傳輸與反應錯誤，最後統一為 [`BotError`]。

use std::fmt;
use std::io;

use thiserror::Error;

/// 觸發器 / 計時器反應回傳的錯誤
///
/// 使用 boxed error，讓反應內可以對任何錯誤直接使用 `?`。
pub type ReactionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 設定錯誤：在建構時即失敗，不會延後到串流處理中途
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no username prompt configured")]
    NoUsernamePrompt,

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown template field {0:?} (expected username or password)")]
    UnknownTemplateField(String),

    #[error("malformed command template {0:?}")]
    MalformedTemplate(String),

    #[error("unknown text encoding {0:?}")]
    UnknownEncoding(String),

    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("a name is required to register a {0}")]
    MissingName(&'static str),
}

/// 傳輸層錯誤
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[from] io::Error),

    #[error("connect timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by remote")]
    Closed,

    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),
}

impl TransportError {
    /// 是否代表連線已中斷（對應 ConnectionBroken）
    pub fn is_broken(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::NotConnected | Self::ConnectionFailed(_)
        )
    }
}

/// 等待逾時的握手階段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// 等待帳號提示
    UsernamePrompt,
    /// 送出帳號後，等待錯誤帳號或密碼提示
    UsernameResult,
    /// 送出密碼後，等待錯誤密碼或登入成功
    PasswordResult,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::UsernamePrompt => "username prompt timeout",
            Self::UsernameResult => "ambiguous username/password-prompt timeout",
            Self::PasswordResult => "ambiguous password timeout",
        };
        f.write_str(reason)
    }
}

/// 登入握手錯誤，全部視為致命錯誤
#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("handshake timeout: {0}")]
    Timeout(HandshakeStage),

    #[error("handshake rejected: incorrect username")]
    IncorrectUsername,

    #[error("handshake rejected: incorrect password")]
    IncorrectPassword,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 反應的來源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionSource {
    Trigger,
    Timer,
}

impl fmt::Display for ReactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Timer => f.write_str("timer"),
        }
    }
}

/// 框架層級的錯誤
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{origin} {name:?} failed: {message}")]
    ReactionFault {
        origin: ReactionSource,
        name: String,
        message: String,
    },

    #[error("tokio runtime unavailable: {0}")]
    Runtime(String),
}

impl BotError {
    pub(crate) fn reaction_fault(
        origin: ReactionSource,
        name: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::ReactionFault {
            origin,
            name: name.to_string(),
            message: message.into(),
        }
    }
}

//! MUD Bot Library
//!
//! 自動化 MUD 機器人的核心：
//! - `login`: 以提示文字驅動的登入握手
//! - `trigger`: 依 sequence 排序的文字觸發器
//! - `timer`: 交給排程器的定時反應
//! - `dispatch`: 背景派發迴圈
//! - `telnet`: Telnet 傳輸
//! - `bot`: 把以上組合起來的 [`Bot`]

pub mod bot;
pub mod context;
mod dispatch;
pub mod encoding;
pub mod error;
pub mod login;
pub mod mudinfo;
pub mod pattern;
pub mod registry;
pub mod scheduler;
pub mod telnet;
pub mod timer;
pub mod transcript;
pub mod transport;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use bot::{Bot, BotBuilder, BotConfig, BotHandler, LoggingHandler};
pub use context::BotContext;
pub use encoding::TextCodec;
pub use error::{
    BotError, ConfigError, HandshakeStage, LoginError, ReactionError, ReactionSource,
    TransportError,
};
pub use login::{LineFraming, LoginSession, LoginState};
pub use mudinfo::{Credentials, MudInfo, MudInfoConfig};
pub use pattern::{MatchInfo, PatternOptions, PatternSpec};
pub use scheduler::{ScheduleSpec, Scheduler, TokioScheduler};
pub use telnet::TelnetTransport;
pub use timer::{Timer, TimerOptions, TimerRegistry};
pub use transcript::{Transcript, TranscriptFormat};
pub use transport::Transport;
pub use trigger::{Flow, Trigger, TriggerOptions, TriggerRegistry};

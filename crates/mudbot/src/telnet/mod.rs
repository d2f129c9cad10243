//! Telnet 協定模組
//!
//! 實作 [`Transport`](crate::transport::Transport) 的 Telnet 連線與協商處理

mod client;
mod protocol;

pub use client::{TelnetConfig, TelnetTransport};
pub use protocol::{
    negotiation_reply, Decoded, TelnetCommand, TelnetDecoder, TelnetEvent, TelnetOption, IAC,
};

//! Telnet 協定常數和解析
//!
//! 實作 RFC 854 的 IAC 命令剝離與選項協商回應

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    Se = 240,
    Nop = 241,
    DataMark = 242,
    Break = 243,
    InterruptProcess = 244,
    AbortOutput = 245,
    AreYouThere = 246,
    EraseCharacter = 247,
    EraseLine = 248,
    GoAhead = 249,
    Sb = 250,
    Will = 251,
    Wont = 252,
    Do = 253,
    Dont = 254,
}

impl TelnetCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let cmd = match byte {
            240 => Self::Se,
            241 => Self::Nop,
            242 => Self::DataMark,
            243 => Self::Break,
            244 => Self::InterruptProcess,
            245 => Self::AbortOutput,
            246 => Self::AreYouThere,
            247 => Self::EraseCharacter,
            248 => Self::EraseLine,
            249 => Self::GoAhead,
            250 => Self::Sb,
            251 => Self::Will,
            252 => Self::Wont,
            253 => Self::Do,
            254 => Self::Dont,
            _ => return None,
        };
        Some(cmd)
    }

    fn is_negotiation(self) -> bool {
        matches!(self, Self::Will | Self::Wont | Self::Do | Self::Dont)
    }
}

/// Telnet 選項（只列出需要辨識的幾個）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    Echo,
    SuppressGoAhead,
    TerminalType,
    Naws,
    Mccp2,
    Gmcp,
    Other(u8),
}

impl TelnetOption {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            86 => Self::Mccp2,
            201 => Self::Gmcp,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Mccp2 => 86,
            Self::Gmcp => 201,
            Self::Other(b) => b,
        }
    }

    /// 機器人只接受 ECHO 與 SUPPRESS-GO-AHEAD
    fn accepted(self) -> bool {
        matches!(self, Self::Echo | Self::SuppressGoAhead)
    }
}

/// 從資料流中分離出的 Telnet 事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// WILL / WONT / DO / DONT
    Negotiation(TelnetCommand, TelnetOption),
    /// IAC SB ... IAC SE
    Subnegotiation(TelnetOption, Vec<u8>),
    /// 其他雙位元組命令（NOP、GA 等）
    Command(u8),
}

/// 一次解析的結果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// 去除 IAC 序列後的資料位元組
    pub data: Vec<u8>,
    pub events: Vec<TelnetEvent>,
}

/// 有狀態的 Telnet 解析器
///
/// 不完整的 IAC 序列會保留到下一次 `feed`。
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    pending: Vec<u8>,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析新到的位元組
    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut out = Decoded::default();
        let mut i = 0;

        while i < buf.len() {
            if buf[i] != IAC {
                out.data.push(buf[i]);
                i += 1;
                continue;
            }

            let Some(&byte) = buf.get(i + 1) else {
                break;
            };

            if byte == IAC {
                out.data.push(IAC);
                i += 2;
                continue;
            }

            match TelnetCommand::from_byte(byte) {
                Some(cmd) if cmd.is_negotiation() => {
                    let Some(&option) = buf.get(i + 2) else {
                        break;
                    };
                    out.events
                        .push(TelnetEvent::Negotiation(cmd, TelnetOption::from_byte(option)));
                    i += 3;
                }
                Some(TelnetCommand::Sb) => {
                    let Some(end) = find_subnegotiation_end(&buf, i + 2) else {
                        break;
                    };
                    let option = TelnetOption::from_byte(buf[i + 2]);
                    out.events.push(TelnetEvent::Subnegotiation(
                        option,
                        buf[i + 3..end].to_vec(),
                    ));
                    i = end + 2;
                }
                _ => {
                    out.events.push(TelnetEvent::Command(byte));
                    i += 2;
                }
            }
        }

        if i < buf.len() {
            self.pending = buf[i..].to_vec();
        }
        out
    }
}

/// 找出 `IAC SE` 的位置；`from` 指向選項位元組
fn find_subnegotiation_end(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    (from + 1..buf.len().saturating_sub(1))
        .find(|&j| buf[j] == IAC && buf[j + 1] == TelnetCommand::Se as u8)
}

/// 產生協商回應：ECHO / SGA 同意，其餘一律拒絕
pub fn negotiation_reply(cmd: TelnetCommand, option: TelnetOption) -> Option<[u8; 3]> {
    let response = match (cmd, option.accepted()) {
        (TelnetCommand::Will, true) => TelnetCommand::Do,
        (TelnetCommand::Will, false) => TelnetCommand::Dont,
        (TelnetCommand::Do, true) => TelnetCommand::Will,
        (TelnetCommand::Do, false) => TelnetCommand::Wont,
        _ => return None,
    };
    Some([IAC, response as u8, option.as_byte()])
}

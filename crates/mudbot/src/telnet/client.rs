//! Telnet 連線
//!
//! 非同步 Telnet 傳輸：讀寫各自加鎖，IAC 協商在讀取時即時回應

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::protocol::{negotiation_reply, TelnetDecoder, TelnetEvent};
use crate::encoding::TextCodec;
use crate::error::TransportError;
use crate::pattern::PatternSpec;
use crate::transport::{first_match, PatternMatch, Transport};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Telnet 連線配置
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// 連線逾時
    pub connect_timeout: Duration,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 比對握手提示時使用的文字編碼
    pub codec: TextCodec,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 8192,
            codec: TextCodec::default(),
        }
    }
}

struct ReadState {
    stream: Option<BoxedReader>,
    decoder: TelnetDecoder,
    /// 已剝離 Telnet 協定、尚未被取走的資料
    pending: BytesMut,
    eof: bool,
}

/// Telnet 傳輸
pub struct TelnetTransport {
    reader: Mutex<ReadState>,
    writer: Mutex<Option<BoxedWriter>>,
    config: TelnetConfig,
}

impl TelnetTransport {
    /// 連線到 MUD 伺服器
    pub async fn connect(host: &str, port: u16, config: TelnetConfig) -> Result<Self, TransportError> {
        info!("connecting to {}:{}", host, port);

        let addr = format!("{}:{}", host, port);
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| TransportError::DnsResolutionFailed(e.to_string()))?
            .collect();

        let Some(target) = socket_addrs.first() else {
            return Err(TransportError::DnsResolutionFailed(format!(
                "no address for host {}",
                host
            )));
        };
        debug!("resolved addresses: {:?}", socket_addrs);

        let stream = timeout(config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::Timeout)??;
        stream.set_nodelay(true)?;

        info!("connected to {}:{}", host, port);
        let (read_half, write_half) = stream.into_split();
        Ok(Self::from_parts(Box::new(read_half), Box::new(write_half), config))
    }

    /// 包裝任意雙向串流（測試或自訂通道）
    pub fn from_stream<S>(stream: S, config: TelnetConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(Box::new(read_half), Box::new(write_half), config)
    }

    fn from_parts(reader: BoxedReader, writer: BoxedWriter, config: TelnetConfig) -> Self {
        Self {
            reader: Mutex::new(ReadState {
                stream: Some(reader),
                decoder: TelnetDecoder::new(),
                pending: BytesMut::new(),
                eof: false,
            }),
            writer: Mutex::new(Some(writer)),
            config,
        }
    }

    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// 從 socket 讀一次並處理 Telnet 協定
    async fn fill(&self, state: &mut ReadState) -> Result<(), TransportError> {
        let stream = state.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; self.config.read_buffer_size];
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            state.eof = true;
            info!("connection closed by remote");
            return Err(TransportError::Closed);
        }
        trace!("read {} raw bytes", n);

        let decoded = state.decoder.feed(&buffer[..n]);
        state.pending.extend_from_slice(&decoded.data);

        for event in decoded.events {
            if let TelnetEvent::Negotiation(cmd, option) = event {
                if let Some(reply) = negotiation_reply(cmd, option) {
                    debug!("negotiation {:?} {:?} -> {:?}", cmd, option, reply);
                    if let Err(e) = self.send(&reply).await {
                        warn!("failed to answer telnet negotiation: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

fn classify_write_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::ConnectionFailed(err),
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        writer.write_all(data).await.map_err(classify_write_error)?;
        writer.flush().await.map_err(classify_write_error)?;
        trace!("sent {} bytes", data.len());
        Ok(())
    }

    async fn wait_readable(&self) -> Result<(), TransportError> {
        let mut state = self.reader.lock().await;
        loop {
            if !state.pending.is_empty() {
                return Ok(());
            }
            if state.eof {
                return Err(TransportError::Closed);
            }
            self.fill(&mut state).await?;
        }
    }

    async fn read_available(&self) -> Result<Bytes, TransportError> {
        let mut state = self.reader.lock().await;
        if state.pending.is_empty() && state.eof {
            return Err(TransportError::Closed);
        }
        Ok(state.pending.split().freeze())
    }

    async fn wait_for_pattern(
        &self,
        patterns: &[&PatternSpec],
        wait: Duration,
    ) -> Result<Option<PatternMatch>, TransportError> {
        let deadline = Instant::now() + wait;
        let mut state = self.reader.lock().await;

        loop {
            let text = self.config.codec.decode(&state.pending);
            if let Some((index, m)) = first_match(patterns, &text) {
                // 保留原始位元組，尾端未完整的字元留給下一次讀取
                let consumed = self.config.codec.raw_len(&state.pending, m.end);
                let _ = state.pending.split_to(consumed);
                debug!("pattern #{} matched {:?}", index, m.text);
                return Ok(Some(PatternMatch {
                    index,
                    before: text[..m.start].to_string(),
                    text: m.text,
                }));
            }

            if state.eof {
                return Err(TransportError::Closed);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match timeout(remaining, self.fill(&mut state)).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let mut state = self.reader.lock().await;
        state.stream = None;
        state.eof = true;
        info!("connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternOptions;
    use crate::telnet::protocol::{TelnetCommand, IAC};

    #[test]
    fn test_config_default() {
        let config = TelnetConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.codec, TextCodec::utf8());
    }

    #[tokio::test]
    async fn test_negotiation_is_answered_and_stripped() {
        let mut incoming = vec![IAC, TelnetCommand::Will as u8, 1];
        incoming.extend_from_slice(b"login:");
        let mock = tokio_test::io::Builder::new()
            .read(&incoming)
            .write(&[IAC, TelnetCommand::Do as u8, 1])
            .build();

        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        transport.wait_readable().await.unwrap();
        let data = transport.read_available().await.unwrap();
        assert_eq!(&data[..], b"login:");
    }

    #[tokio::test]
    async fn test_wait_for_pattern_keeps_remainder() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Welcome!\r\nlog")
            .read(b"in: extra")
            .build();

        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        let prompt = PatternSpec::regex("login:").unwrap();
        let m = transport
            .wait_for_pattern(&[&prompt], Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(m.index, 0);
        assert_eq!(m.text, "login:");
        assert_eq!(m.before, "Welcome!\r\n");
        let rest = transport.read_available().await.unwrap();
        assert_eq!(&rest[..], b" extra");
    }

    #[tokio::test]
    async fn test_wait_for_pattern_keeps_split_multibyte_tail() {
        // "你" = e4 bd a0，第一個位元組與提示一起到達
        let mock = tokio_test::io::Builder::new()
            .read(b"login:\xe4")
            .read(b"\xbd\xa0")
            .build();

        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        let prompt = PatternSpec::literal("login:");
        let m = transport
            .wait_for_pattern(&[&prompt], Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.text, "login:");

        let head = transport.read_available().await.unwrap();
        assert_eq!(&head[..], &[0xe4]);
        transport.wait_readable().await.unwrap();
        let tail = transport.read_available().await.unwrap();
        let joined = [&head[..], &tail[..]].concat();
        assert_eq!(TextCodec::utf8().decode(&joined), "你");
    }

    #[tokio::test]
    async fn test_wait_for_pattern_keeps_split_big5_tail() {
        // Big5 "你" = a7 41
        let mock = tokio_test::io::Builder::new()
            .read(b"login:\xa7")
            .build();
        let config = TelnetConfig {
            codec: TextCodec::big5(),
            ..TelnetConfig::default()
        };

        let transport = TelnetTransport::from_stream(mock, config);
        let prompt = PatternSpec::literal("login:");
        transport
            .wait_for_pattern(&[&prompt], Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let rest = transport.read_available().await.unwrap();
        assert_eq!(&rest[..], &[0xa7]);
    }

    #[tokio::test]
    async fn test_wait_for_pattern_with_case_folding_prefix() {
        let mock = tokio_test::io::Builder::new()
            .read("İİİ LOGIN: extra".as_bytes())
            .build();

        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        let prompt = PatternSpec::new(
            "login:",
            PatternOptions {
                is_pattern: false,
                case_sensitive: false,
                multiline: false,
            },
        )
        .unwrap();
        let m = transport
            .wait_for_pattern(&[&prompt], Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(m.text, "LOGIN:");
        assert_eq!(m.before, "İİİ ");
        let rest = transport.read_available().await.unwrap();
        assert_eq!(&rest[..], b" extra");
    }

    #[tokio::test]
    async fn test_wait_for_pattern_reports_eof() {
        let mock = tokio_test::io::Builder::new().read(b"bye").build();
        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        let prompt = PatternSpec::regex("login:").unwrap();

        let result = transport
            .wait_for_pattern(&[&prompt], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_send_writes_bytes() {
        let mock = tokio_test::io::Builder::new().write(b"look\n").build();
        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        transport.send(b"look\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let mock = tokio_test::io::Builder::new().build();
        let transport = TelnetTransport::from_stream(mock, TelnetConfig::default());
        transport.close().await;

        let result = transport.send(b"look\n").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(matches!(
            transport.wait_readable().await,
            Err(TransportError::Closed)
        ));
    }
}

//! 登入握手
//!
//! 依 [`MudInfo`] 描述逐步完成帳號、密碼交換。每個等待都有逾時，
//! 失敗一律視為致命錯誤，由呼叫端中斷連線。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::encoding::TextCodec;
use crate::error::{ConfigError, HandshakeStage, LoginError};
use crate::mudinfo::{Commands, Credentials, MudInfo};
use crate::pattern::PatternSpec;
use crate::transport::Transport;

/// 預設的等待逾時
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 握手狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    AwaitUsernamePrompt,
    AwaitUsernameResult,
    SendPassword,
    AwaitPasswordResult,
    LoggedIn,
}

/// 每條命令送出時加上的前後綴
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFraming {
    pub prefix: String,
    pub suffix: String,
}

impl Default for LineFraming {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: "\n".to_string(),
        }
    }
}

/// 結果等待時命中的是哪一個模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Wrong,
    Positive,
}

/// 一次連線的登入流程
pub struct LoginSession<'a> {
    transport: &'a dyn Transport,
    info: &'a MudInfo,
    credentials: &'a Credentials,
    timeout: Duration,
    codec: TextCodec,
    framing: LineFraming,
    state: LoginState,
}

impl<'a> LoginSession<'a> {
    pub fn new(transport: &'a dyn Transport, info: &'a MudInfo, credentials: &'a Credentials) -> Self {
        Self {
            transport,
            info,
            credentials,
            timeout: DEFAULT_LOGIN_TIMEOUT,
            codec: TextCodec::default(),
            framing: LineFraming::default(),
            state: LoginState::Start,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_codec(mut self, codec: TextCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_framing(mut self, framing: LineFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// 執行到登入成功或失敗
    pub async fn run(&mut self) -> Result<(), LoginError> {
        while self.state != LoginState::LoggedIn {
            self.step().await?;
        }
        info!("login complete");
        Ok(())
    }

    /// 推進一個狀態
    pub async fn step(&mut self) -> Result<LoginState, LoginError> {
        let next = match self.state {
            LoginState::Start => {
                if self.info.username_prompt.is_none() {
                    return Err(ConfigError::NoUsernamePrompt.into());
                }
                self.send_all(&self.info.pre_username).await?;
                LoginState::AwaitUsernamePrompt
            }
            LoginState::AwaitUsernamePrompt => {
                let prompt = self
                    .info
                    .username_prompt
                    .as_ref()
                    .ok_or(ConfigError::NoUsernamePrompt)?;
                if self.transport.wait_for_pattern(&[prompt], self.timeout).await?.is_none() {
                    return Err(LoginError::Timeout(HandshakeStage::UsernamePrompt));
                }
                let line = match &self.info.username_command {
                    Some(template) => template.render(self.credentials)?,
                    None => self.credentials.username()?.to_string(),
                };
                debug!("sending username");
                self.send_line(&line).await?;
                LoginState::AwaitUsernameResult
            }
            LoginState::AwaitUsernameResult => {
                let prompt = self.info.password_prompt.as_ref();
                match self
                    .await_result(self.info.username_wrong.as_ref(), prompt)
                    .await?
                {
                    Some(Outcome::Wrong) => return Err(LoginError::IncorrectUsername),
                    Some(Outcome::Positive) => {
                        self.send_all(&self.info.post_username).await?;
                        if self.info.password_command.is_some() {
                            LoginState::SendPassword
                        } else {
                            LoginState::LoggedIn
                        }
                    }
                    None if prompt.is_some() => {
                        return Err(LoginError::Timeout(HandshakeStage::UsernameResult));
                    }
                    None => {
                        warn!("no password prompt configured; assuming login succeeded");
                        LoginState::LoggedIn
                    }
                }
            }
            LoginState::SendPassword => {
                self.send_all(&self.info.pre_password).await?;
                if let Some(template) = &self.info.password_command {
                    let line = template.render(self.credentials)?;
                    debug!("sending password");
                    self.send_line(&line).await?;
                }
                LoginState::AwaitPasswordResult
            }
            LoginState::AwaitPasswordResult => {
                let correct = self.info.password_correct.as_ref();
                match self
                    .await_result(self.info.password_wrong.as_ref(), correct)
                    .await?
                {
                    Some(Outcome::Wrong) => return Err(LoginError::IncorrectPassword),
                    Some(Outcome::Positive) => {}
                    None if correct.is_some() => {
                        return Err(LoginError::Timeout(HandshakeStage::PasswordResult));
                    }
                    None => warn!("no success marker configured; assuming password accepted"),
                }
                self.send_all(&self.info.post_password).await?;
                LoginState::LoggedIn
            }
            LoginState::LoggedIn => LoginState::LoggedIn,
        };

        debug!("login state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(next)
    }

    /// 等待錯誤或成功標記；沒有任何模式可等時視同逾時
    async fn await_result(
        &self,
        wrong: Option<&PatternSpec>,
        positive: Option<&PatternSpec>,
    ) -> Result<Option<Outcome>, LoginError> {
        let mut patterns = Vec::with_capacity(2);
        let mut outcomes = Vec::with_capacity(2);
        if let Some(p) = wrong {
            patterns.push(p);
            outcomes.push(Outcome::Wrong);
        }
        if let Some(p) = positive {
            patterns.push(p);
            outcomes.push(Outcome::Positive);
        }
        if patterns.is_empty() {
            return Ok(None);
        }

        let matched = self.transport.wait_for_pattern(&patterns, self.timeout).await?;
        Ok(matched.map(|m| outcomes[m.index]))
    }

    async fn send_all(&self, commands: &Commands) -> Result<(), LoginError> {
        for command in commands.iter() {
            self.send_line(command).await?;
        }
        Ok(())
    }

    async fn send_line(&self, line: &str) -> Result<(), LoginError> {
        let framed = format!("{}{}{}", self.framing.prefix, line, self.framing.suffix);
        self.transport.send(&self.codec.encode(&framed)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;

    fn happy_info() -> MudInfo {
        MudInfo::builder()
            .username_prompt("login:")
            .password_prompt("password:")
            .password_command("%(password)s")
            .password_correct("welcome")
            .build()
            .unwrap()
    }

    fn creds() -> Credentials {
        Credentials::new("bob", "hunter2")
    }

    #[tokio::test]
    async fn test_happy_path() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:")
            .reply("welcome");
        let info = happy_info();
        let creds = creds();

        let mut session = LoginSession::new(&transport, &info, &creds);
        session.run().await.unwrap();
        assert_eq!(session.state(), LoginState::LoggedIn);
        assert_eq!(transport.sent(), vec!["bob", "hunter2"]);
    }

    #[tokio::test]
    async fn test_wrong_username() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("no such character");
        let info = MudInfo::builder()
            .username_prompt("login:")
            .username_wrong("no such character")
            .password_prompt("password:")
            .password_command("%(password)s")
            .build()
            .unwrap();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::IncorrectUsername));
        assert!(err.to_string().contains("incorrect username"));
        assert_eq!(transport.sent(), vec!["bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_username_prompt_timeout() {
        let transport = ScriptedTransport::new().greeting("Welcome to the game");
        let info = MudInfo::builder()
            .pre_username("")
            .username_prompt("login:")
            .build()
            .unwrap();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .with_timeout(Duration::from_secs(3))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::Timeout(HandshakeStage::UsernamePrompt)
        ));
        assert!(err.to_string().contains("timeout"));
        // 只送出了 pre_username
        assert_eq!(transport.sent(), vec![""]);
    }

    #[tokio::test]
    async fn test_missing_prompt_fails_before_sending() {
        let transport = ScriptedTransport::new();
        let info = MudInfo::builder().pre_username("hello").build().unwrap();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::Config(ConfigError::NoUsernamePrompt)
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:")
            .reply("Wrong password.");
        let info = MudInfo::builder()
            .username_prompt("login:")
            .password_prompt("password:")
            .password_wrong("Wrong password")
            .password_command("%(password)s")
            .build()
            .unwrap();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::IncorrectPassword));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_password_prompt_timeout() {
        let transport = ScriptedTransport::new().greeting("login:").reply("...");
        let info = MudInfo::builder()
            .username_prompt("login:")
            .password_prompt("password:")
            .password_command("%(password)s")
            .build()
            .unwrap();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::Timeout(HandshakeStage::UsernameResult)
        ));
        assert!(err.to_string().contains("ambiguous"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_password_prompt_assumes_success() {
        let transport = ScriptedTransport::new().greeting("Name:");
        let info = MudInfo::builder()
            .username_prompt("Name:")
            .username_command("connect %(username)s %(password)s")
            .post_username("look")
            .build()
            .unwrap();
        let creds = creds();

        LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap();
        // 逾時視為成功，不送 post_username
        assert_eq!(transport.sent(), vec!["connect bob hunter2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_timeout_without_marker_sends_post_password() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:");
        let info = MudInfo::builder()
            .username_prompt("login:")
            .password_prompt("password:")
            .password_wrong("Wrong password")
            .password_command("%(password)s")
            .pre_password(&["", "y"][..])
            .post_password("look")
            .build()
            .unwrap();
        let creds = creds();

        LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap();
        assert_eq!(transport.sent(), vec!["bob", "", "y", "hunter2", "look"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_timeout_with_marker_fails() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:");
        let info = happy_info();
        let creds = creds();

        let err = LoginSession::new(&transport, &info, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::Timeout(HandshakeStage::PasswordResult)
        ));
    }

    #[tokio::test]
    async fn test_prompt_without_password_command_succeeds() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:");
        let info = MudInfo::builder()
            .username_prompt("login:")
            .password_prompt("password:")
            .post_username("look")
            .build()
            .unwrap();
        let creds = creds();

        let mut session = LoginSession::new(&transport, &info, &creds);
        session.run().await.unwrap();
        assert_eq!(transport.sent(), vec!["bob", "look"]);
    }

    #[tokio::test]
    async fn test_framing_and_step_states() {
        let transport = ScriptedTransport::new()
            .greeting("login:")
            .reply("password:")
            .reply("welcome");
        let info = happy_info();
        let creds = creds();

        let mut session = LoginSession::new(&transport, &info, &creds).with_framing(LineFraming {
            prefix: ">".to_string(),
            suffix: "\r\n".to_string(),
        });
        let mut states = Vec::new();
        while session.state() != LoginState::LoggedIn {
            states.push(session.step().await.unwrap());
        }
        assert_eq!(
            states,
            vec![
                LoginState::AwaitUsernamePrompt,
                LoginState::AwaitUsernameResult,
                LoginState::SendPassword,
                LoginState::AwaitPasswordResult,
                LoginState::LoggedIn,
            ]
        );
        assert_eq!(transport.sent(), vec![">bob\r", ">hunter2\r"]);
    }
}

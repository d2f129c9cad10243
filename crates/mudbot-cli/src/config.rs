//! Profile 設定檔
//!
//! 一個 Profile 描述一個 MUD 帳號：連線資訊、帳密、登入握手、
//! 機器人設定，以及只會送出命令的簡單觸發器與計時器。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDateTime};
use mudbot::error::ConfigError;
use mudbot::mudinfo::{Credentials, MudInfoConfig};
use mudbot::pattern::MatchInfo;
use mudbot::scheduler::ScheduleSpec;
use mudbot::transcript::{Transcript, TranscriptFormat};
use mudbot::{Bot, BotConfig, Flow, TimerOptions, TriggerOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 連線設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    23
}

fn default_true() -> bool {
    true
}

fn default_group() -> String {
    "all".to_string()
}

fn default_sequence() -> i32 {
    100
}

/// 帳密；命令列參數會覆蓋這裡的值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// 觸發器設定：匹配時送出命令，命令中的 `$1`..`$9` 以捕獲群組替換
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub is_regexp: bool,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_sequence")]
    pub sequence: i32,
    #[serde(default)]
    pub stop_processing: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub send: Vec<String>,
}

impl TriggerConfig {
    pub fn options(&self) -> TriggerOptions {
        let options = TriggerOptions::new(&self.name)
            .group(&self.group)
            .enabled(self.enabled)
            .sequence(self.sequence)
            .stop_on_match(self.stop_processing)
            .case_sensitive(self.case_sensitive)
            .multiline(self.multiline);
        if self.is_regexp {
            options
        } else {
            options.literal()
        }
    }
}

/// 計時器設定：`every_secs`、`cron`、`at` 三選一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub run_limit: Option<u32>,
    #[serde(default)]
    pub every_secs: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
    /// RFC 3339 或本地時間 `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub at: Option<String>,
    #[serde(default)]
    pub send: Vec<String>,
}

impl TimerConfig {
    pub fn schedule(&self) -> Result<ScheduleSpec, ConfigError> {
        match (self.every_secs, self.cron.as_deref(), self.at.as_deref()) {
            (Some(secs), None, None) => Ok(ScheduleSpec::every(Duration::from_secs(secs))),
            (None, Some(expr), None) => ScheduleSpec::cron(expr),
            (None, None, Some(at)) => parse_local_time(at).map(ScheduleSpec::at),
            _ => Err(ConfigError::InvalidSchedule(format!(
                "timer {:?} needs exactly one of every_secs, cron or at",
                self.name
            ))),
        }
    }

    pub fn options(&self) -> TimerOptions {
        let mut options = TimerOptions::new(&self.name)
            .group(&self.group)
            .enabled(self.enabled);
        if self.one_shot {
            options = options.one_shot();
        }
        if let Some(limit) = self.run_limit {
            options = options.run_limit(limit);
        }
        options
    }
}

fn parse_local_time(value: &str) -> Result<DateTime<Local>, ConfigError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Local));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .ok_or_else(|| ConfigError::InvalidSchedule(format!("invalid time {:?}", value)))
}

/// 對話記錄設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: TranscriptFormat,
}

/// 單一帳號 / 伺服器的完整設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// 登入握手
    #[serde(default)]
    pub login: MudInfoConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub timers: Vec<TimerConfig>,
    #[serde(default)]
    pub transcript: Option<TranscriptConfig>,
}

impl Profile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to parse profile {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// 合併命令列提供的帳密
    pub fn credentials(&self, username: Option<String>, password: Option<String>) -> Credentials {
        Credentials {
            username: username.or_else(|| self.credentials.username.clone()),
            password: password.or_else(|| self.credentials.password.clone()),
        }
    }

    /// 開啟對話記錄；`override_path` 優先於設定檔
    pub fn open_transcript(&self, override_path: Option<&Path>) -> anyhow::Result<Option<Transcript>> {
        let format = self
            .transcript
            .as_ref()
            .map(|t| t.format)
            .unwrap_or_default();
        let path = match (override_path, &self.transcript) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(config)) => config.path.clone(),
            (None, None) => return Ok(None),
        };

        let mut transcript = Transcript::new(format);
        transcript
            .start(&path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        Ok(Some(transcript))
    }

    /// 註冊設定檔中的觸發器與計時器
    pub fn register(&self, bot: &Bot) -> Result<(), ConfigError> {
        for trigger in &self.triggers {
            let commands = trigger.send.clone();
            bot.register_trigger(trigger.pattern.as_str(), trigger.options(), move |ctx, _, m| {
                for command in &commands {
                    ctx.send(expand_captures(command, m));
                }
                Ok(Flow::Continue)
            })?;
        }

        for timer in &self.timers {
            let commands = timer.send.clone();
            bot.register_timer(timer.schedule()?, timer.options(), move |ctx| {
                for command in &commands {
                    ctx.send(command.clone());
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}

/// 替換 `$1`..`$9` 為捕獲群組；不存在的群組替換為空字串
pub fn expand_captures(template: &str, m: &MatchInfo) -> String {
    let mut expanded = template.to_string();
    for i in 1..=9 {
        let placeholder = format!("${}", i);
        if expanded.contains(&placeholder) {
            expanded = expanded.replace(&placeholder, m.group(i).unwrap_or_default());
        }
    }
    expanded
}

/// 預設的 Profile 目錄
pub fn profiles_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mudbot")
        .join("profiles")
}

/// 參數是既有檔案時直接使用，否則視為 Profile 目錄中的名稱
pub fn resolve_profile_path(arg: &str) -> PathBuf {
    let path = PathBuf::from(arg);
    if path.is_file() {
        path
    } else {
        profiles_dir().join(format!("{}.json", arg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mudbot::mudinfo::MudInfo;
    use mudbot::pattern::PatternSpec;
    use mudbot::telnet::{TelnetConfig, TelnetTransport};
    use tokio::io::AsyncReadExt;

    const ALTER_AEON: &str = include_str!("../profiles/alter_aeon.json");

    #[test]
    fn test_sample_profile_loads() {
        let profile = Profile::from_json(ALTER_AEON).unwrap();
        assert_eq!(profile.connection.host, "alteraeon.com");
        assert_eq!(profile.connection.port, 3000);

        let info = MudInfo::from_config(&profile.login).unwrap();
        assert!(info.validate().is_ok());
        assert!(info.password_correct.is_none());
        assert!(info
            .username_prompt
            .as_ref()
            .unwrap()
            .match_first("Would you like to create a new character? "));

        for timer in &profile.timers {
            assert!(timer.schedule().is_ok());
        }
    }

    #[test]
    fn test_minimal_profile_uses_defaults() {
        let profile = Profile::from_json(r#"{"connection": {"host": "localhost"}}"#).unwrap();
        assert_eq!(profile.connection.port, 23);
        assert_eq!(profile.bot, BotConfig::default());
        assert!(profile.triggers.is_empty());
        assert!(profile.transcript.is_none());
    }

    #[test]
    fn test_unknown_login_field_is_rejected() {
        let result = Profile::from_json(
            r#"{"connection": {"host": "localhost"}, "login": {"username_promt": "login:"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_command_line_credentials_win() {
        let profile = Profile::from_json(
            r#"{"connection": {"host": "h"}, "credentials": {"username": "bob", "password": "old"}}"#,
        )
        .unwrap();
        let creds = profile.credentials(None, Some("new".to_string()));
        assert_eq!(creds.username().unwrap(), "bob");
        assert_eq!(creds.password().unwrap(), "new");
    }

    #[test]
    fn test_expand_captures() {
        let spec = PatternSpec::regex(r"(\w+) gives you (\d+) coins").unwrap();
        let m = spec.find("Bob gives you 50 coins").unwrap();
        assert_eq!(expand_captures("thank $1 for $2", &m), "thank Bob for 50");
        assert_eq!(expand_captures("say $3", &m), "say ");
        assert_eq!(expand_captures("look", &m), "look");
    }

    #[test]
    fn test_trigger_options() {
        let config: TriggerConfig =
            serde_json::from_str(r#"{"name": "hi", "pattern": "Hello", "is_regexp": false, "case_sensitive": false}"#)
                .unwrap();
        let options = config.options();
        assert!(!options.is_pattern);
        assert!(!options.case_sensitive);
        assert_eq!(options.group, "all");
        assert_eq!(options.sequence, 100);
    }

    #[test]
    fn test_timer_schedules() {
        let timer = |json: &str| -> TimerConfig { serde_json::from_str(json).unwrap() };

        assert!(matches!(
            timer(r#"{"name": "a", "every_secs": 60}"#).schedule(),
            Ok(ScheduleSpec::Interval(_))
        ));
        assert!(matches!(
            timer(r#"{"name": "b", "cron": "0 * * * *"}"#).schedule(),
            Ok(ScheduleSpec::Cron(_))
        ));
        assert!(matches!(
            timer(r#"{"name": "c", "at": "2030-01-01T12:00:00+00:00"}"#).schedule(),
            Ok(ScheduleSpec::Date(_))
        ));
        assert!(matches!(
            timer(r#"{"name": "d", "at": "2030-01-01 12:00:00"}"#).schedule(),
            Ok(ScheduleSpec::Date(_))
        ));
        assert!(timer(r#"{"name": "e"}"#).schedule().is_err());
        assert!(timer(r#"{"name": "f", "every_secs": 1, "cron": "* * * * *"}"#)
            .schedule()
            .is_err());
        assert!(timer(r#"{"name": "g", "at": "tomorrow"}"#).schedule().is_err());
    }

    #[test]
    fn test_timer_options() {
        let config: TimerConfig =
            serde_json::from_str(r#"{"name": "save", "group": "upkeep", "run_limit": 3, "every_secs": 600}"#)
                .unwrap();
        let options = config.options();
        assert_eq!(options.group, "upkeep");
        assert_eq!(options.run_limit, Some(3));
        assert!(!options.one_shot);
    }

    #[test]
    fn test_resolve_profile_path() {
        assert_eq!(
            resolve_profile_path("no_such_profile"),
            profiles_dir().join("no_such_profile.json")
        );
        let existing = concat!(env!("CARGO_MANIFEST_DIR"), "/profiles/alter_aeon.json");
        assert_eq!(resolve_profile_path(existing), PathBuf::from(existing));
    }

    fn offline_bot() -> (Bot, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let transport = TelnetTransport::from_stream(client, TelnetConfig::default());
        let bot = Bot::builder()
            .config(BotConfig {
                manage_login: false,
                ..BotConfig::default()
            })
            .build(Arc::new(transport))
            .unwrap();
        (bot, server)
    }

    #[tokio::test]
    async fn test_register_profile_reactions() {
        let profile = Profile::from_json(
            r#"{
                "connection": {"host": "h"},
                "triggers": [{"name": "thanks", "pattern": "(\\w+) gives you (\\d+) coins", "send": ["thank $1"]}],
                "timers": [{"name": "save", "every_secs": 600, "send": ["save"]}]
            }"#,
        )
        .unwrap();
        let (bot, mut server) = offline_bot();
        profile.register(&bot).unwrap();
        assert_eq!(bot.triggers().names(), vec!["thanks"]);
        assert_eq!(bot.timers().names(), vec!["save"]);

        bot.dispatch_text("Bob gives you 5 coins\r\n").await.unwrap();
        let mut buf = vec![0u8; "thank Bob\n".len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"thank Bob\n");
        bot.disconnect().await;
    }

    #[tokio::test]
    async fn test_register_rejects_bad_pattern() {
        let profile = Profile::from_json(
            r#"{"connection": {"host": "h"}, "triggers": [{"name": "bad", "pattern": "(unclosed"}]}"#,
        )
        .unwrap();
        let (bot, _server) = offline_bot();
        assert!(matches!(
            profile.register(&bot),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(bot.triggers().is_empty());
    }
}

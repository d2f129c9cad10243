//! 登入握手描述（mud_info）
//!
//! 每個 MUD 的提示字串、錯誤訊息與登入命令都不同，這裡將設定正規化為
//! 驗證過的 [`MudInfo`]：字串模式在建構時就編譯，命令模板在建構時就解析。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pattern::{IntoPatternSpec, PatternSpec};

/// 登入帳密
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn username(&self) -> Result<&str, ConfigError> {
        self.username
            .as_deref()
            .ok_or(ConfigError::MissingCredential("username"))
    }

    pub fn password(&self) -> Result<&str, ConfigError> {
        self.password
            .as_deref()
            .ok_or(ConfigError::MissingCredential("password"))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 依序送出的命令列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commands(Vec<String>);

impl Commands {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for Commands {
    fn from(command: &str) -> Self {
        Self(vec![command.to_string()])
    }
}

impl From<String> for Commands {
    fn from(command: String) -> Self {
        Self(vec![command])
    }
}

impl From<Vec<String>> for Commands {
    fn from(commands: Vec<String>) -> Self {
        Self(commands)
    }
}

impl From<&[&str]> for Commands {
    fn from(commands: &[&str]) -> Self {
        Self(commands.iter().map(|c| c.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Username,
    Password,
}

/// 命令模板，支援 `%(username)s`、`%(password)s` 與 `%%`
///
/// # Example
/// ```
/// use mudbot::mudinfo::{CommandTemplate, Credentials};
///
/// let template = CommandTemplate::parse("connect %(username)s %(password)s").unwrap();
/// let line = template.render(&Credentials::new("bob", "hunter2")).unwrap();
/// assert_eq!(line, "connect bob hunter2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedTemplate(source.to_string());
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                text.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => text.push('%'),
                Some('(') => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some(')') => break,
                            Some(ch) => field.push(ch),
                            None => return Err(malformed()),
                        }
                    }
                    if chars.next() != Some('s') {
                        return Err(malformed());
                    }
                    let segment = match field.as_str() {
                        "username" => Segment::Username,
                        "password" => Segment::Password,
                        _ => return Err(ConfigError::UnknownTemplateField(field)),
                    };
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(segment);
                }
                _ => return Err(malformed()),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 模板是否引用了密碼
    pub fn uses_password(&self) -> bool {
        self.segments.contains(&Segment::Password)
    }

    /// 套用帳密；引用到但未提供的欄位會回傳錯誤
    pub fn render(&self, credentials: &Credentials) -> Result<String, ConfigError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Username => out.push_str(credentials.username()?),
                Segment::Password => out.push_str(credentials.password()?),
            }
        }
        Ok(out)
    }
}

/// 驗證過的登入握手描述
#[derive(Debug, Clone, Default)]
pub struct MudInfo {
    pub pre_username: Commands,
    pub username_prompt: Option<PatternSpec>,
    pub username_wrong: Option<PatternSpec>,
    /// 未設定時直接送出帳號
    pub username_command: Option<CommandTemplate>,
    pub post_username: Commands,
    pub pre_password: Commands,
    pub password_prompt: Option<PatternSpec>,
    pub password_wrong: Option<PatternSpec>,
    pub password_command: Option<CommandTemplate>,
    pub post_password: Commands,
    pub password_correct: Option<PatternSpec>,
}

impl MudInfo {
    pub fn builder() -> MudInfoBuilder {
        MudInfoBuilder::default()
    }

    /// 從序列化設定建立；所有模式與模板在此編譯
    pub fn from_config(config: &MudInfoConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            pre_username: commands(&config.pre_username),
            username_prompt: pattern(&config.username_prompt)?,
            username_wrong: pattern(&config.username_wrong)?,
            username_command: template(&config.username_command)?,
            post_username: commands(&config.post_username),
            pre_password: commands(&config.pre_password),
            password_prompt: pattern(&config.password_prompt)?,
            password_wrong: pattern(&config.password_wrong)?,
            password_command: template(&config.password_command)?,
            post_password: commands(&config.post_password),
            password_correct: pattern(&config.password_correct)?,
        })
    }

    /// 管理登入時必須有帳號提示
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username_prompt.is_none() {
            return Err(ConfigError::NoUsernamePrompt);
        }
        Ok(())
    }
}

fn commands(value: &Option<CommandList>) -> Commands {
    match value {
        None => Commands::none(),
        Some(CommandList::One(command)) => Commands::from(command.clone()),
        Some(CommandList::Many(list)) => Commands::from(list.clone()),
    }
}

fn pattern(value: &Option<String>) -> Result<Option<PatternSpec>, ConfigError> {
    value.as_deref().map(PatternSpec::regex).transpose()
}

fn template(value: &Option<String>) -> Result<Option<CommandTemplate>, ConfigError> {
    value.as_deref().map(CommandTemplate::parse).transpose()
}

/// 以程式建立 [`MudInfo`]，第一個錯誤會在 `build` 時回傳
#[derive(Debug, Default)]
pub struct MudInfoBuilder {
    info: MudInfo,
    error: Option<ConfigError>,
}

impl MudInfoBuilder {
    fn pattern(mut self, value: impl IntoPatternSpec, slot: fn(&mut MudInfo) -> &mut Option<PatternSpec>) -> Self {
        match value.into_pattern_spec() {
            Ok(spec) => *slot(&mut self.info) = Some(spec),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    fn template(mut self, value: &str, slot: fn(&mut MudInfo) -> &mut Option<CommandTemplate>) -> Self {
        match CommandTemplate::parse(value) {
            Ok(t) => *slot(&mut self.info) = Some(t),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn pre_username(mut self, commands: impl Into<Commands>) -> Self {
        self.info.pre_username = commands.into();
        self
    }

    pub fn username_prompt(self, value: impl IntoPatternSpec) -> Self {
        self.pattern(value, |i| &mut i.username_prompt)
    }

    pub fn username_wrong(self, value: impl IntoPatternSpec) -> Self {
        self.pattern(value, |i| &mut i.username_wrong)
    }

    pub fn username_command(self, template: &str) -> Self {
        self.template(template, |i| &mut i.username_command)
    }

    pub fn post_username(mut self, commands: impl Into<Commands>) -> Self {
        self.info.post_username = commands.into();
        self
    }

    pub fn pre_password(mut self, commands: impl Into<Commands>) -> Self {
        self.info.pre_password = commands.into();
        self
    }

    pub fn password_prompt(self, value: impl IntoPatternSpec) -> Self {
        self.pattern(value, |i| &mut i.password_prompt)
    }

    pub fn password_wrong(self, value: impl IntoPatternSpec) -> Self {
        self.pattern(value, |i| &mut i.password_wrong)
    }

    pub fn password_command(self, template: &str) -> Self {
        self.template(template, |i| &mut i.password_command)
    }

    pub fn post_password(mut self, commands: impl Into<Commands>) -> Self {
        self.info.post_password = commands.into();
        self
    }

    pub fn password_correct(self, value: impl IntoPatternSpec) -> Self {
        self.pattern(value, |i| &mut i.password_correct)
    }

    pub fn build(self) -> Result<MudInfo, ConfigError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.info),
        }
    }
}

/// 單一命令或命令列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandList {
    One(String),
    Many(Vec<String>),
}

/// mud_info 的序列化形式（每個欄位都可省略或設為 null）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MudInfoConfig {
    pub pre_username: Option<CommandList>,
    pub username_prompt: Option<String>,
    pub username_wrong: Option<String>,
    pub username_command: Option<String>,
    pub post_username: Option<CommandList>,
    pub pre_password: Option<CommandList>,
    pub password_prompt: Option<String>,
    pub password_wrong: Option<String>,
    pub password_command: Option<String>,
    pub post_password: Option<CommandList>,
    pub password_correct: Option<String>,
}

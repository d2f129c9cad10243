//! 機器人主體
//!
//! [`Bot`] 擁有一條連線、觸發器與計時器註冊表以及排程器，
//! 負責登入、派發與中斷連線的順序。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::BotContext;
use crate::dispatch::DispatchLoop;
use crate::encoding::TextCodec;
use crate::error::{BotError, ConfigError, ReactionError};
use crate::login::{LineFraming, LoginSession};
use crate::mudinfo::{Credentials, MudInfo};
use crate::pattern::MatchInfo;
use crate::scheduler::{job_callback, ScheduleSpec, Scheduler, TokioScheduler};
use crate::telnet::{TelnetConfig, TelnetTransport};
use crate::timer::{Timer, TimerOptions, TimerRegistry};
use crate::transcript::Transcript;
use crate::transport::Transport;
use crate::trigger::{IntoTriggerPattern, ReactionResult, Trigger, TriggerOptions, TriggerRegistry};

/// 機器人設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// 派發迴圈每輪之間的休息時間
    pub poll_interval_ms: u64,
    /// 登入時每個等待的逾時
    pub login_timeout_secs: u64,
    /// 文字編碼標籤（utf-8、big5 ...）
    pub encoding: String,
    pub send_prefix: String,
    pub send_suffix: String,
    pub connect_timeout_secs: u64,
    pub read_buffer_size: usize,
    /// 是否由框架執行登入握手
    pub manage_login: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            login_timeout_secs: 10,
            encoding: "utf-8".to_string(),
            send_prefix: String::new(),
            send_suffix: "\n".to_string(),
            connect_timeout_secs: 30,
            read_buffer_size: 8192,
            manage_login: true,
        }
    }
}

impl BotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn codec(&self) -> Result<TextCodec, ConfigError> {
        TextCodec::for_label(&self.encoding)
    }

    pub fn framing(&self) -> LineFraming {
        LineFraming {
            prefix: self.send_prefix.clone(),
            suffix: self.send_suffix.clone(),
        }
    }

    pub fn telnet_config(&self, codec: TextCodec) -> TelnetConfig {
        TelnetConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_buffer_size: self.read_buffer_size,
            codec,
        }
    }
}

/// 連線生命週期通知，可由使用者覆寫
pub trait BotHandler: Send + Sync {
    fn on_connect(&self) {
        info!("connected");
    }

    /// `deliberate` 為 true 表示由本端主動中斷
    fn on_disconnect(&self, deliberate: bool) {
        if deliberate {
            info!("disconnected");
        } else {
            warn!("connection lost");
        }
    }
}

/// 只記錄日誌的預設處理器
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl BotHandler for LoggingHandler {}

/// 派發迴圈與計時器共用的狀態
pub(crate) struct BotShared {
    pub(crate) config: BotConfig,
    pub(crate) codec: TextCodec,
    pub(crate) framing: LineFraming,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) timers: TimerRegistry,
    handler: Arc<dyn BotHandler>,
    transcript: Mutex<Transcript>,
    logged_in: AtomicBool,
    disconnect_notified: AtomicBool,
    /// 派發停止旗標
    pub(crate) stop: watch::Sender<bool>,
    /// 連線結束後變為 true
    closed: watch::Sender<bool>,
}

impl BotShared {
    pub(crate) async fn send_framed(&self, message: &str, prefix: &str, suffix: &str) -> bool {
        let framed = format!("{}{}{}", prefix, message, suffix);
        match self.transport.send(&self.codec.encode(&framed)).await {
            Ok(()) => {
                debug!("sent {:?}", message);
                true
            }
            Err(e) if e.is_broken() => {
                warn!("send failed, connection broken: {}", e);
                self.connection_lost();
                false
            }
            Err(e) => {
                warn!("send failed: {}", e);
                false
            }
        }
    }

    pub(crate) async fn send_line(&self, message: &str) -> bool {
        self.send_framed(message, &self.framing.prefix, &self.framing.suffix)
            .await
    }

    /// 依序送出反應排入的命令，連線中斷時停止
    pub(crate) async fn flush(&self, commands: Vec<String>) {
        for command in commands {
            if !self.send_line(&command).await {
                break;
            }
        }
    }

    /// 遠端中斷：停止派發與排程，通知一次
    pub(crate) fn connection_lost(&self) {
        self.stop.send_replace(true);
        self.scheduler.shutdown();
        self.logged_in.store(false, Ordering::Release);
        self.notify_disconnect(false);
    }

    fn notify_disconnect(&self, deliberate: bool) {
        if !self.disconnect_notified.swap(true, Ordering::AcqRel) {
            self.closed.send_replace(true);
            self.handler.on_disconnect(deliberate);
        }
    }

    pub(crate) fn record(&self, text: &str) {
        let mut transcript = self.transcript.lock();
        if let Err(e) = transcript.record(text) {
            warn!("failed to write transcript, stopping it: {}", e);
            let _ = transcript.stop();
        }
    }

    pub(crate) fn context(&self) -> BotContext<'_> {
        BotContext::new(&self.triggers, &self.timers)
    }
}

/// 建立 [`Bot`]
#[derive(Default)]
pub struct BotBuilder {
    config: BotConfig,
    mud_info: MudInfo,
    credentials: Credentials,
    handler: Option<Arc<dyn BotHandler>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    transcript: Option<Transcript>,
}

impl BotBuilder {
    pub fn config(mut self, config: BotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mud_info(mut self, info: MudInfo) -> Self {
        self.mud_info = info;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn handler(mut self, handler: impl BotHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// 使用自訂排程器（預設為 [`TokioScheduler`]）
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// 在任何網路動作之前檢查設定
    fn validate(&self) -> Result<TextCodec, ConfigError> {
        if self.config.manage_login {
            self.mud_info.validate()?;
        }
        self.config.codec()
    }

    /// 以 Telnet 連線
    pub async fn connect(self, host: &str, port: u16) -> Result<Bot, BotError> {
        let codec = self.validate()?;
        let transport = TelnetTransport::connect(host, port, self.config.telnet_config(codec)).await?;
        self.build(Arc::new(transport))
    }

    /// 以已建立的傳輸建立機器人
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Bot, BotError> {
        let codec = self.validate()?;
        let runtime = Handle::try_current().map_err(|e| BotError::Runtime(e.to_string()))?;
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::with_handle(runtime.clone())),
        };
        let handler = self.handler.unwrap_or_else(|| Arc::new(LoggingHandler));
        let (stop, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(BotShared {
            framing: self.config.framing(),
            config: self.config,
            codec,
            transport,
            scheduler,
            triggers: TriggerRegistry::new(),
            timers: TimerRegistry::new(),
            handler,
            transcript: Mutex::new(self.transcript.unwrap_or_default()),
            logged_in: AtomicBool::new(false),
            disconnect_notified: AtomicBool::new(false),
            stop,
            closed,
        });
        shared.handler.on_connect();

        Ok(Bot {
            shared,
            mud_info: self.mud_info,
            credentials: self.credentials,
            runtime,
            dispatch: Mutex::new(None),
        })
    }
}

/// MUD 機器人
pub struct Bot {
    shared: Arc<BotShared>,
    mud_info: MudInfo,
    credentials: Credentials,
    runtime: Handle,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::default()
    }

    pub fn config(&self) -> &BotConfig {
        &self.shared.config
    }

    pub fn mud_info(&self) -> &MudInfo {
        &self.mud_info
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.shared.triggers
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.shared.timers
    }

    pub fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::Acquire)
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatch
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 註冊觸發器；字串模式依選項編譯
    pub fn register_trigger<P, F>(
        &self,
        pattern: P,
        options: TriggerOptions,
        reaction: F,
    ) -> Result<Arc<Trigger>, ConfigError>
    where
        P: IntoTriggerPattern,
        F: Fn(&mut BotContext<'_>, &str, &MatchInfo) -> ReactionResult + Send + Sync + 'static,
    {
        let trigger = Arc::new(Trigger::new(pattern, options, reaction)?);
        debug!("registered trigger {:?}", trigger.name());
        Ok(self.shared.triggers.add(trigger))
    }

    /// 註冊計時器並排入排程器
    pub fn register_timer<F>(
        &self,
        schedule: ScheduleSpec,
        options: TimerOptions,
        reaction: F,
    ) -> Result<Arc<Timer>, ConfigError>
    where
        F: Fn(&mut BotContext<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    {
        let timer = Arc::new(Timer::new(
            schedule,
            options,
            self.shared.scheduler.clone(),
            reaction,
        )?);

        let weak_timer: Weak<Timer> = Arc::downgrade(&timer);
        let weak_shared: Weak<BotShared> = Arc::downgrade(&self.shared);
        timer.schedule(job_callback(move || {
            let timer = weak_timer.upgrade();
            let shared = weak_shared.upgrade();
            async move {
                if let (Some(timer), Some(shared)) = (timer, shared) {
                    shared.run_timer(&timer).await;
                }
            }
        }));

        debug!("registered timer {:?}", timer.name());
        Ok(self.shared.timers.add(timer))
    }

    pub fn enable_trigger(&self, name: &str) -> usize {
        self.shared.triggers.enable(name)
    }

    pub fn disable_trigger(&self, name: &str) -> usize {
        self.shared.triggers.disable(name)
    }

    pub fn enable_trigger_group(&self, group: &str) -> usize {
        self.shared.triggers.enable_group(group)
    }

    pub fn disable_trigger_group(&self, group: &str) -> usize {
        self.shared.triggers.disable_group(group)
    }

    pub fn enable_timer(&self, name: &str) -> usize {
        self.shared.timers.enable(name)
    }

    pub fn disable_timer(&self, name: &str) -> usize {
        self.shared.timers.disable(name)
    }

    pub fn enable_timer_group(&self, group: &str) -> usize {
        self.shared.timers.enable_group(group)
    }

    pub fn disable_timer_group(&self, group: &str) -> usize {
        self.shared.timers.disable_group(group)
    }

    /// 執行登入握手；失敗時先有序地中斷連線再回傳錯誤
    pub async fn login(&self) -> Result<(), BotError> {
        if !self.shared.config.manage_login {
            self.shared.logged_in.store(true, Ordering::Release);
            return Ok(());
        }

        let result = LoginSession::new(
            self.shared.transport.as_ref(),
            &self.mud_info,
            &self.credentials,
        )
        .with_timeout(self.shared.config.login_timeout())
        .with_codec(self.shared.codec)
        .with_framing(self.shared.framing.clone())
        .run()
        .await;

        match result {
            Ok(()) => {
                self.shared.logged_in.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                warn!("login failed: {}", e);
                self.disconnect().await;
                Err(e.into())
            }
        }
    }

    /// 啟動派發迴圈與排程器；已在執行時不重複啟動
    pub fn start_dispatch(&self, print_raw: bool) {
        let mut slot = self.dispatch.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("dispatch loop already running");
            return;
        }

        self.shared.stop.send_replace(false);
        self.shared.scheduler.start();
        let dispatch = DispatchLoop::new(self.shared.clone(), print_raw);
        *slot = Some(self.runtime.spawn(dispatch.run()));
    }

    /// 設定停止旗標並等待派發迴圈結束
    pub async fn stop_dispatch(&self) {
        self.shared.stop.send_replace(true);
        let handle = self.dispatch.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("dispatch task ended abnormally: {}", e);
            }
        }
    }

    /// 送出一條命令（加上設定的前後綴）；連線中斷時回傳 false
    pub async fn send(&self, message: &str) -> bool {
        self.shared.send_line(message).await
    }

    pub async fn send_with(&self, message: &str, prefix: &str, suffix: &str) -> bool {
        self.shared.send_framed(message, prefix, suffix).await
    }

    /// 對一段文字執行觸發器（與派發迴圈相同的規則）
    pub async fn dispatch_text(&self, text: &str) -> Result<(), BotError> {
        self.shared.dispatch_text(text).await
    }

    /// 有序中斷：排程器、派發迴圈、傳輸，最後通知
    pub async fn disconnect(&self) {
        self.shared.scheduler.shutdown();
        self.stop_dispatch().await;
        self.shared.transport.close().await;
        self.shared.logged_in.store(false, Ordering::Release);
        if let Err(e) = self.shared.transcript.lock().stop() {
            warn!("failed to close transcript: {}", e);
        }
        self.shared.notify_disconnect(true);
    }

    /// 等到連線結束（任一方向）
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

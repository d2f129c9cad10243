//! Timer（計時器）模組
//!
//! 依排程執行反應，可限制執行次數

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::context::BotContext;
use crate::error::{ConfigError, ReactionError};
use crate::registry::{Registered, Registry};
use crate::scheduler::{JobCallback, JobId, ScheduleSpec, Scheduler};

/// 計時器反應
pub type TimerReaction =
    Arc<dyn Fn(&mut BotContext<'_>) -> Result<(), ReactionError> + Send + Sync>;

/// 計時器選項
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerOptions {
    pub name: String,
    pub group: String,
    pub enabled: bool,
    /// 只執行一次（等同 `run_limit = 1`）
    pub one_shot: bool,
    /// 最多執行次數；`None` 為不限
    pub run_limit: Option<u32>,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: "all".to_string(),
            enabled: true,
            one_shot: false,
            run_limit: None,
        }
    }
}

impl TimerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn run_limit(mut self, limit: u32) -> Self {
        self.run_limit = Some(limit);
        self
    }
}

/// 計時器定義
pub struct Timer {
    name: String,
    group: String,
    schedule: ScheduleSpec,
    run_limit: Option<u32>,
    run_count: AtomicU32,
    enabled: AtomicBool,
    /// 已達執行上限，工作已取消
    exhausted: AtomicBool,
    scheduler: Arc<dyn Scheduler>,
    job: OnceLock<JobId>,
    reaction: TimerReaction,
}

impl Timer {
    /// 建立計時器；要呼叫 [`Timer::schedule`] 才會排入排程器
    pub fn new<F>(
        schedule: ScheduleSpec,
        options: TimerOptions,
        scheduler: Arc<dyn Scheduler>,
        reaction: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&mut BotContext<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    {
        if options.name.is_empty() {
            return Err(ConfigError::MissingName("timer"));
        }
        schedule.validate()?;
        if options.run_limit == Some(0) {
            return Err(ConfigError::InvalidSchedule(
                "run limit must be at least 1".to_string(),
            ));
        }

        let run_limit = if options.one_shot || schedule.is_one_shot() {
            Some(1)
        } else {
            options.run_limit
        };

        Ok(Self {
            name: options.name,
            group: options.group,
            schedule,
            run_limit,
            run_count: AtomicU32::new(0),
            enabled: AtomicBool::new(options.enabled),
            exhausted: AtomicBool::new(false),
            scheduler,
            job: OnceLock::new(),
            reaction: Arc::new(reaction),
        })
    }

    /// 排入排程器；停用中的計時器立即暫停
    pub fn schedule(&self, callback: JobCallback) -> JobId {
        if let Some(job) = self.job.get() {
            return *job;
        }
        let job = self.scheduler.schedule_job(self.schedule.clone(), callback);
        let _ = self.job.set(job);
        if !self.is_enabled() {
            self.scheduler.pause(job);
        }
        debug!("timer {:?} scheduled as job {}", self.name, job.get());
        job
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn schedule_spec(&self) -> &ScheduleSpec {
        &self.schedule
    }

    pub fn job(&self) -> Option<JobId> {
        self.job.get().copied()
    }

    pub fn run_limit(&self) -> Option<u32> {
        self.run_limit
    }

    pub fn run_count(&self) -> u32 {
        self.run_count.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// 恢復排程；已用完次數的計時器不受影響
    pub fn enable(&self) {
        if self.is_exhausted() {
            return;
        }
        if !self.enabled.swap(true, Ordering::AcqRel) {
            if let Some(job) = self.job() {
                self.scheduler.resume(job);
            }
        }
    }

    pub fn disable(&self) {
        if self.is_exhausted() {
            return;
        }
        if self.enabled.swap(false, Ordering::AcqRel) {
            if let Some(job) = self.job() {
                self.scheduler.pause(job);
            }
        }
    }

    /// 取消工作，計時器保留供查詢
    pub fn cancel(&self) {
        if !self.exhausted.swap(true, Ordering::AcqRel) {
            if let Some(job) = self.job() {
                self.scheduler.cancel(job);
            }
        }
    }

    /// 執行一次反應
    ///
    /// 先原子地保留一個執行名額，因此並行觸發也不會超過上限；
    /// 取得最後一個名額時即取消工作。回傳 `false` 表示這次沒有執行。
    pub fn fire(&self, ctx: &mut BotContext<'_>) -> Result<bool, ReactionError> {
        if !self.is_enabled() || self.is_exhausted() {
            return Ok(false);
        }

        match self.run_limit {
            Some(limit) => {
                let reserved = self
                    .run_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count < limit).then_some(count + 1)
                    });
                match reserved {
                    Ok(previous) if previous + 1 >= limit => {
                        debug!("timer {:?} reached its run limit of {}", self.name, limit);
                        self.cancel();
                    }
                    Ok(_) => {}
                    Err(_) => {
                        self.cancel();
                        return Ok(false);
                    }
                }
            }
            None => {
                self.run_count.fetch_add(1, Ordering::AcqRel);
            }
        }

        (self.reaction)(ctx)?;
        Ok(true)
    }
}

impl Registered for Timer {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("schedule", &self.schedule)
            .field("run_limit", &self.run_limit)
            .field("run_count", &self.run_count())
            .field("enabled", &self.is_enabled())
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// 計時器註冊表
pub type TimerRegistry = Registry<Timer>;

impl Registry<Timer> {
    /// 取消所有計時器的工作
    pub fn cancel_all(&self) {
        for timer in self.snapshot().iter() {
            timer.cancel();
        }
    }
}

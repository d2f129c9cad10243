//! 排程器
//!
//! 計時器透過 [`Scheduler`] 介面排入工作；預設實作 [`TokioScheduler`]
//! 為每個工作開一個 tokio 任務，每次觸發再各自開任務執行。

mod crontab;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

pub use crontab::CronSchedule;

use crate::error::{BotError, ConfigError};

/// 排程工作的識別碼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// 每次觸發產生的任務
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 工作觸發時呼叫的回呼
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// 將回傳 future 的閉包包裝成 [`JobCallback`]
pub fn job_callback<F, Fut>(f: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

/// 觸發時間規格
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// 固定間隔
    Interval(Duration),
    /// cron 表達式
    Cron(CronSchedule),
    /// 指定時間執行一次
    Date(DateTime<Local>),
}

impl ScheduleSpec {
    pub fn every(interval: Duration) -> Self {
        Self::Interval(interval)
    }

    pub fn cron(expr: &str) -> Result<Self, ConfigError> {
        CronSchedule::parse(expr).map(Self::Cron)
    }

    pub fn at(when: DateTime<Local>) -> Self {
        Self::Date(when)
    }

    /// 指定時間的排程只會觸發一次
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Interval(interval) if interval.is_zero() => Err(ConfigError::InvalidSchedule(
                "interval must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// 距離下一次觸發的時間；`None` 表示不會再觸發
    pub fn next_delay(&self, now: DateTime<Local>, fired: bool) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(cron) => cron
                .next_after(now)
                .map(|at| (at - now).to_std().unwrap_or_default()),
            Self::Date(_) if fired => None,
            Self::Date(at) => Some((*at - now).to_std().unwrap_or_default()),
        }
    }
}

/// 排程器介面
///
/// 所有方法都是同步的，可在反應中直接呼叫。
pub trait Scheduler: Send + Sync {
    /// 排入工作；在 `start` 之前不會觸發
    fn schedule_job(&self, spec: ScheduleSpec, callback: JobCallback) -> JobId;

    fn pause(&self, job: JobId);

    /// 恢復工作，下一次觸發時間從現在重新計算
    fn resume(&self, job: JobId);

    fn cancel(&self, job: JobId);

    fn start(&self);

    /// 取消所有工作，之後排入的工作不會執行
    fn shutdown(&self);

    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Active,
    Paused,
    Cancelled,
}

/// 以 tokio 任務實作的排程器
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    jobs: Mutex<HashMap<JobId, watch::Sender<JobState>>>,
    started: watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl TokioScheduler {
    /// 必須在 tokio runtime 內建立
    pub fn new() -> Result<Self, BotError> {
        let handle = Handle::try_current().map_err(|e| BotError::Runtime(e.to_string()))?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            handle,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
            started,
            shut_down: AtomicBool::new(false),
        }
    }

    /// 尚未取消的工作數量
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    fn set_state(&self, job: JobId, state: JobState) {
        if let Some(tx) = self.jobs.lock().get(&job) {
            tx.send_if_modified(|current| {
                if *current == JobState::Cancelled || *current == state {
                    false
                } else {
                    *current = state;
                    true
                }
            });
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_job(&self, spec: ScheduleSpec, callback: JobCallback) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.shut_down.load(Ordering::Acquire) {
            debug!("scheduler is shut down, job {} not scheduled", id.0);
            return id;
        }

        let (tx, rx) = watch::channel(JobState::Active);
        self.jobs.lock().insert(id, tx);

        let started = self.started.subscribe();
        let handle = self.handle.clone();
        self.handle
            .spawn(run_job(id, spec, callback, rx, started, handle));
        trace!("job {} scheduled", id.0);
        id
    }

    fn pause(&self, job: JobId) {
        self.set_state(job, JobState::Paused);
    }

    fn resume(&self, job: JobId) {
        self.set_state(job, JobState::Active);
    }

    fn cancel(&self, job: JobId) {
        if let Some(tx) = self.jobs.lock().remove(&job) {
            tx.send_replace(JobState::Cancelled);
        }
    }

    fn start(&self) {
        if !self.shut_down.load(Ordering::Acquire) {
            self.started.send_replace(true);
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let jobs: Vec<_> = self.jobs.lock().drain().collect();
        for (_, tx) in jobs {
            tx.send_replace(JobState::Cancelled);
        }
        debug!("scheduler shut down");
    }

    fn is_running(&self) -> bool {
        *self.started.borrow() && !self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, tx) in self.jobs.get_mut().drain() {
            tx.send_replace(JobState::Cancelled);
        }
    }
}

async fn run_job(
    id: JobId,
    spec: ScheduleSpec,
    callback: JobCallback,
    mut state: watch::Receiver<JobState>,
    mut started: watch::Receiver<bool>,
    handle: Handle,
) {
    let mut fired = false;

    loop {
        let current = *state.borrow_and_update();
        match current {
            JobState::Cancelled => break,
            JobState::Paused => {
                if state.changed().await.is_err() {
                    break;
                }
                continue;
            }
            JobState::Active => {}
        }

        if !*started.borrow_and_update() {
            tokio::select! {
                r = started.changed() => if r.is_err() { break },
                r = state.changed() => if r.is_err() { break },
            }
            continue;
        }

        let Some(delay) = spec.next_delay(Local::now(), fired) else {
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                fired = true;
                trace!("job {} fired", id.0);
                handle.spawn(callback());
            }
            r = state.changed() => if r.is_err() { break },
        }
    }
    trace!("job {} finished", id.0);
}

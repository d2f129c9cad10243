//! 測試用的假傳輸與手動排程器

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::pattern::PatternSpec;
use crate::scheduler::{JobCallback, JobId, ScheduleSpec, Scheduler};
use crate::transport::{first_match, PatternMatch, Transport};

#[derive(Default)]
struct ScriptState {
    inbox: String,
    /// 每次 send 之後依序放入 inbox 的回覆
    replies: VecDeque<String>,
    sent: Vec<String>,
    closed: bool,
    broken: bool,
}

/// 照劇本回應的傳輸：每送出一次資料，就把下一段回覆放進收件匣
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<ScriptState>,
    notify: Notify,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 連線後立即可讀的文字
    pub fn greeting(self, text: &str) -> Self {
        self.state.lock().inbox.push_str(text);
        self
    }

    pub fn reply(self, text: &str) -> Self {
        self.state.lock().replies.push_back(text.to_string());
        self
    }

    /// 模擬伺服器送來資料
    pub fn push(&self, text: &str) {
        self.state.lock().inbox.push_str(text);
        self.notify.notify_one();
    }

    /// 模擬遠端關閉連線
    pub fn close_remote(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// 之後的 send 都會失敗
    pub fn break_pipe(&self) {
        self.state.lock().broken = true;
    }

    /// 送出的內容（去掉結尾換行）
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|s| s.trim_end_matches('\n').to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed || state.broken {
            return Err(TransportError::Closed);
        }
        state.sent.push(String::from_utf8_lossy(data).into_owned());
        if let Some(reply) = state.replies.pop_front() {
            state.inbox.push_str(&reply);
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn wait_readable(&self) -> Result<(), TransportError> {
        loop {
            {
                let state = self.state.lock();
                if !state.inbox.is_empty() {
                    return Ok(());
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn read_available(&self) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock();
        if state.inbox.is_empty() && state.closed {
            return Err(TransportError::Closed);
        }
        Ok(Bytes::from(std::mem::take(&mut state.inbox)))
    }

    async fn wait_for_pattern(
        &self,
        patterns: &[&PatternSpec],
        timeout: Duration,
    ) -> Result<Option<PatternMatch>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock();
                if let Some((index, m)) = first_match(patterns, &state.inbox) {
                    let before = state.inbox[..m.start].to_string();
                    state.inbox.drain(..m.end);
                    return Ok(Some(PatternMatch {
                        index,
                        text: m.text,
                        before,
                    }));
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    jobs: HashMap<JobId, JobCallback>,
    paused: HashSet<JobId>,
    cancelled: HashSet<JobId>,
    resumes: usize,
    started: bool,
    shut_down: bool,
}

/// 只記錄呼叫、由測試手動觸發的排程器
#[derive(Default)]
pub(crate) struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn is_paused(&self, job: JobId) -> bool {
        self.state.lock().paused.contains(&job)
    }

    pub fn is_cancelled(&self, job: JobId) -> bool {
        self.state.lock().cancelled.contains(&job)
    }

    pub fn resume_count(&self) -> usize {
        self.state.lock().resumes
    }

    pub fn cancelled_count(&self) -> usize {
        self.state.lock().cancelled.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// 觸發工作（暫停或取消中的工作不執行）
    pub async fn fire(&self, job: JobId) -> bool {
        let callback = {
            let state = self.state.lock();
            if state.paused.contains(&job) || state.cancelled.contains(&job) {
                return false;
            }
            match state.jobs.get(&job) {
                Some(callback) => callback.clone(),
                None => return false,
            }
        };
        callback().await;
        true
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_job(&self, _spec: ScheduleSpec, callback: JobCallback) -> JobId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = JobId::new(state.next_id);
        state.jobs.insert(id, callback);
        id
    }

    fn pause(&self, job: JobId) {
        self.state.lock().paused.insert(job);
    }

    fn resume(&self, job: JobId) {
        let mut state = self.state.lock();
        state.paused.remove(&job);
        state.resumes += 1;
    }

    fn cancel(&self, job: JobId) {
        self.state.lock().cancelled.insert(job);
    }

    fn start(&self) {
        self.state.lock().started = true;
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        let ids: Vec<JobId> = state.jobs.keys().copied().collect();
        state.cancelled.extend(ids);
    }

    fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.started && !state.shut_down
    }
}

//! 派發迴圈
//!
//! 背景任務：等待可讀、讀出所有可用資料、解碼後交給觸發器，
//! 每輪之間休息一段設定的時間。單次反應的錯誤或 panic 只記錄，不會結束迴圈。

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use crate::bot::BotShared;
use crate::error::{BotError, ReactionSource};
use crate::timer::Timer;
use crate::trigger::Flow;

/// 背景派發迴圈
pub(crate) struct DispatchLoop {
    shared: Arc<BotShared>,
    stop: watch::Receiver<bool>,
    print_raw: bool,
}

impl DispatchLoop {
    pub(crate) fn new(shared: Arc<BotShared>, print_raw: bool) -> Self {
        let stop = shared.stop.subscribe();
        Self {
            shared,
            stop,
            print_raw,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("dispatch loop started");

        loop {
            if *self.stop.borrow_and_update() {
                break;
            }

            let readable = tokio::select! {
                r = self.shared.transport.wait_readable() => r,
                _ = self.stop.changed() => continue,
            };
            if let Err(e) = readable {
                if !*self.stop.borrow() {
                    info!("dispatch loop: {}", e);
                    self.shared.connection_lost();
                }
                break;
            }

            let data = match self.shared.transport.read_available().await {
                Ok(data) => data,
                Err(e) => {
                    if e.is_broken() && !*self.stop.borrow() {
                        info!("dispatch loop: {}", e);
                        self.shared.connection_lost();
                    }
                    break;
                }
            };

            if !data.is_empty() {
                let text = self.shared.codec.decode(&data);
                trace!("received {} bytes", data.len());

                if self.print_raw {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }

                self.shared.record(&text);

                if let Err(e) = self.shared.dispatch_text(&text).await {
                    error!("{}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.shared.config.poll_interval()) => {}
                _ = self.stop.changed() => {}
            }
        }

        debug!("dispatch loop stopped");
    }
}

impl BotShared {
    /// 依 sequence 順序對文字執行已啟用的觸發器
    ///
    /// 反應排入的命令在該觸發器返回後送出（即使反應失敗）。
    /// 第一個反應錯誤會中止這段文字的派發並以 [`BotError::ReactionFault`] 回傳。
    pub(crate) async fn dispatch_text(&self, text: &str) -> Result<(), BotError> {
        let triggers = self.triggers.snapshot();

        for trigger in triggers.iter() {
            if !trigger.is_enabled() || !trigger.matches(text) {
                continue;
            }

            let (outcome, commands) = {
                let mut ctx = self.context();
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| trigger.fire(&mut ctx, text)));
                (outcome, ctx.take_commands())
            };
            self.flush(commands).await;

            match outcome {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Stop)) => {
                    trace!("trigger {:?} stopped dispatch", trigger.name());
                    break;
                }
                Ok(Err(e)) => {
                    return Err(BotError::reaction_fault(
                        ReactionSource::Trigger,
                        trigger.name(),
                        e.to_string(),
                    ))
                }
                Err(payload) => {
                    return Err(BotError::reaction_fault(
                        ReactionSource::Trigger,
                        trigger.name(),
                        panic_message(payload.as_ref()),
                    ))
                }
            }
        }
        Ok(())
    }

    /// 排程器觸發時執行計時器；錯誤只記錄，不影響之後的觸發
    pub(crate) async fn run_timer(&self, timer: &Timer) {
        let (outcome, commands) = {
            let mut ctx = self.context();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| timer.fire(&mut ctx)));
            (outcome, ctx.take_commands())
        };
        self.flush(commands).await;

        let message = match outcome {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!(
            "{}",
            BotError::reaction_fault(ReactionSource::Timer, timer.name(), message)
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

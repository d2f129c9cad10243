//! 反應上下文
//!
//! 觸發器與計時器的反應透過 [`BotContext`] 送出命令、開關其他觸發器或計時器。
//! 命令先排入佇列，反應返回後才依序送出。

use crate::timer::TimerRegistry;
use crate::trigger::TriggerRegistry;

/// 反應執行時的上下文
pub struct BotContext<'a> {
    triggers: &'a TriggerRegistry,
    timers: &'a TimerRegistry,
    /// 待發送的命令隊列
    commands: Vec<String>,
}

impl<'a> BotContext<'a> {
    pub fn new(triggers: &'a TriggerRegistry, timers: &'a TimerRegistry) -> Self {
        Self {
            triggers,
            timers,
            commands: Vec::new(),
        }
    }

    /// 排入一條命令（前後綴在送出時加上）
    pub fn send(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    /// 目前排入的命令
    pub fn queued(&self) -> &[String] {
        &self.commands
    }

    pub(crate) fn take_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.commands)
    }

    pub fn enable_trigger(&self, name: &str) -> usize {
        self.triggers.enable(name)
    }

    pub fn disable_trigger(&self, name: &str) -> usize {
        self.triggers.disable(name)
    }

    pub fn enable_trigger_group(&self, group: &str) -> usize {
        self.triggers.enable_group(group)
    }

    pub fn disable_trigger_group(&self, group: &str) -> usize {
        self.triggers.disable_group(group)
    }

    pub fn enable_timer(&self, name: &str) -> usize {
        self.timers.enable(name)
    }

    pub fn disable_timer(&self, name: &str) -> usize {
        self.timers.disable(name)
    }

    pub fn enable_timer_group(&self, group: &str) -> usize {
        self.timers.enable_group(group)
    }

    pub fn disable_timer_group(&self, group: &str) -> usize {
        self.timers.disable_group(group)
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        self.triggers
    }

    pub fn timers(&self) -> &TimerRegistry {
        self.timers
    }
}

//! Cron 表達式
//!
//! 五個欄位：分 時 日 月 週，解析與推算交給 `cron` crate。
//! 星期欄位沿用傳統寫法（0 與 7 都是星期日），先換成英文縮寫再交給 `cron`。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::ConfigError;

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// 已解析的 cron 排程
#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let weekdays = weekday_field(fields[4]).map_err(&invalid)?;
        // `cron` 的第一個欄位是秒
        let full = format!("0 {} {}", fields[..4].join(" "), weekdays);
        let schedule = Schedule::from_str(&full).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// 嚴格晚於 `after` 的下一個觸發時間
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(&after).next()
    }
}

fn weekday_field(field: &str) -> Result<String, String> {
    let mut items: Vec<String> = Vec::new();
    for item in field.split(',') {
        let item = weekday_item(item)?;
        if !items.contains(&item) {
            items.push(item);
        }
    }
    Ok(items.join(","))
}

/// 數字星期展開成縮寫列表；英文縮寫原樣保留
fn weekday_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step: usize = step
                .parse()
                .map_err(|_| format!("invalid step {:?}", step))?;
            if step == 0 {
                return Err("step must be positive".to_string());
            }
            (range, Some(step))
        }
        None => (item, None),
    };

    let bounds = if range == "*" {
        if step.is_none() {
            return Ok(range.to_string());
        }
        Some((0, 6))
    } else if let Some((lo, hi)) = range.split_once('-') {
        lo.parse::<u32>().ok().zip(hi.parse::<u32>().ok())
    } else {
        // `5/2` 表示從 5 開始到最大值
        range
            .parse::<u32>()
            .ok()
            .map(|value| (value, if step.is_some() { 7 } else { value }))
    };

    let Some((lo, hi)) = bounds else {
        return Ok(item.to_string());
    };
    if hi > 7 {
        return Err(format!("weekday {} out of range 0-7", hi));
    }
    if lo > hi {
        return Err(format!("empty range {}-{}", lo, hi));
    }

    let mut names: Vec<&str> = Vec::new();
    for value in (lo..=hi).step_by(step.unwrap_or(1)) {
        let name = WEEKDAY_NAMES[value as usize % 7];
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names.join(","))
}

impl FromStr for CronSchedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSchedule {}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

//! 排班配置
//!
//! 默认班次适用于所有员工，`overrides` 可以针对单个员工覆盖上下班时间、宽限期和工作日

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// 排班配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// 上班时间，格式 "HH:MM"（本地时间）
    #[serde(default = "default_shift_start")]
    pub shift_start: String,

    /// 下班时间，格式 "HH:MM"（本地时间），必须晚于上班时间
    #[serde(default = "default_shift_end")]
    pub shift_end: String,

    /// 宽限期（分钟）
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,

    /// 本地时区相对 UTC 的偏移（分钟），如 UTC+8 为 480
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// 工作日，如 ["Mon", "Tue"]
    #[serde(default = "default_workdays")]
    pub workdays: Vec<String>,

    /// 按员工覆盖
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ShiftOverride>,
}

/// 单个员工的排班覆盖
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShiftOverride {
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdays: Option<Vec<String>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            shift_start: default_shift_start(),
            shift_end: default_shift_end(),
            grace_minutes: default_grace_minutes(),
            utc_offset_minutes: 0,
            workdays: default_workdays(),
            overrides: Vec::new(),
        }
    }
}

fn default_shift_start() -> String {
    "09:00".to_string()
}

fn default_shift_end() -> String {
    "17:00".to_string()
}

fn default_grace_minutes() -> u32 {
    5
}

fn default_workdays() -> Vec<String> {
    ["Mon", "Tue", "Wed", "Thu", "Fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

/// 解析 "HH:MM" 格式的时间
pub fn parse_clock_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{value}', expected HH:MM: {e}"))
}

/// 解析工作日列表
pub fn parse_workdays(days: &[String]) -> Result<Vec<Weekday>, String> {
    days.iter()
        .map(|d| {
            d.trim()
                .parse::<Weekday>()
                .map_err(|_| format!("invalid weekday '{d}'"))
        })
        .collect()
}

impl ScheduleConfig {
    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        check_shift(
            "schedule",
            &self.shift_start,
            &self.shift_end,
            self.grace_minutes,
            &mut errors,
        );

        if let Err(e) = parse_workdays(&self.workdays) {
            errors.push(format!("schedule.workdays: {e}"));
        }

        // 偏移限制在 ±14 小时
        if self.utc_offset_minutes.abs() > 14 * 60 {
            errors.push(format!(
                "schedule.utc_offset_minutes {} is out of range (±840)",
                self.utc_offset_minutes
            ));
        }

        for o in &self.overrides {
            if o.employee_id.trim().is_empty() {
                errors.push("schedule.overrides entry has empty employee_id".to_string());
            }
            let start = o.shift_start.as_deref().unwrap_or(&self.shift_start);
            let end = o.shift_end.as_deref().unwrap_or(&self.shift_end);
            let grace = o.grace_minutes.unwrap_or(self.grace_minutes);
            check_shift(
                &format!("schedule.overrides[{}]", o.employee_id),
                start,
                end,
                grace,
                &mut errors,
            );
            if let Some(days) = &o.workdays
                && let Err(e) = parse_workdays(days)
            {
                errors.push(format!(
                    "schedule.overrides[{}].workdays: {e}",
                    o.employee_id
                ));
            }
        }

        errors
    }
}

fn check_shift(scope: &str, start: &str, end: &str, grace: u32, errors: &mut Vec<String>) {
    match (parse_clock_time(start), parse_clock_time(end)) {
        (Ok(s), Ok(e)) if e <= s => {
            errors.push(format!("{scope}: shift_end {end} must be after shift_start {start}"));
        }
        (Ok(_), Ok(_)) => {}
        (s, e) => {
            for err in [s.err(), e.err()].into_iter().flatten() {
                errors.push(format!("{scope}: {err}"));
            }
        }
    }
    if grace > 120 {
        errors.push(format!(
            "Warning: {scope}: grace_minutes {grace} is unusually large"
        ));
    }
}

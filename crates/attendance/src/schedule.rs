//! 排班
//!
//! 排班时间以本地时间配置，统一换算为 UTC 后参与比较

use attendix_common::config::ScheduleConfig;
use attendix_common::config::schedule::{parse_clock_time, parse_workdays};
use attendix_common::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use std::collections::HashMap;

/// 某员工某天的班次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub grace: Duration,
}

/// 排班来源
pub trait Schedule: Send + Sync {
    /// 员工在某个本地日期的班次，当天不上班返回 None
    fn shift_for(&self, employee_id: &str, date: NaiveDate) -> Option<Shift>;

    /// 本地时区
    fn utc_offset(&self) -> FixedOffset;

    /// UTC 时刻对应的本地日期
    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.utc_offset()).date_naive()
    }

    /// 本地日期对应的 UTC 区间 `[start, end)`
    fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = self.utc_offset();
        let start = local_to_utc(offset, date, NaiveTime::MIN);
        (start, start + Duration::days(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShiftTemplate {
    start: NaiveTime,
    end: NaiveTime,
    grace: Duration,
    workdays: Vec<Weekday>,
}

/// 按周循环的固定排班，支持按员工覆盖
#[derive(Debug, Clone)]
pub struct WeeklySchedule {
    offset: FixedOffset,
    default: ShiftTemplate,
    overrides: HashMap<String, ShiftTemplate>,
}

impl WeeklySchedule {
    pub fn new(
        offset: FixedOffset,
        start: NaiveTime,
        end: NaiveTime,
        grace: Duration,
        workdays: Vec<Weekday>,
    ) -> Self {
        Self {
            offset,
            default: ShiftTemplate {
                start,
                end,
                grace,
                workdays,
            },
            overrides: HashMap::new(),
        }
    }

    /// 覆盖某员工的班次
    pub fn with_override(
        mut self,
        employee_id: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        grace: Duration,
        workdays: Vec<Weekday>,
    ) -> Self {
        self.overrides.insert(
            employee_id.into(),
            ShiftTemplate {
                start,
                end,
                grace,
                workdays,
            },
        );
        self
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::invalid_value(
                "schedule.utc_offset_minutes",
                config.utc_offset_minutes.to_string(),
            )
        })?;
        let start = parse_clock_time(&config.shift_start)
            .map_err(|e| ConfigError::invalid_value("schedule.shift_start", e))?;
        let end = parse_clock_time(&config.shift_end)
            .map_err(|e| ConfigError::invalid_value("schedule.shift_end", e))?;
        let workdays = parse_workdays(&config.workdays)
            .map_err(|e| ConfigError::invalid_value("schedule.workdays", e))?;

        let mut schedule = Self::new(
            offset,
            start,
            end,
            Duration::minutes(config.grace_minutes as i64),
            workdays,
        );

        for o in &config.overrides {
            let field = |name: &str| format!("schedule.overrides[{}].{name}", o.employee_id);
            let start = match &o.shift_start {
                Some(s) => parse_clock_time(s).map_err(|e| ConfigError::invalid_value(field("shift_start"), e))?,
                None => schedule.default.start,
            };
            let end = match &o.shift_end {
                Some(s) => parse_clock_time(s).map_err(|e| ConfigError::invalid_value(field("shift_end"), e))?,
                None => schedule.default.end,
            };
            let workdays = match &o.workdays {
                Some(days) => parse_workdays(days).map_err(|e| ConfigError::invalid_value(field("workdays"), e))?,
                None => schedule.default.workdays.clone(),
            };
            let grace = o
                .grace_minutes
                .map(|m| Duration::minutes(m as i64))
                .unwrap_or(schedule.default.grace);
            schedule = schedule.with_override(o.employee_id.clone(), start, end, grace, workdays);
        }

        Ok(schedule)
    }
}

impl Schedule for WeeklySchedule {
    fn shift_for(&self, employee_id: &str, date: NaiveDate) -> Option<Shift> {
        let template = self.overrides.get(employee_id).unwrap_or(&self.default);
        if !template.workdays.contains(&date.weekday()) {
            return None;
        }
        Some(Shift {
            start: local_to_utc(self.offset, date, template.start),
            end: local_to_utc(self.offset, date, template.end),
            grace: template.grace,
        })
    }

    fn utc_offset(&self) -> FixedOffset {
        self.offset
    }
}

fn local_to_utc(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    // 固定偏移没有夏令时，本地时间总是唯一对应一个时刻
    Utc.from_utc_datetime(&(date.and_time(time) - offset))
}

//! 缺勤推断
//!
//! 班次结束后仍没有签到记录的员工，补一条 `Absent` 事件。

use crate::error::StoreError;
use crate::model::{AttendanceEvent, AttendanceStatus, ScanType};
use crate::schedule::Schedule;
use crate::store::EventStore;
use attendix_common::Clock;
use attendix_common::metrics::EVENTS_RECORDED;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AbsenceSweeper {
    store: Arc<dyn EventStore>,
    schedule: Arc<dyn Schedule>,
    clock: Arc<dyn Clock>,
    branch_id: String,
}

impl AbsenceSweeper {
    /// `branch_id` 为本设备所属门店，写入生成的缺勤事件
    pub fn new(
        store: Arc<dyn EventStore>,
        schedule: Arc<dyn Schedule>,
        clock: Arc<dyn Clock>,
        branch_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            schedule,
            clock,
            branch_id: branch_id.into(),
        }
    }

    /// 为 `date` 当天有班次、班次已结束且没有任何签到记录的员工生成缺勤事件
    ///
    /// 可重复执行：已有签到（包括之前生成的缺勤）的员工会被跳过。
    pub async fn sweep(
        &self,
        date: NaiveDate,
        employees: &[String],
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let now = self.clock.now();
        let (day_start, day_end) = self.schedule.day_bounds(date);
        let mut created = Vec::new();

        for employee_id in employees {
            let Some(shift) = self.schedule.shift_for(employee_id, date) else {
                continue;
            };
            if now < shift.end {
                debug!("Shift of {} on {} has not ended yet", employee_id, date);
                continue;
            }

            let history = self.store.history(employee_id, day_start, day_end).await?;
            if history.iter().any(|e| e.scan_type == ScanType::CheckIn) {
                continue;
            }

            let event = AttendanceEvent::new(
                employee_id.as_str(),
                self.branch_id.as_str(),
                shift.end,
                ScanType::CheckIn,
                AttendanceStatus::Absent,
            );
            self.store.append(&event).await?;
            EVENTS_RECORDED
                .with_label_values(&[ScanType::CheckIn.as_str(), AttendanceStatus::Absent.as_str()])
                .inc();
            info!(employee_id = %employee_id, %date, "Recorded absence");
            created.push(event);
        }

        Ok(created)
    }
}

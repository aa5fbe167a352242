//! 考勤分类与事件生成

use crate::model::{AttendanceEvent, AttendanceStatus, ScanType};
use crate::schedule::{Schedule, Shift};
use attendix_common::Clock;
use attendix_common::metrics::EVENTS_RECORDED;
use chrono::{DateTime, Utc};
use qrauth::QrPayload;
use std::sync::Arc;
use tracing::debug;

/// 根据班次判定考勤状态
///
/// - 签到：`|t - start| <= grace` 为准时，晚于 `start + grace` 为迟到，早于 `start - grace` 为提前
/// - 签退：早于 `end - grace` 为早退，否则为准时
/// - 没有班次：`Unscheduled`
pub fn classify(shift: Option<&Shift>, scan_type: ScanType, occurred_at: DateTime<Utc>) -> AttendanceStatus {
    let Some(shift) = shift else {
        return AttendanceStatus::Unscheduled;
    };

    match scan_type {
        ScanType::CheckIn => {
            if occurred_at > shift.start + shift.grace {
                AttendanceStatus::Late
            } else if occurred_at < shift.start - shift.grace {
                AttendanceStatus::Early
            } else {
                AttendanceStatus::OnTime
            }
        }
        ScanType::CheckOut => {
            if occurred_at < shift.end - shift.grace {
                AttendanceStatus::EarlyDeparture
            } else {
                AttendanceStatus::OnTime
            }
        }
    }
}

/// 考勤记录器
///
/// 纯本地计算，不依赖网络；对已通过校验的载荷总是能生成事件。
pub struct AttendanceRecorder {
    schedule: Arc<dyn Schedule>,
    clock: Arc<dyn Clock>,
}

impl AttendanceRecorder {
    pub fn new(schedule: Arc<dyn Schedule>, clock: Arc<dyn Clock>) -> Self {
        Self { schedule, clock }
    }

    pub fn schedule(&self) -> &Arc<dyn Schedule> {
        &self.schedule
    }

    /// 以设备当前时间记录
    pub fn record(&self, employee_id: &str, payload: &QrPayload, scan_type: ScanType) -> AttendanceEvent {
        self.record_at(employee_id, payload, scan_type, self.clock.now())
    }

    /// 以指定的扫码时刻记录
    pub fn record_at(
        &self,
        employee_id: &str,
        payload: &QrPayload,
        scan_type: ScanType,
        occurred_at: DateTime<Utc>,
    ) -> AttendanceEvent {
        let date = self.schedule.local_date(occurred_at);
        let shift = self.schedule.shift_for(employee_id, date);
        let status = classify(shift.as_ref(), scan_type, occurred_at);

        debug!(
            employee_id,
            branch_id = payload.branch_id(),
            %scan_type,
            %status,
            "Attendance classified"
        );
        EVENTS_RECORDED
            .with_label_values(&[scan_type.as_str(), status.as_str()])
            .inc();

        AttendanceEvent::new(
            employee_id,
            payload.branch_id(),
            occurred_at,
            scan_type,
            status,
        )
        .with_nonce(payload.nonce().to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::WeeklySchedule;
    use attendix_common::ManualClock;
    use chrono::{Duration, FixedOffset, NaiveTime, TimeZone, Weekday};
    use qrauth::QrIssuer;

    fn recorder() -> (Arc<ManualClock>, AttendanceRecorder) {
        let schedule = WeeklySchedule::new(
            FixedOffset::east_opt(0).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            Duration::minutes(5),
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        );
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        (clock.clone(), AttendanceRecorder::new(Arc::new(schedule), clock))
    }

    /// 2024-06-03（周一）的 UTC 时刻
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
    }

    fn payload() -> QrPayload {
        QrIssuer::new("HQ", b"0123456789abcdef".to_vec())
            .issue(at(8, 55))
            .unwrap()
    }

    #[test]
    fn test_check_in_grace_boundaries() {
        let (_clock, r) = recorder();
        let p = payload();
        let status = |h, m| r.record_at("e-1", &p, ScanType::CheckIn, at(h, m)).status;

        assert_eq!(status(9, 3), AttendanceStatus::OnTime);
        assert_eq!(status(9, 5), AttendanceStatus::OnTime);
        assert_eq!(status(9, 7), AttendanceStatus::Late);
        assert_eq!(status(8, 55), AttendanceStatus::OnTime);
        assert_eq!(status(8, 50), AttendanceStatus::Early);
    }

    #[test]
    fn test_check_out() {
        let (_clock, r) = recorder();
        let p = payload();
        let status = |h, m| r.record_at("e-1", &p, ScanType::CheckOut, at(h, m)).status;

        assert_eq!(status(16, 30), AttendanceStatus::EarlyDeparture);
        assert_eq!(status(16, 55), AttendanceStatus::OnTime);
        assert_eq!(status(18, 0), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_unscheduled_day() {
        let (clock, r) = recorder();
        let saturday = Utc.with_ymd_and_hms(2024, 6, 8, 9, 0, 0).unwrap();
        clock.set(saturday);

        let event = r.record("e-1", &payload(), ScanType::CheckIn);
        assert_eq!(event.status, AttendanceStatus::Unscheduled);
        assert_eq!(event.occurred_at, saturday);
    }

    #[test]
    fn test_event_uses_device_time_and_payload_identity() {
        let (clock, r) = recorder();
        clock.set(at(9, 2));
        let p = payload();

        let event = r.record("e-7", &p, ScanType::CheckIn);
        assert_eq!(event.occurred_at, at(9, 2));
        assert_ne!(event.occurred_at, p.issued_at());
        assert_eq!(event.branch_id, "HQ");
        assert_eq!(event.nonce.as_deref(), Some(p.nonce().to_hex().as_str()));
        assert!(event.is_pending());
    }
}

//! 扫码校验器
//!
//! 依次执行：解码 → 时间窗口 → 签名 → nonce 登记。
//! nonce 只在前三步全部通过后才登记，伪造或过期的码不会占用账本空间。

use crate::codec;
use crate::error::{LedgerError, ValidatorError};
use crate::ledger::NonceLedger;
use crate::payload::QrPayload;
use crate::policy::{PolicyBook, ValidationPolicy};
use crate::signer::PayloadVerifier;
use attendix_common::metrics::SCANS_VALIDATED;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// 超出有效期，或签发时间在未来且超出允许偏差
    ExpiredOrFuture,
    InvalidSignature,
    NonceAlreadyUsed,
    MalformedPayload,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ExpiredOrFuture => "expired_or_future",
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::NonceAlreadyUsed => "nonce_already_used",
            RejectReason::MalformedPayload => "malformed_payload",
        }
    }

    /// 面向扫码用户的提示
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectReason::ExpiredOrFuture => "二维码已过期，请刷新后重新扫码",
            RejectReason::InvalidSignature => "二维码无效",
            RejectReason::NonceAlreadyUsed => "二维码已被使用",
            RejectReason::MalformedPayload => "无法识别的二维码",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(QrPayload),
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    pub fn payload(&self) -> Option<&QrPayload> {
        match self {
            ValidationOutcome::Accepted(payload) => Some(payload),
            ValidationOutcome::Rejected(_) => None,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ValidationOutcome::Accepted(_) => None,
            ValidationOutcome::Rejected(reason) => Some(*reason),
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            ValidationOutcome::Accepted(_) => "accepted",
            ValidationOutcome::Rejected(reason) => reason.as_str(),
        }
    }
}

/// 扫码校验器
///
/// 可在多个任务间共享（`Arc<TokenValidator>`）；并发提交同一个二维码时，
/// 由账本保证只有一次被接受。
pub struct TokenValidator {
    verifier: Arc<dyn PayloadVerifier>,
    ledger: Arc<dyn NonceLedger>,
    policies: PolicyBook,
}

impl TokenValidator {
    pub fn new(
        verifier: Arc<dyn PayloadVerifier>,
        ledger: Arc<dyn NonceLedger>,
        policies: PolicyBook,
    ) -> Self {
        Self {
            verifier,
            ledger,
            policies,
        }
    }

    pub fn policies(&self) -> &PolicyBook {
        &self.policies
    }

    pub fn ledger(&self) -> &Arc<dyn NonceLedger> {
        &self.ledger
    }

    /// 使用指定策略校验
    ///
    /// 返回 `Err` 仅表示账本不可用，调用方必须按"未通过"处理。
    pub async fn validate(
        &self,
        raw: &[u8],
        now: DateTime<Utc>,
        policy: &ValidationPolicy,
    ) -> Result<ValidationOutcome, ValidatorError> {
        let payload = match codec::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejecting malformed payload: {}", e);
                return Ok(self.finish(ValidationOutcome::Rejected(RejectReason::MalformedPayload)));
            }
        };
        self.check(payload, now, policy).await
    }

    /// 按载荷中的门店选择策略后校验
    pub async fn validate_for_branch(
        &self,
        raw: &[u8],
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome, ValidatorError> {
        let payload = match codec::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejecting malformed payload: {}", e);
                return Ok(self.finish(ValidationOutcome::Rejected(RejectReason::MalformedPayload)));
            }
        };
        let policy = *self.policies.policy_for(payload.branch_id());
        self.check(payload, now, &policy).await
    }

    async fn check(
        &self,
        payload: QrPayload,
        now: DateTime<Utc>,
        policy: &ValidationPolicy,
    ) -> Result<ValidationOutcome, ValidatorError> {
        if !policy.is_within_window(payload.issued_at(), now) {
            debug!(
                branch_id = payload.branch_id(),
                issued_at = %payload.issued_at(),
                now = %now,
                "Rejecting code outside validity window"
            );
            return Ok(self.finish(ValidationOutcome::Rejected(RejectReason::ExpiredOrFuture)));
        }

        if !self.verifier.verify(&payload) {
            warn!(
                branch_id = payload.branch_id(),
                nonce = %payload.nonce(),
                "Rejecting code with invalid signature"
            );
            return Ok(self.finish(ValidationOutcome::Rejected(RejectReason::InvalidSignature)));
        }

        let expires_at = policy.nonce_expiry(payload.issued_at());
        match self.ledger.check_and_record(payload.nonce(), expires_at).await {
            Ok(()) => {
                debug!(
                    branch_id = payload.branch_id(),
                    nonce = %payload.nonce(),
                    "Code accepted"
                );
                Ok(self.finish(ValidationOutcome::Accepted(payload)))
            }
            Err(LedgerError::NonceAlreadyUsed) => {
                warn!(
                    branch_id = payload.branch_id(),
                    nonce = %payload.nonce(),
                    "Rejecting replayed code"
                );
                Ok(self.finish(ValidationOutcome::Rejected(RejectReason::NonceAlreadyUsed)))
            }
            Err(e) => {
                warn!("Nonce ledger failure during validation: {}", e);
                SCANS_VALIDATED.with_label_values(&["ledger_error"]).inc();
                Err(ValidatorError::Ledger(e))
            }
        }
    }

    fn finish(&self, outcome: ValidationOutcome) -> ValidationOutcome {
        SCANS_VALIDATED
            .with_label_values(&[outcome.metric_label()])
            .inc();
        outcome
    }
}

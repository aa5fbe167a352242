//! 二维码签发
//!
//! 门店展示端使用，定时生成新的二维码；本地 `issue` 命令也用它生成测试码。

use crate::error::IssueError;
use crate::payload::{Nonce, QrPayload};
use crate::signer::{sign, signing_message};
use chrono::{DateTime, Utc};
use std::fmt;

pub struct QrIssuer {
    branch_id: String,
    secret: Vec<u8>,
}

impl QrIssuer {
    pub fn new(branch_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            branch_id: branch_id.into(),
            secret: secret.into(),
        }
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// 使用随机 nonce 签发
    pub fn issue(&self, issued_at: DateTime<Utc>) -> Result<QrPayload, IssueError> {
        self.issue_with_nonce(issued_at, Nonce::random())
    }

    pub fn issue_with_nonce(
        &self,
        issued_at: DateTime<Utc>,
        nonce: Nonce,
    ) -> Result<QrPayload, IssueError> {
        let message = signing_message(&self.branch_id, issued_at.timestamp_millis(), &nonce);
        let signature = sign(&message, &self.secret).map_err(|e| IssueError::Key(e.to_string()))?;
        Ok(QrPayload::new(
            self.branch_id.clone(),
            issued_at,
            nonce,
            signature,
        )?)
    }
}

impl fmt::Debug for QrIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrIssuer")
            .field("branch_id", &self.branch_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{KeyRing, PayloadVerifier};

    #[test]
    fn test_issued_payload_verifies() {
        let issuer = QrIssuer::new("HQ", b"0123456789abcdef".to_vec());
        let payload = issuer.issue(Utc::now()).unwrap();
        assert_eq!(payload.branch_id(), "HQ");

        let ring = KeyRing::new().with_secret("HQ", b"0123456789abcdef".to_vec());
        assert!(ring.verify(&payload));
    }

    #[test]
    fn test_invalid_branch_id_rejected() {
        let issuer = QrIssuer::new("bad branch", b"0123456789abcdef".to_vec());
        assert!(matches!(
            issuer.issue(Utc::now()),
            Err(IssueError::Payload(_))
        ));
    }
}

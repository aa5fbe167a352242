//! 基于 reqwest 的远端考勤 API 客户端
//!
//! 状态码映射：
//! - 200/201 `{server_id}`：已接受
//! - 409 `{reason, server_id?}`：冲突
//! - 408、429、5xx：暂时性故障
//! - 其它 4xx：永久拒绝，按冲突处理

use super::remote::{RemoteAttendanceApi, RemoteError, SubmitOutcome, SubmitRequest};
use async_trait::async_trait;
use attendix_common::config::SyncConfig;
use nonce_auth::{CredentialBuilder, NonceCredential};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Serialize)]
struct SubmitBody<'a> {
    #[serde(flatten)]
    event: &'a SubmitRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<NonceCredential>,
}

#[derive(Debug, Deserialize)]
struct AcceptedBody {
    server_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    server_id: Option<String>,
}

/// 远端考勤 API 的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct HttpAttendanceApi {
    endpoint: String,
    client: reqwest::Client,
    device_secret: Option<String>,
}

impl HttpAttendanceApi {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        device_secret: Option<String>,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            device_secret,
        })
    }

    /// 未配置 endpoint 时返回 None（纯离线模式）
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>, RemoteError> {
        match &config.endpoint {
            Some(endpoint) if config.is_enabled() => Ok(Some(Self::new(
                endpoint.clone(),
                config.timeout(),
                config.device_secret.clone(),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn events_url(&self) -> String {
        format!("{}/attendance/events", self.endpoint)
    }

    fn credential(&self, request: &SubmitRequest) -> Result<Option<NonceCredential>, RemoteError> {
        let Some(secret) = &self.device_secret else {
            return Ok(None);
        };
        let signed_data = format!("submit_event:{}", request.event_id);
        CredentialBuilder::new(secret.as_bytes())
            .sign(signed_data.as_bytes())
            .map(Some)
            .map_err(|e| RemoteError::Signing(e.to_string()))
    }
}

#[async_trait]
impl RemoteAttendanceApi for HttpAttendanceApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitOutcome, RemoteError> {
        let url = self.events_url();
        let body = SubmitBody {
            event: request,
            credential: self.credential(request)?,
        };

        debug!("Submitting event {} to {}", request.event_id, url);

        let response = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_KEY, request.event_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let accepted: AcceptedBody = response
                .json()
                .await
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
            return Ok(SubmitOutcome::Accepted {
                server_id: accepted.server_id,
            });
        }

        if status == StatusCode::CONFLICT {
            let text = response.text().await.unwrap_or_default();
            let conflict: ConflictBody = serde_json::from_str(&text).unwrap_or_default();
            return Ok(SubmitOutcome::Conflict {
                reason: conflict
                    .reason
                    .unwrap_or_else(|| format!("conflict reported by server: {text}")),
                server_id: conflict.server_id,
            });
        }

        let transient = status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS;
        let text = response.text().await.unwrap_or_default();

        if transient {
            return Err(RemoteError::Server {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(SubmitOutcome::Conflict {
            reason: format!("rejected with status {status}: {text}"),
            server_id: None,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let disabled = SyncConfig::default();
        assert!(HttpAttendanceApi::from_config(&disabled).unwrap().is_none());

        let enabled = SyncConfig {
            endpoint: Some("https://attendance.example.com/api/".to_string()),
            ..Default::default()
        };
        let api = HttpAttendanceApi::from_config(&enabled).unwrap().unwrap();
        assert_eq!(
            api.events_url(),
            "https://attendance.example.com/api/attendance/events"
        );
    }

    #[test]
    fn test_credential_only_with_device_secret() {
        let request = SubmitRequest {
            event_id: uuid::Uuid::new_v4(),
            employee_id: "e-1".to_string(),
            branch_id: "HQ".to_string(),
            occurred_at: chrono::Utc::now(),
            scan_type: crate::model::ScanType::CheckIn,
            status: crate::model::AttendanceStatus::OnTime,
            nonce: None,
        };

        let plain = HttpAttendanceApi::new("http://127.0.0.1:1", Duration::from_secs(1), None).unwrap();
        assert!(plain.credential(&request).unwrap().is_none());

        let signed = HttpAttendanceApi::new(
            "http://127.0.0.1:1",
            Duration::from_secs(1),
            Some("device-shared-secret".to_string()),
        )
        .unwrap();
        let body = SubmitBody {
            event: &request,
            credential: signed.credential(&request).unwrap(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["event_id"], request.event_id.to_string());
        assert!(json.get("credential").is_some());
    }
}

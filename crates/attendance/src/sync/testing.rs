//! 测试用的远端替身

use super::remote::{RemoteAttendanceApi, RemoteError, SubmitOutcome, SubmitRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

type Responder = Box<dyn Fn(&SubmitRequest) -> Result<SubmitOutcome, RemoteError> + Send + Sync>;

pub(crate) struct FakeRemote {
    calls: AtomicUsize,
    respond: Responder,
    delay: Option<Duration>,
    gate: Option<Semaphore>,
}

impl FakeRemote {
    pub(crate) fn new(
        respond: impl Fn(&SubmitRequest) -> Result<SubmitOutcome, RemoteError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
            delay: None,
            gate: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 每次提交都要等 [`FakeRemote::open_gate`] 放行
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAttendanceApi for FakeRemote {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitOutcome, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(request)
    }
}

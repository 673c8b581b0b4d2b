//! Deterministic `ModelInvoker` stub for tests.

use crate::client::{CallPurpose, ModelInvoker, RecognitionRequest};
use crate::models::RecognitionError;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// A call observed by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub image_ref: String,
    pub prompt: String,
    pub image_attached: bool,
    pub purpose: CallPurpose,
}

type Script = dyn Fn(&RecordedCall) -> Result<String, RecognitionError> + Send + Sync;

/// Answers every call from a script and records it.
pub struct ScriptedInvoker {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    pub fn new(
        script: impl Fn(&RecordedCall) -> Result<String, RecognitionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Echo `<model>:<image>` for recognition calls, fixed text for judges.
    pub fn echo() -> Self {
        Self::new(|call| match call.purpose {
            CallPurpose::Recognition => Ok(format!("{}:{}", call.model, call.image_ref)),
            CallPurpose::Judge => Ok(format!("judged:{}", call.image_ref)),
        })
    }

    /// Sleep before answering, to simulate network latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn judge_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.purpose == CallPurpose::Judge)
            .collect()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: RecognitionRequest<'_>) -> Result<String, RecognitionError> {
        let call = RecordedCall {
            model: request.model.to_string(),
            image_ref: request.image_ref.to_string(),
            prompt: request.prompt.to_string(),
            image_attached: request.image.is_some(),
            purpose: request.purpose,
        };
        self.calls.lock().unwrap().push(call.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.script)(&call)
    }
}

// src/llm/testing.rs

//! Scripted stand-in for a completion service.

use super::{LlmClient, Prompt, Purpose};
use crate::error::ServiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&Prompt<'_>) -> Result<String, ServiceError> + Send + Sync>;

/// Answers each purpose with a registered handler and records every call.
/// A purpose with no handler fails like an unreachable service.
#[derive(Default)]
pub struct FakeLlm {
    handlers: HashMap<Purpose, Handler>,
    calls: Mutex<Vec<(Purpose, String)>>,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `purpose` with `text`.
    pub fn reply(self, purpose: Purpose, text: &str) -> Self {
        let text = text.to_string();
        self.on(purpose, move |_| Ok(text.clone()))
    }

    /// Answer `purpose` by inspecting the prompt.
    pub fn on<F>(mut self, purpose: Purpose, handler: F) -> Self
    where
        F: Fn(&Prompt<'_>) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        self.handlers.insert(purpose, Box::new(handler));
        self
    }

    /// Fail every call for `purpose` with a 500.
    pub fn fail(self, purpose: Purpose) -> Self {
        self.on(purpose, |_| {
            Err(ServiceError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            })
        })
    }

    pub fn calls(&self, purpose: Purpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == purpose)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// User prompts sent for `purpose`, in order.
    pub fn prompts(&self, purpose: Purpose) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == purpose)
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, prompt: &Prompt<'_>) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.purpose, prompt.user.clone()));
        match self.handlers.get(&prompt.purpose) {
            Some(handler) => handler(prompt),
            None => Err(ServiceError::Unavailable(format!(
                "no scripted reply for {}",
                prompt.purpose.as_str()
            ))),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

//! LLM client seam
//!
//! The planner only ever sees this trait: a prompt and a deadline in, text
//! and token usage out. Transport, auth and model selection live behind it.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// One model completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

impl Completion {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_in: None,
            tokens_out: None,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produce a completion within `timeout_ms` or fail.
    async fn generate(&self, prompt: &str, timeout_ms: u64) -> Result<Completion>;
}

/// Canned-response client for tests and offline runs. Responses are served
/// FIFO; an empty queue fails the call, which exercises the deterministic
/// fallback path end to end.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Completion>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_responses(texts: Vec<String>) -> Self {
        let queue = texts.into_iter().map(Completion::text_only).collect();
        Self {
            responses: Mutex::new(queue),
        }
    }

    pub async fn push(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .await
            .push_back(Completion::text_only(text));
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, _prompt: &str, _timeout_ms: u64) -> Result<Completion> {
        match self.responses.lock().await.pop_front() {
            Some(mut completion) => {
                // synthesize usage figures so token accounting paths run
                if completion.tokens_out.is_none() {
                    completion.tokens_out = Some((completion.text.len() / 4) as u32);
                }
                Ok(completion)
            }
            None => bail!("no scripted completion available"),
        }
    }
}

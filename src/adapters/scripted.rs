//! Deterministic stand-ins for the speech and model services.
//!
//! `ScriptedSpeech` replays queued replies in order and records which model
//! each call asked for. `ScriptedInterpreter` maps transcript phrases to fixed
//! action lists and records every request it saw, so tests can assert on the
//! known-item snapshot a chunk was interpreted against.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{AudioInput, HttpFailure, SpeechBackend, SpeechOutcome};
use crate::core::interpreter::{InterpretError, InterpretRequest, Interpreter};
use crate::domain::{ActionBatch, StructuredAction};

/// One queued reply for [`ScriptedSpeech`]
#[derive(Debug, Clone)]
pub enum SpeechReply {
    Text(String),
    UnsupportedFormat,
    Failure(String),
}

/// Speech backend that replays queued replies
#[derive(Default)]
pub struct ScriptedSpeech {
    replies: Mutex<VecDeque<SpeechReply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn reply(self, reply: SpeechReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(reply);
        self
    }

    /// Queue a reply on a shared instance
    pub fn push(&self, reply: SpeechReply) {
        self.replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(reply);
    }

    /// Models requested so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl SpeechBackend for ScriptedSpeech {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, _audio: &AudioInput, model: &str) -> SpeechOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(model.to_string());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();

        match next {
            Some(SpeechReply::Text(text)) => SpeechOutcome::Text(text),
            Some(SpeechReply::UnsupportedFormat) => {
                let body = r#"{"error":{"message":"Unsupported file format","code":"unsupported_format"}}"#;
                SpeechOutcome::UnsupportedFormat(
                    HttpFailure::from_body("transcription", 400, body.to_string()).into(),
                )
            }
            Some(SpeechReply::Failure(message)) => SpeechOutcome::Failed(anyhow!(message)),
            None => SpeechOutcome::Failed(anyhow!("no scripted transcription left")),
        }
    }
}

/// A phrase and the actions it produces
struct Rule {
    phrase: String,
    outcome: RuleOutcome,
}

enum RuleOutcome {
    Actions(Vec<StructuredAction>),
    Fail(String),
}

/// Interpreter that answers from phrase rules
#[derive(Default)]
pub struct ScriptedInterpreter {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    conversations: AtomicU64,
    requests: Mutex<Vec<InterpretRequest>>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcripts containing `phrase` (case-insensitive) yield `actions`
    pub fn when(mut self, phrase: impl Into<String>, actions: Vec<StructuredAction>) -> Self {
        self.rules.push(Rule {
            phrase: phrase.into().to_lowercase(),
            outcome: RuleOutcome::Actions(actions),
        });
        self
    }

    /// Transcripts containing `phrase` fail interpretation
    pub fn fail_when(mut self, phrase: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule {
            phrase: phrase.into().to_lowercase(),
            outcome: RuleOutcome::Fail(message.into()),
        });
        self
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<InterpretRequest> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Conversations opened so far
    pub fn conversations_opened(&self) -> u64 {
        self.conversations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn open_conversation(
        &self,
        _session_id: &str,
        _request_id: Option<&str>,
    ) -> Result<String, InterpretError> {
        let n = self.conversations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("conv_{}", n))
    }

    async fn interpret(&self, request: &InterpretRequest) -> Result<ActionBatch, InterpretError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = request.text.to_lowercase();
        let matched = self.rules.iter().find(|rule| text.contains(&rule.phrase));

        match matched.map(|rule| &rule.outcome) {
            Some(RuleOutcome::Actions(actions)) => Ok(ActionBatch::new(actions.clone())),
            Some(RuleOutcome::Fail(message)) => Err(InterpretError::Model(anyhow!(message.clone()))),
            None => Ok(ActionBatch::default()),
        }
    }
}

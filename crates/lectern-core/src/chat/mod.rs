//! Chat model abstraction.
//!
//! The research loop only needs one capability: send a system + user prompt,
//! get text back. Structured outputs are layered on top by asking for a
//! single JSON object and parsing it out of the reply, with one stricter
//! retry on a malformed response.

pub mod anthropic;
pub mod openai;

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::{ChatApi, ChatConfig};

pub use anthropic::AnthropicChat;
pub use openai::OpenAiChat;

/// Unified chat model interface.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot completion.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Provider name ("anthropic", "openai", "scripted")
    fn provider_name(&self) -> &'static str;

    /// Model identifier
    fn model_id(&self) -> &str;
}

/// Build the backend selected by `config`.
///
/// Provider API keys come from the environment (`ANTHROPIC_API_KEY`,
/// `OPENAI_API_KEY`); a missing key is a configuration error.
pub fn from_config(config: &ChatConfig) -> Result<Box<dyn ChatModel>> {
    match config.api {
        ChatApi::Anthropic => {
            let api_key =
                std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;
            Ok(Box::new(AnthropicChat::new(
                &api_key,
                &config.name,
                config.temperature,
            )))
        }
        ChatApi::OpenAi => Ok(Box::new(OpenAiChat::new(&config.name, config.temperature))),
    }
}

/// Ask for a single JSON object matching `schema_hint` and parse it.
///
/// One retry with a stricter instruction; a second malformed reply is the
/// caller's problem (the research loop degrades to a canned finalization).
pub async fn complete_structured<T: DeserializeOwned>(
    model: &dyn ChatModel,
    system: &str,
    user: &str,
    schema_hint: &str,
) -> Result<T> {
    let prompt = format!(
        "{user}\n\nRespond with a single JSON object of this shape and nothing else:\n{schema_hint}"
    );
    let reply = model.complete(system, &prompt).await?;

    match parse_json_reply::<T>(&reply) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            tracing::warn!(
                provider = model.provider_name(),
                error = %first_error,
                "Structured reply did not parse, retrying with stricter prompt"
            );
            let strict = format!(
                "{user}\n\nYour previous reply was not valid JSON. Respond with ONLY a raw JSON \
                 object of this exact shape - no prose, no code fences:\n{schema_hint}"
            );
            let reply = model.complete(system, &strict).await?;
            parse_json_reply::<T>(&reply)
                .with_context(|| format!("Model returned invalid structured output: {reply}"))
        }
    }
}

/// Extract and parse the first JSON object in a reply.
///
/// Tolerates surrounding prose and markdown code fences.
fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let start = reply.find('{').context("no JSON object in reply")?;
    let end = reply.rfind('}').context("no closing brace in reply")?;
    if end < start {
        anyhow::bail!("malformed JSON object in reply");
    }
    let candidate = &reply[start..=end];
    serde_json::from_str(candidate).with_context(|| "failed to parse JSON object")
}

/// Replays canned responses; for tests.
///
/// Records every prompt it receives and fails when the script runs dry, so
/// tests can assert both call contents and call counts.
pub struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedChat {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All `(system, user)` prompts seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((system.to_string(), user.to_string()));
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .context("scripted chat ran out of responses")
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

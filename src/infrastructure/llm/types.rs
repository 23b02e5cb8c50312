//! Request bodies for the two supported completion APIs
//!
//! Responses need no wire types of their own: both shapes deserialize
//! directly into [`crate::domain::models::ModelResponse`].

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::models::{CompletionRequest, Message, Role};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_empty_slice(items: &&[String]) -> bool {
    items.is_empty()
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_empty_map(map: &&BTreeMap<String, f64>) -> bool {
    map.is_empty()
}

/// `POST /v1/chat/completions` body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub n: u32,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub stop: &'a [String],
    #[serde(skip_serializing_if = "is_empty_map")]
    pub logit_bias: &'a BTreeMap<String, f64>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

impl<'a> From<&'a CompletionRequest> for ChatCompletionRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            n: request.n.max(1),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop_sequences,
            logit_bias: &request.logit_bias,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
        }
    }
}

/// `POST /v1/messages` body
///
/// The system prompt travels outside the message list, and consecutive system
/// messages are concatenated.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest<'a> {
    pub model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<&'a Message>,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub stop_sequences: &'a [String],
}

impl<'a> From<&'a CompletionRequest> for MessagesRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        let (system, messages): (Vec<&Message>, Vec<&Message>) = request
            .messages
            .iter()
            .partition(|m| m.role == Role::System);
        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        Self {
            model: &request.model,
            system,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop_sequences: &request.stop_sequences,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::conversation::Message;
use super::program::TokenUsage;

/// Parameters for one generation request to the model service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Number of samples requested from a single call
    pub n: u32,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub logit_bias: BTreeMap<String, f64>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

/// One canonical completion, independent of the service's response shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Raw model-service response
///
/// Services answer in one of two shapes: a list of `choices` (each a
/// structured message or a plain `text` payload) or a list of `content`
/// blocks. Both are normalized by [`ModelResponse::into_completions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelResponse {
    Choices {
        choices: Vec<Choice>,
        #[serde(default)]
        usage: Option<ChoicesUsage>,
    },
    Content {
        content: Vec<ContentBlock>,
        #[serde(default)]
        usage: Option<ContentUsage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoicesUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
}

impl Choice {
    fn into_text(self) -> Option<String> {
        self.message.and_then(|m| m.content).or(self.text)
    }
}

impl ModelResponse {
    /// Normalize into canonical completions.
    ///
    /// Batch usage from a multi-choice response is divided evenly between the
    /// choices. Choices carrying neither message content nor text are skipped.
    pub fn into_completions(self) -> Vec<Completion> {
        match self {
            Self::Choices { choices, usage } => {
                let usage = usage
                    .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
                    .unwrap_or_default()
                    .split(choices.len());
                choices
                    .into_iter()
                    .filter_map(Choice::into_text)
                    .map(|text| Completion { text, usage })
                    .collect()
            }
            Self::Content { content, usage } => {
                let texts: Vec<String> = content
                    .into_iter()
                    .filter(|block| block.kind.as_deref().is_none_or(|k| k == "text"))
                    .filter_map(|block| block.text)
                    .collect();
                if texts.is_empty() {
                    return Vec::new();
                }
                let usage = usage
                    .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
                    .unwrap_or_default();
                vec![Completion {
                    text: texts.join(""),
                    usage,
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choices_with_messages_and_text() {
        let json = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "a = 1"}},
                {"text": "b = 2"},
                {"finish_reason": "length"}
            ],
            "usage": {"prompt_tokens": 90, "completion_tokens": 30, "total_tokens": 120}
        }"#;
        let response: ModelResponse = serde_json::from_str(json).unwrap();
        let completions = response.into_completions();

        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].text, "a = 1");
        assert_eq!(completions[1].text, "b = 2");
        assert_eq!(completions[0].usage, TokenUsage::new(30, 10));
    }

    #[test]
    fn test_content_blocks() {
        let json = r#"{
            "id": "msg_1",
            "content": [{"type": "text", "text": "print("}, {"type": "text", "text": "1)"}],
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }"#;
        let response: ModelResponse = serde_json::from_str(json).unwrap();
        let completions = response.into_completions();

        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].text, "print(1)");
        assert_eq!(completions[0].usage.total(), 16);
    }

    #[test]
    fn test_content_without_text_yields_nothing() {
        let json = r#"{"content": [{"type": "tool_use"}]}"#;
        let response: ModelResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_completions().is_empty());
    }

    #[test]
    fn test_missing_usage_defaults_to_zero() {
        let json = r#"{"choices": [{"text": "x"}]}"#;
        let response: ModelResponse = serde_json::from_str(json).unwrap();
        let completions = response.into_completions();
        assert_eq!(completions[0].usage, TokenUsage::default());
    }
}

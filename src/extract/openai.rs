//! OpenAI-compatible chat-completions backend.
//!
//! Works against api.openai.com and any server speaking the same protocol
//! (set `OPENAI_BASE_URL` or `--base-url`).

use super::{BackendError, CompletionBackend, HttpClient};
use crate::config::{PipelineConfig, ProviderSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: HttpClient,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiBackend {
    pub(crate) fn new(
        client: HttpClient,
        settings: &ProviderSettings,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: settings.model.clone(),
            api_key: settings.api_key().to_string(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BackendError> {
        let body = build_request(&self.model, system, prompt, self.temperature);
        let request = self
            .client
            .inner
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&body);
        let reply: ChatResponse = self.client.send_json(request).await?;
        reply_text(reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    refusal: Option<String>,
}

fn build_request<'a>(
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    temperature: f32,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

fn reply_text(reply: ChatResponse) -> Result<String, BackendError> {
    let message = reply
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| BackendError::Envelope("no choices in response".into()))?;
    match (message.content, message.refusal) {
        (Some(text), _) if !text.is_empty() => Ok(text),
        (_, Some(refusal)) => Err(BackendError::Envelope(format!("model refused: {refusal}"))),
        _ => Err(BackendError::Envelope("empty message content".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_json_object_mode() {
        let v = serde_json::to_value(build_request("gpt-3.5-turbo", "sys", "p", 0.1)).unwrap();
        assert_eq!(v["response_format"]["type"], "json_object");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "p");
        assert_eq!(v["model"], "gpt-3.5-turbo");
    }

    #[test]
    fn reply_takes_first_choice() {
        let reply: ChatResponse = serde_json::from_value(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{}"}}]
        }))
        .unwrap();
        assert_eq!(reply_text(reply).unwrap(), "{}");
    }

    #[test]
    fn null_content_and_refusals_are_envelope_errors() {
        let refused: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "refusal": "no"}}]
        }))
        .unwrap();
        assert!(reply_text(refused).unwrap_err().to_string().contains("refused"));

        let none: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(reply_text(none).is_err());
    }
}

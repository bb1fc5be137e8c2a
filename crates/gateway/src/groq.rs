use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use slotline_core::config::LlmConfig;
use slotline_core::errors::CapabilityError;
use slotline_core::ports::{LanguageModel, PromptTurn};

use crate::{read_json, transport_error};

/// Client for any OpenAI-compatible `/chat/completions` endpoint (Groq by
/// default).
pub struct ChatCompletionsClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    pub fn from_config(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn request_body(&self, turns: &[PromptTurn]) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": turns,
        })
    }
}

/// Pulls the first choice's message text out of a completion response.
pub fn parse_completion(body: &Value) -> Result<String, CapabilityError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CapabilityError::Decode("completion response has no choices[0].message.content".into())
        })
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, turns: &[PromptTurn]) -> Result<String, CapabilityError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            event_name = "llm.request",
            model = %self.model,
            turns = turns.len(),
            "sending chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(turns))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json(response).await?;
        let text = parse_completion(&body)?;

        debug!(event_name = "llm.response", chars = text.chars().count(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use serde_json::json;

    use slotline_core::config::AppConfig;
    use slotline_core::errors::CapabilityError;
    use slotline_core::ports::PromptTurn;

    use super::{parse_completion, ChatCompletionsClient};

    #[test]
    fn body_carries_model_settings_and_roles() {
        let config = AppConfig::default();
        let client = ChatCompletionsClient::from_config(Client::new(), &config.llm);

        let body = client.request_body(&[PromptTurn::system("rules"), PromptTurn::user("hi")]);

        assert_eq!(body["model"], json!(config.llm.model));
        assert_eq!(body["max_tokens"], json!(config.llm.max_tokens));
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "rules"}));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn parses_first_choice_content() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"a\":1}"}}]
        });

        assert_eq!(parse_completion(&body).expect("content"), "{\"a\":1}");
    }

    #[test]
    fn missing_choices_is_a_decode_error() {
        let error = parse_completion(&json!({"error": {"message": "rate limited"}}))
            .expect_err("no content");

        assert!(matches!(error, CapabilityError::Decode(_)));
    }
}

use crate::config::LlmSettings;
use crate::generator::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A chat model that turns a system + user prompt into raw completion text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self::new(
            settings.api_key.clone(),
            settings.model.clone(),
            settings.base_url.clone(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, messages: Vec<ChatMessage>) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            max_tokens: 1000,
        };

        debug!("Calling {} at {}", self.model, self.base_url);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "LLM API returned {}: {}",
                status,
                text.chars().take(300).collect::<String>()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to read LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        self.call_llm(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .await
    }
}

/// Pull `choices[0].message.content` out of a chat completions payload.
fn extract_content(response_json: &serde_json::Value) -> Result<String, GenerationError> {
    response_json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed {
            raw: response_json.to_string(),
            detail: "No content in LLM response".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_content() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"sql_query\": \"SELECT 1\"}"}}]
        });
        assert_eq!(extract_content(&payload).unwrap(), "{\"sql_query\": \"SELECT 1\"}");
    }

    #[test]
    fn test_missing_content_is_malformed() {
        let payload = json!({"choices": []});
        assert!(matches!(
            extract_content(&payload),
            Err(GenerationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage::system("rules"), ChatMessage::user("question")],
            temperature: 0.0,
            max_tokens: 1000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "question");
        assert_eq!(value["temperature"], 0.0);
    }
}

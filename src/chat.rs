//! Chat completion client
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (OpenAI or
//! OpenRouter). One request per turn with no tool loop and no retry; a failed
//! call fails the turn and the orchestrator unwinds it.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::conversation::ChatResponder;
use crate::{Error, Result};

/// OpenAI API base URL
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenRouter API base URL
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Max tokens per reply; voice replies should stay short
const MAX_TOKENS: u32 = 1024;

/// Default cap on retained history, in user/assistant turn pairs
const DEFAULT_HISTORY_TURNS: usize = 20;

/// One message in the conversation history
#[derive(Debug, Clone, serde::Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Per-session chat state: active overrides plus rolling history
struct ChatSession {
    model: String,
    system_prompt: Option<String>,
    history: Vec<ChatMessage>,
}

/// Produces assistant replies with rolling conversation history
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    default_system_prompt: Option<String>,
    max_history_turns: usize,
    session: Mutex<ChatSession>,
}

impl ChatClient {
    /// Create a client against an OpenAI-compatible endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("chat API key required".to_string()));
        }

        let session = ChatSession {
            model: model.clone(),
            system_prompt: system_prompt.clone(),
            history: Vec::new(),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model,
            default_system_prompt: system_prompt,
            max_history_turns: DEFAULT_HISTORY_TURNS,
            session: Mutex::new(session),
        })
    }

    /// Create a client for the OpenAI API
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_openai(
        api_key: String,
        model: String,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        Self::new(api_key, OPENAI_BASE_URL.to_string(), model, system_prompt)
    }

    /// Create a client for OpenRouter
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_openrouter(
        api_key: String,
        model: String,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        Self::new(
            api_key,
            OPENROUTER_BASE_URL.to_string(),
            model,
            system_prompt,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChatSession> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Build the request message list: system prompt, history, new utterance
    fn build_messages(session: &ChatSession, user_text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.history.len() + 2);
        if let Some(prompt) = &session.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: prompt.clone(),
            });
        }
        messages.extend(session.history.iter().cloned());
        messages.push(ChatMessage {
            role: "user",
            content: user_text.to_string(),
        });
        messages
    }

    /// Drop the oldest turns once history exceeds the cap
    fn trim_history(history: &mut Vec<ChatMessage>, max_turns: usize) {
        let max_messages = max_turns * 2;
        if history.len() > max_messages {
            let excess = history.len() - max_messages;
            history.drain(..excess);
        }
    }
}

#[async_trait]
impl ChatResponder for ChatClient {
    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn begin_session(&self, system_prompt: Option<&str>, model_id: Option<&str>) {
        let mut session = self.lock();
        session.history.clear();
        session.system_prompt = system_prompt
            .map(String::from)
            .or_else(|| self.default_system_prompt.clone());
        session.model = model_id.map_or_else(|| self.default_model.clone(), String::from);
        tracing::debug!(model = %session.model, "chat session reset");
    }

    async fn send_message(&self, user_text: &str) -> Result<String> {
        let (model, messages) = {
            let session = self.lock();
            (session.model.clone(), Self::build_messages(&session, user_text))
        };

        tracing::debug!(model = %model, messages = messages.len(), "sending chat completion");

        let request = ChatRequest {
            model: &model,
            messages: &messages,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat response");
            e
        })?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Chat("chat API returned an empty reply".to_string()))?;

        {
            let mut session = self.lock();
            session.history.push(ChatMessage {
                role: "user",
                content: user_text.to_string(),
            });
            session.history.push(ChatMessage {
                role: "assistant",
                content: reply.clone(),
            });
            Self::trim_history(&mut session.history, self.max_history_turns);
        }

        tracing::info!(chars = reply.len(), "chat completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatClient {
        ChatClient::new_openai(
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            Some("Keep replies short.".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn missing_key_is_rejected() {
        let result = ChatClient::new_openai(String::new(), "gpt-4o-mini".to_string(), None);
        assert!(result.is_err());
    }

    #[test]
    fn messages_include_system_prompt_and_history() {
        let client = client();
        {
            let mut session = client.lock();
            session.history.push(ChatMessage {
                role: "user",
                content: "hi".to_string(),
            });
            session.history.push(ChatMessage {
                role: "assistant",
                content: "hello".to_string(),
            });
        }

        let session = client.lock();
        let messages = ChatClient::build_messages(&session, "what time is it?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[3].role, "user");
        assert_eq!(messages[3].content, "what time is it?");
    }

    #[test]
    fn begin_session_overrides_and_resets() {
        let client = client();
        {
            let mut session = client.lock();
            session.history.push(ChatMessage {
                role: "user",
                content: "old".to_string(),
            });
        }

        client.begin_session(Some("You are a pirate."), Some("gpt-4o"));

        let session = client.lock();
        assert!(session.history.is_empty());
        assert_eq!(session.model, "gpt-4o");
        assert_eq!(session.system_prompt.as_deref(), Some("You are a pirate."));
    }

    #[test]
    fn begin_session_falls_back_to_defaults() {
        let client = client();
        client.begin_session(Some("override"), Some("other-model"));
        client.begin_session(None, None);

        let session = client.lock();
        assert_eq!(session.model, "gpt-4o-mini");
        assert_eq!(session.system_prompt.as_deref(), Some("Keep replies short."));
    }

    #[test]
    fn history_trims_oldest_turns() {
        let mut history = Vec::new();
        for i in 0..50 {
            history.push(ChatMessage {
                role: "user",
                content: format!("q{i}"),
            });
            history.push(ChatMessage {
                role: "assistant",
                content: format!("a{i}"),
            });
        }

        ChatClient::trim_history(&mut history, 20);
        assert_eq!(history.len(), 40);
        assert_eq!(history[0].content, "q30");
    }

    #[test]
    fn chat_response_parses() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let content = response.choices[0].message.content.as_deref();
        assert_eq!(content, Some("hi there"));
    }
}

//! Request/response side of the assistant API.
//!
//! Replies also arrive on the conversation's push channel; both paths carry
//! the server's message id, so the tracker stores each reply once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_state::{Author, ConversationTurn};
use push_channel::CredentialSource;
use push_channel::envelope::parse_timestamp;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant API is unavailable")]
    Unavailable,

    #[error("assistant API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("assistant rejected the message")]
    Rejected,

    #[error(transparent)]
    Http(reqwest::Error),
}

impl AssistantError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatedConversation {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendReply {
    pub success: bool,
    pub message_id: String,
    pub response: String,
    pub timestamp: String,
}

impl SendReply {
    pub fn into_turn(self, received_at: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            turn_id: self.message_id,
            author: Author::Remote,
            text: self.response,
            timestamp: parse_timestamp(&self.timestamp).unwrap_or(received_at),
            client_turn_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn into_turn(self, fallback: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            turn_id: self.id,
            author: Author::from_role(&self.sender),
            text: self.content,
            timestamp: parse_timestamp(&self.timestamp).unwrap_or(fallback),
            client_turn_id: None,
        }
    }
}

pub struct AssistantClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl AssistantClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AssistantError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn conversations_url(&self) -> String {
        format!("{}/api/ai/conversations", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.bearer() {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AssistantError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(AssistantError::from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Status { status, body });
        }

        resp.json().await.map_err(AssistantError::from_reqwest)
    }

    pub async fn create_conversation(&self) -> Result<CreatedConversation, AssistantError> {
        let body = serde_json::json!({
            "context_type": "general",
            "context_id": "general",
        });
        let created: CreatedConversation = self
            .send(self.client.post(self.conversations_url()).json(&body))
            .await?;
        debug!(conversation = %created.id, "conversation created");
        Ok(created)
    }

    /// Post a user turn. `client_turn_id` is the optimistic local id the
    /// server echoes on the confirmed turn.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        client_turn_id: &str,
    ) -> Result<SendReply, AssistantError> {
        let url = format!("{}/{}/messages", self.conversations_url(), conversation_id);
        let body = serde_json::json!({
            "content": content,
            "message_type": "text",
            "client_turn_id": client_turn_id,
        });
        let reply: SendReply = self.send(self.client.post(url).json(&body)).await?;
        if !reply.success {
            return Err(AssistantError::Rejected);
        }
        Ok(reply)
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>, AssistantError> {
        let url = format!("{}/{}", self.conversations_url(), conversation_id);
        self.send(self.client.get(url)).await
    }
}

// REST API бэкенда
//
// Содержимое сообщений, история и прочтения идут только через REST.
// Сокет лишь уведомляет; источник истины - сервер.

use crate::config::Config;
use crate::protocol::messages::SenderData;
use crate::state::models::{Conversation, LastMessageSummary, Message, MessageId, MessageKind, UserId};
use crate::utils::error::{RealtimeError, Result};
use crate::utils::time::{deserialize_opt_timestamp, deserialize_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// DTO
// ============================================================================

/// Последнее сообщение в элементе `GET /messages/conversations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessageDto {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_own: bool,
}

/// Элемент `GET /messages/conversations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDto {
    pub user: SenderData,
    #[serde(default)]
    pub last_message: Option<LastMessageDto>,
    #[serde(default)]
    pub unread_count: u32,
}

impl From<ConversationDto> for Conversation {
    fn from(dto: ConversationDto) -> Self {
        let mut conversation = Conversation::new(dto.user.id, dto.user.display_name());
        conversation.peer_avatar = dto.user.avatar;
        conversation.unread_count = dto.unread_count;
        conversation.last_message = dto.last_message.map(|last| LastMessageSummary {
            content: last.content.unwrap_or_default(),
            kind: last.message_type,
            created_at: last.created_at,
            is_read: last.is_read,
            is_own: last.is_own,
        });
        conversation
    }
}

/// Сообщение из `GET /messages/conversation/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: MessageId,
    pub sender: SenderData,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_own: Option<bool>,
}

impl MessageDto {
    /// `is_own` считается по пользователю сессии, поле сервера только сверяется
    pub fn into_message(self, session_user_id: UserId) -> Message {
        let is_own = self.sender.id == session_user_id;
        if self.is_own.is_some_and(|server| server != is_own) {
            debug!(message_id = self.id, "Server is_own disagrees with sender id");
        }
        Message {
            id: self.id,
            sender_name: self.sender.display_name(),
            sender_id: self.sender.id,
            content: self.content.unwrap_or_default(),
            kind: self.message_type,
            media_ref: self.media_url,
            is_read: self.is_read,
            created_at: self.created_at,
            is_own,
        }
    }
}

/// Тело `POST /messages/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub recipient_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Ответ `POST /messages/` (нужны только id и время)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedMessage {
    pub id: MessageId,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Ответ `POST /upload/media`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Путь вида `/uploads/{type}/{file}`, становится `media_ref`
    pub file_path: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

// ============================================================================
// Trait
// ============================================================================

/// REST операции, которые нужны чат-клиенту
///
/// `?Send`: клиент однопоточный (event loop браузера).
#[async_trait(?Send)]
pub trait RestApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationDto>>;

    /// История беседы в хронологическом порядке
    async fn conversation_history(&self, peer_id: UserId) -> Result<Vec<MessageDto>>;

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<CreatedMessage>;

    async fn mark_read(&self, message_id: MessageId) -> Result<()>;

    async fn upload_media(&self, file_name: &str, bytes: Vec<u8>, mime_type: &str) -> Result<UploadResponse>;
}

// ============================================================================
// HTTP реализация
// ============================================================================

/// REST клиент поверх reqwest
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    http: Client,
    base_url: String,
    token: String,
    #[cfg(not(target_arch = "wasm32"))]
    timeout: std::time::Duration,
}

impl HttpRestClient {
    pub fn new(config: &Config, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            #[cfg(not(target_arch = "wasm32"))]
            timeout: std::time::Duration::from_millis(config.http_timeout_ms),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path)).bearer_auth(&self.token);
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(self.timeout);
        builder
    }
}

#[async_trait(?Send)]
impl RestApi for HttpRestClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationDto>> {
        let res = self
            .request(reqwest::Method::GET, "/messages/conversations")
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn conversation_history(&self, peer_id: UserId) -> Result<Vec<MessageDto>> {
        let res = self
            .request(reqwest::Method::GET, &format!("/messages/conversation/{}", peer_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<CreatedMessage> {
        let res = self
            .request(reqwest::Method::POST, "/messages/")
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn mark_read(&self, message_id: MessageId) -> Result<()> {
        self.request(reqwest::Method::PUT, &format!("/messages/{}/read", message_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn upload_media(&self, file_name: &str, bytes: Vec<u8>, mime_type: &str) -> Result<UploadResponse> {
        if bytes.is_empty() {
            return Err(RealtimeError::InvalidInput("empty file".to_string()));
        }
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| RealtimeError::InvalidInput(format!("bad mime type {}: {}", mime_type, e)))?;

        let res = self
            .request(reqwest::Method::POST, "/upload/media")
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }
}
